use serde::{Deserialize, Serialize};

/// Who a message is attributed to. Tool results travel inside user-role
/// messages, per the completion-API convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}
