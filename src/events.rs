use serde::{Deserialize, Serialize};

use crate::cost::TurnCostRecord;

/// Events a turn emits, in generation order, over the streaming transport.
/// `Done` or `Error` is always the last event of a turn and fires exactly
/// once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TurnEvent {
    /// Incremental assistant text
    TextDelta { text: String },
    /// A tool invocation was dispatched
    ToolStarted { id: String, name: String },
    /// A tool invocation finished, successfully or not
    ToolFinished { id: String, ok: bool },
    /// Terminal success: the finalized cost record and message count
    Done {
        cost: TurnCostRecord,
        message_count: usize,
    },
    /// Terminal failure
    Error { message: String },
}

impl TurnEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnEvent::Done { .. } | TurnEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_tagged() {
        let event = TurnEvent::ToolStarted {
            id: "call_1".to_string(),
            name: "create_task".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool-started");
        assert_eq!(value["id"], "call_1");
    }

    #[test]
    fn test_terminal_classification() {
        assert!(TurnEvent::Error {
            message: "x".into()
        }
        .is_terminal());
        assert!(!TurnEvent::TextDelta { text: "x".into() }.is_terminal());
    }
}
