use chrono::Utc;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

use crate::errors::TurnError;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

/// Caller-supplied context hints folded into the system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextHints {
    pub user_name: Option<String>,
    /// The UI page the user is currently on, if any
    pub page: Option<String>,
    pub timezone: Option<String>,
}

/// Render the system prompt for a turn from the template and hints.
pub fn system_prompt(hints: &ContextHints) -> Result<String, TurnError> {
    let mut tera = Tera::default();
    tera.add_raw_template("system", SYSTEM_TEMPLATE)
        .map_err(|e| TurnError::Internal(e.to_string()))?;

    let mut context = Context::new();
    context.insert("date", &Utc::now().format("%Y-%m-%d").to_string());
    context.insert("user_name", &hints.user_name);
    context.insert("page", &hints.page);
    context.insert("timezone", &hints.timezone);

    tera.render("system", &context)
        .map_err(|e| TurnError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renders_with_full_hints() {
        let hints = ContextHints {
            user_name: Some("Ada".to_string()),
            page: Some("tasks".to_string()),
            timezone: Some("Europe/Vienna".to_string()),
        };
        let prompt = system_prompt(&hints).unwrap();
        assert!(prompt.contains("Ada"));
        assert!(prompt.contains("\"tasks\" page"));
        assert!(prompt.contains("Europe/Vienna"));
    }

    #[test]
    fn test_renders_without_hints() {
        let prompt = system_prompt(&ContextHints::default()).unwrap();
        assert!(prompt.contains("the user"));
        assert!(!prompt.contains("page."));
    }
}
