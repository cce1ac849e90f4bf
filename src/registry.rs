use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::{ToolError, ToolResult};
use crate::models::tool::{Tool, ToolCall};
use crate::services::{CalendarStore, ContactDirectory, MessagingGateway, TaskStore};

/// The closed set of tools the model may invoke. Unknown names fail typed at
/// the lookup, not in a default dispatch branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    CreateTask,
    CreateEvent,
    SearchContacts,
    SendMessage,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "create_task" => Some(ToolKind::CreateTask),
            "create_event" => Some(ToolKind::CreateEvent),
            "search_contacts" => Some(ToolKind::SearchContacts),
            "send_message" => Some(ToolKind::SendMessage),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::CreateTask => "create_task",
            ToolKind::CreateEvent => "create_event",
            ToolKind::SearchContacts => "search_contacts",
            ToolKind::SendMessage => "send_message",
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateTaskArgs {
    title: String,
    #[serde(default)]
    due: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateEventArgs {
    title: String,
    start: String,
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchContactsArgs {
    query: String,
}

#[derive(Debug, Deserialize)]
struct SendMessageArgs {
    to: String,
    body: String,
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: &Value) -> ToolResult<T> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| ToolError::InvalidParameters(e.to_string()))
}

fn parse_datetime(field: &str, raw: &str) -> ToolResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ToolError::InvalidParameters(format!("'{}' is not an RFC 3339 datetime: {}", field, e))
        })
}

/// Dispatch table over the domain services. Stateless itself; every side
/// effect happens inside a collaborator, attempted at most once per
/// invocation. Failures come back as values for the model to narrate.
pub struct ToolRegistry {
    tasks: Arc<dyn TaskStore>,
    calendar: Arc<dyn CalendarStore>,
    contacts: Arc<dyn ContactDirectory>,
    messaging: Option<Arc<dyn MessagingGateway>>,
}

impl ToolRegistry {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        calendar: Arc<dyn CalendarStore>,
        contacts: Arc<dyn ContactDirectory>,
        messaging: Option<Arc<dyn MessagingGateway>>,
    ) -> Self {
        Self {
            tasks,
            calendar,
            contacts,
            messaging,
        }
    }

    /// The tool definitions handed to the completion service
    pub fn tool_specs(&self) -> Vec<Tool> {
        vec![
            Tool::new(
                ToolKind::CreateTask.name(),
                "Create a to-do task for the user",
                json!({
                    "type": "object",
                    "required": ["title"],
                    "properties": {
                        "title": {"type": "string", "description": "Short task title"},
                        "due": {"type": "string", "description": "Optional due datetime, RFC 3339"},
                        "notes": {"type": "string", "description": "Optional free-form notes"}
                    }
                }),
            ),
            Tool::new(
                ToolKind::CreateEvent.name(),
                "Schedule a calendar event for the user",
                json!({
                    "type": "object",
                    "required": ["title", "start"],
                    "properties": {
                        "title": {"type": "string", "description": "Event title"},
                        "start": {"type": "string", "description": "Start datetime, RFC 3339"},
                        "end": {"type": "string", "description": "Optional end datetime, RFC 3339"},
                        "location": {"type": "string", "description": "Optional location"}
                    }
                }),
            ),
            Tool::new(
                ToolKind::SearchContacts.name(),
                "Search the user's contacts by free-text query over names and emails",
                json!({
                    "type": "object",
                    "required": ["query"],
                    "properties": {
                        "query": {"type": "string", "description": "Free-text search query"}
                    }
                }),
            ),
            Tool::new(
                ToolKind::SendMessage.name(),
                "Send a text message to a phone number or address on the user's behalf",
                json!({
                    "type": "object",
                    "required": ["to", "body"],
                    "properties": {
                        "to": {"type": "string", "description": "Recipient phone number or address"},
                        "body": {"type": "string", "description": "Message body"}
                    }
                }),
            ),
        ]
    }

    /// Execute one tool invocation on behalf of `user_id`. Never panics and
    /// never surfaces a process-level error: every failure is a ToolError
    /// value that the orchestrator feeds back to the model.
    pub async fn dispatch(&self, call: &ToolCall, user_id: &str) -> ToolResult<Value> {
        let kind = ToolKind::from_name(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        tracing::debug!(user_id, tool = kind.name(), "dispatching tool call");

        match kind {
            ToolKind::CreateTask => self.create_task(&call.arguments).await,
            ToolKind::CreateEvent => self.create_event(&call.arguments).await,
            ToolKind::SearchContacts => self.search_contacts(&call.arguments).await,
            ToolKind::SendMessage => self.send_message(&call.arguments).await,
        }
    }

    async fn create_task(&self, arguments: &Value) -> ToolResult<Value> {
        let args: CreateTaskArgs = parse_args(arguments)?;
        let due = args
            .due
            .as_deref()
            .map(|raw| parse_datetime("due", raw))
            .transpose()?;

        let task = self
            .tasks
            .create_task(&args.title, due, args.notes.as_deref())
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(json!({
            "task_id": task.id,
            "confirmation": format!("Created task \"{}\"", task.title),
        }))
    }

    async fn create_event(&self, arguments: &Value) -> ToolResult<Value> {
        let args: CreateEventArgs = parse_args(arguments)?;
        let start = parse_datetime("start", &args.start)?;
        let end = args
            .end
            .as_deref()
            .map(|raw| parse_datetime("end", raw))
            .transpose()?;

        let event = self
            .calendar
            .create_event(&args.title, start, end, args.location.as_deref())
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(json!({
            "event_id": event.id,
            "confirmation": format!(
                "Scheduled \"{}\" for {}",
                event.title,
                event.start.to_rfc3339()
            ),
        }))
    }

    async fn search_contacts(&self, arguments: &Value) -> ToolResult<Value> {
        let args: SearchContactsArgs = parse_args(arguments)?;
        let contacts = self
            .contacts
            .search(&args.query)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        let count = contacts.len();
        Ok(json!({
            "matches": contacts,
            "count": count,
        }))
    }

    async fn send_message(&self, arguments: &Value) -> ToolResult<Value> {
        // Detect an unconfigured gateway before parsing so the model gets a
        // clear explanation instead of a generic failure
        let gateway = self.messaging.as_ref().ok_or_else(|| {
            ToolError::Unavailable(
                "messaging gateway is not configured; ask the user to set one up".to_string(),
            )
        })?;

        let args: SendMessageArgs = parse_args(arguments)?;
        let receipt = gateway
            .send(&args.to, &args.body)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

        Ok(json!({
            "message_id": receipt.id,
            "confirmation": format!("Message sent to {}", receipt.to),
        }))
    }
}
