//! Domain collaborators the tools act against. Each service exposes a narrow
//! create/search operation; concurrency control is the service's own
//! responsibility. In-memory implementations back the tests and any
//! deployment that does not wire in real stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub due: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: Uuid,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub id: Uuid,
    pub to: String,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(
        &self,
        title: &str,
        due: Option<DateTime<Utc>>,
        notes: Option<&str>,
    ) -> anyhow::Result<Task>;
}

#[async_trait]
pub trait CalendarStore: Send + Sync {
    async fn create_event(
        &self,
        title: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        location: Option<&str>,
    ) -> anyhow::Result<CalendarEvent>;
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<Contact>>;
}

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> anyhow::Result<MessageReceipt>;
}

#[derive(Default)]
pub struct InMemoryTasks {
    tasks: Mutex<Vec<Task>>,
}

impl InMemoryTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().await.clone()
    }
}

#[async_trait]
impl TaskStore for InMemoryTasks {
    async fn create_task(
        &self,
        title: &str,
        due: Option<DateTime<Utc>>,
        notes: Option<&str>,
    ) -> anyhow::Result<Task> {
        let task = Task {
            id: Uuid::new_v4(),
            title: title.to_string(),
            due,
            notes: notes.map(str::to_string),
            created_at: Utc::now(),
        };
        self.tasks.lock().await.push(task.clone());
        Ok(task)
    }
}

#[derive(Default)]
pub struct InMemoryCalendar {
    events: Mutex<Vec<CalendarEvent>>,
}

impl InMemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<CalendarEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl CalendarStore for InMemoryCalendar {
    async fn create_event(
        &self,
        title: &str,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        location: Option<&str>,
    ) -> anyhow::Result<CalendarEvent> {
        let event = CalendarEvent {
            id: Uuid::new_v4(),
            title: title.to_string(),
            start,
            end,
            location: location.map(str::to_string),
        };
        self.events.lock().await.push(event.clone());
        Ok(event)
    }
}

#[derive(Default)]
pub struct InMemoryContacts {
    contacts: Vec<Contact>,
}

impl InMemoryContacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contacts(contacts: Vec<Contact>) -> Self {
        Self { contacts }
    }
}

#[async_trait]
impl ContactDirectory for InMemoryContacts {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<Contact>> {
        let needle = query.to_lowercase();
        Ok(self
            .contacts
            .iter()
            .filter(|c| {
                c.name.to_lowercase().contains(&needle)
                    || c.email
                        .as_deref()
                        .is_some_and(|e| e.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }
}

/// Records sent messages instead of placing them, for tests and dry runs
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send(&self, to: &str, body: &str) -> anyhow::Result<MessageReceipt> {
        self.sent
            .lock()
            .await
            .push((to.to_string(), body.to_string()));
        Ok(MessageReceipt {
            id: Uuid::new_v4(),
            to: to.to_string(),
        })
    }
}
