use crate::database::QueryFilter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of a chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    pub fn user(text: impl Into<String>) -> Self {
        SessionMessage {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        SessionMessage {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Turn history of one live chat connection. Never persisted and never shared.
#[derive(Debug, Clone)]
pub struct SessionContext {
    id: Uuid,
    scope: Option<QueryFilter>,
    messages: Vec<SessionMessage>,
}

impl SessionContext {
    pub fn new() -> Self {
        SessionContext {
            id: Uuid::new_v4(),
            scope: None,
            messages: Vec::new(),
        }
    }

    /// Restrict retrieval for this session to one document
    pub fn with_scope(mut self, document_id: impl Into<String>) -> Self {
        self.scope = Some(QueryFilter::document(document_id));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scope(&self) -> Option<&QueryFilter> {
        self.scope.as_ref()
    }

    pub fn append(&mut self, message: SessionMessage) {
        self.messages.push(message);
    }

    /// Messages in arrival order
    pub fn history(&self) -> &[SessionMessage] {
        &self.messages
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
