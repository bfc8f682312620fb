use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outgoing body for one user turn.
///
/// `file_names`, when present, must pair one-to-one with `images`; the
/// backend rejects mismatched lengths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnRequest {
    pub user_id: u64,
    pub session_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_names: Vec<String>,
}

impl TurnRequest {
    pub fn new(user_id: u64, session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id,
            session_id: session_id.into(),
            message: message.into(),
            images: Vec::new(),
            file_names: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn with_file_names(mut self, file_names: Vec<String>) -> Self {
        self.file_names = file_names;
        self
    }
}

/// One persisted message as the history endpoint reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub thought: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub images: Vec<String>,
}

/// One page of persisted history, oldest→newest within the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub has_more: bool,
}

/// Read-only session metadata owned by the session-list collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub last_update_time: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub first_message: String,
    #[serde(default)]
    pub message_count: usize,
}

impl SessionSummary {
    /// Title has arrived once the server-generated field is non-empty.
    pub fn has_title(&self) -> bool {
        !self.title.trim().is_empty()
    }
}

/// Request body for editing a past user message into a forked session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditRequest {
    pub user_id: u64,
    pub message_id: String,
    pub new_content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_names: Vec<String>,
}

/// Fork produced by an edit: the server replays history up to the edited
/// message into a fresh session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EditOutcome {
    pub new_session_id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub edited_from_message_id: String,
}
