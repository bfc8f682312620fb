use chrono::{DateTime, Utc};
use quill_client::HistoryMessage;
use uuid::Uuid;

/// Opaque identifier for one message, unique within a session's loaded
/// window. Server-assigned ids are kept verbatim; locally created messages
/// mint their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Mints a fresh local identifier.
    pub fn mint() -> Self {
        Self(format!("msg-{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Stable identifier for one conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Generates an identifier for a session that does not exist server-side
    /// yet; the backend creates it on the first turn.
    pub fn generate() -> Self {
        Self(format!("session-{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Monotonic identifier for one streamed turn.
///
/// This must change on every submit/retry so stale stream events can be
/// rejected after cancellation or a session switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

impl TurnId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Maps a persisted role string; unknown roles render as assistant
    /// output rather than being dropped.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("user") {
            Self::User
        } else {
            Self::Assistant
        }
    }
}

/// Unit of conversation shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub thought: Option<String>,
    pub author: Option<String>,
    pub images: Vec<String>,
    pub is_streaming: bool,
    pub is_error: bool,
    pub timestamp: DateTime<Utc>,
}

impl DisplayMessage {
    /// Creates the user's own turn, appended synchronously on submit.
    pub fn user(content: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            id: MessageId::mint(),
            role: Role::User,
            content: content.into(),
            thought: None,
            author: None,
            images,
            is_streaming: false,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    /// Creates a streaming assistant block seeded from the first delta of a
    /// new author turn.
    pub fn assistant_streaming(
        author: Option<String>,
        content: String,
        thought: Option<String>,
    ) -> Self {
        Self {
            id: MessageId::mint(),
            role: Role::Assistant,
            content,
            thought,
            author,
            images: Vec::new(),
            is_streaming: true,
            is_error: false,
            timestamp: Utc::now(),
        }
    }

    /// Creates a terminal error block in place of agent output.
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            id: MessageId::mint(),
            role: Role::Assistant,
            content: detail.into(),
            thought: None,
            author: None,
            images: Vec::new(),
            is_streaming: false,
            is_error: true,
            timestamp: Utc::now(),
        }
    }

    /// Rehydrates one persisted history entry.
    pub fn from_history(record: HistoryMessage) -> Self {
        Self {
            id: MessageId::new(record.id),
            role: Role::parse(&record.role),
            content: record.content,
            thought: record.thought.filter(|thought| !thought.is_empty()),
            author: None,
            images: record.images,
            is_streaming: false,
            is_error: false,
            timestamp: record.timestamp,
        }
    }
}

/// The contiguous, loaded subset of a session's full history.
///
/// Streaming appends at the tail; pagination prepends at the head. The two
/// never touch each other's region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWindow {
    pub session_id: SessionId,
    pub messages: Vec<DisplayMessage>,
    pub has_more: bool,
    pub total_count: usize,
}

impl SessionWindow {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            messages: Vec::new(),
            has_more: false,
            total_count: 0,
        }
    }

    /// Appends at the tail, clamping the timestamp so display order stays
    /// monotonically non-decreasing.
    pub fn push(&mut self, mut message: DisplayMessage) {
        if let Some(last) = self.messages.last()
            && message.timestamp < last.timestamp
        {
            message.timestamp = last.timestamp;
        }
        self.messages.push(message);
    }

    /// Prepends one older page without reordering already-loaded entries.
    ///
    /// Entries whose id is already present are skipped, so a duplicated
    /// load of the same page cannot duplicate a message. Returns how many
    /// messages were actually inserted.
    pub fn prepend(&mut self, older: Vec<DisplayMessage>) -> usize {
        let fresh: Vec<DisplayMessage> = older
            .into_iter()
            .filter(|candidate| !self.contains(&candidate.id))
            .collect();
        let added = fresh.len();
        if added > 0 {
            self.messages.splice(0..0, fresh);
        }
        added
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|message| &message.id == id)
    }

    /// The trailing message, when it is an assistant block still receiving
    /// deltas.
    pub fn open_assistant_mut(&mut self) -> Option<&mut DisplayMessage> {
        self.messages
            .last_mut()
            .filter(|message| message.role == Role::Assistant && message.is_streaming)
    }

    /// Clears every streaming flag; called on any turn end.
    pub fn clear_streaming(&mut self) {
        for message in &mut self.messages {
            message.is_streaming = false;
        }
    }

    /// Most recent user turn, used for retry-by-resend.
    pub fn last_user_message(&self) -> Option<&DisplayMessage> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
    }

    pub fn user_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.role == Role::User)
            .count()
    }

    /// Removes a trailing error block so retries don't accumulate stale
    /// error bubbles.
    pub fn pop_trailing_error(&mut self) -> Option<DisplayMessage> {
        if self.messages.last().is_some_and(|message| message.is_error) {
            self.messages.pop()
        } else {
            None
        }
    }
}

/// Turn lifecycle state for one session view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    /// Request issued, no stream event applied yet.
    Sending(TurnId),
    /// At least one stream event has been applied.
    Streaming(TurnId),
    /// Last turn ended in a visible error.
    Errored { turn: TurnId, message: String },
    /// Last turn was cancelled by the user.
    Cancelled(TurnId),
}

/// State transition input for the turn lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTransition {
    Begin(TurnId),
    StreamOpened(TurnId),
    Complete(TurnId),
    Fail { turn: TurnId, message: String },
    Cancel(TurnId),
    ResetToIdle,
}

/// Rejection reason for illegal turn transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnRejection {
    AlreadyActive { active: TurnId, attempted: TurnId },
    NoActiveTurn,
    TurnMismatch { active: TurnId, attempted: TurnId },
}

pub type TurnTransitionResult = Result<TurnState, TurnRejection>;

impl TurnState {
    /// Identifier of the in-flight turn, if any.
    pub fn active_turn(&self) -> Option<TurnId> {
        match self {
            Self::Sending(turn) | Self::Streaming(turn) => Some(*turn),
            Self::Idle | Self::Errored { .. } | Self::Cancelled(_) => None,
        }
    }

    /// True when stream data for the given turn should still be applied.
    pub fn accepts(&self, turn: TurnId) -> bool {
        self.active_turn() == Some(turn)
    }

    /// Applies one transition deterministically.
    ///
    /// Any terminal transition must name the currently active turn exactly;
    /// non-active states may begin a new turn directly.
    pub fn apply(&self, transition: TurnTransition) -> TurnTransitionResult {
        match transition {
            TurnTransition::Begin(turn) => match self.active_turn() {
                Some(active) if active != turn => Err(TurnRejection::AlreadyActive {
                    active,
                    attempted: turn,
                }),
                Some(_) => Ok(self.clone()),
                None => Ok(Self::Sending(turn)),
            },
            TurnTransition::StreamOpened(turn) => match self {
                Self::Sending(active) | Self::Streaming(active) if *active == turn => {
                    Ok(Self::Streaming(turn))
                }
                _ => self.reject(turn),
            },
            TurnTransition::Complete(turn) => match self.active_turn() {
                Some(active) if active == turn => Ok(Self::Idle),
                _ => self.reject(turn),
            },
            TurnTransition::Fail { turn, message } => match self.active_turn() {
                Some(active) if active == turn => Ok(Self::Errored { turn, message }),
                _ => self.reject(turn),
            },
            TurnTransition::Cancel(turn) => match self.active_turn() {
                Some(active) if active == turn => Ok(Self::Cancelled(turn)),
                _ => self.reject(turn),
            },
            TurnTransition::ResetToIdle => Ok(Self::Idle),
        }
    }

    fn reject(&self, attempted: TurnId) -> TurnTransitionResult {
        match self.active_turn() {
            Some(active) => Err(TurnRejection::TurnMismatch { active, attempted }),
            None => Err(TurnRejection::NoActiveTurn),
        }
    }
}
