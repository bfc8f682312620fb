//! Session core for a streaming chat client.
//!
//! Ties the protocol layer ([`quill_protocol`]) and the backend collaborator
//! ([`quill_client`]) together: message assembly from stream deltas, history
//! pagination, scroll anchoring, and the turn lifecycle.

pub mod assembler;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod pagination;
pub mod scroll;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;

pub use assembler::{MergedMessage, TurnOutcome, apply_event, finalize, merged_assistant_view};
pub use error::{SessionError, SessionResult};
pub use message::{
    DisplayMessage, MessageId, Role, SessionId, SessionWindow, TurnId, TurnRejection, TurnState,
    TurnTransition,
};
pub use orchestrator::{SessionController, TitlePoll, TurnHandle, TurnUpdate};
pub use pagination::{Paginator, PrependedPage};
pub use scroll::{ScrollModel, ScrollSample};
pub use settings::{ClientSettings, SettingsError, SettingsStore};
