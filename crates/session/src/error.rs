use quill_client::ClientError;
use snafu::Snafu;

use crate::message::TurnRejection;

/// Errors surfaced by session orchestration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("failed to load history at {stage}: {source}"))]
    LoadHistory {
        stage: &'static str,
        source: ClientError,
    },

    #[snafu(display("failed to send turn at {stage}: {source}"))]
    SendTurn {
        stage: &'static str,
        source: ClientError,
    },

    #[snafu(display("failed to edit message at {stage}: {source}"))]
    EditMessage {
        stage: &'static str,
        source: ClientError,
    },

    #[snafu(display("failed to delete session at {stage}: {source}"))]
    DeleteSession {
        stage: &'static str,
        source: ClientError,
    },

    #[snafu(display("nothing to retry: no prior user message"))]
    NothingToRetry,

    #[snafu(display("turn transition rejected: {rejection:?}"))]
    TurnRejected { rejection: TurnRejection },
}

pub type SessionResult<T> = Result<T, SessionError>;
