/// Transport error taxonomy for the backend collaborator surface.
pub mod error;
/// reqwest-backed implementation of [`ChatApi`].
pub mod http;
/// Wire shapes consumed from and produced for the backend.
pub mod types;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::BoxStream;

pub use error::{ClientError, ClientResult};
pub use http::{ApiConfig, HttpChatApi};
pub use types::{
    EditOutcome, EditRequest, HistoryMessage, HistoryPage, SessionSummary, TurnRequest,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw response body of a streamed turn, chunked at transport boundaries.
pub type TurnByteStream = BoxStream<'static, ClientResult<Bytes>>;

/// Backend collaborator surface consumed by the session core.
///
/// Everything here is plain request/response plumbing; streaming semantics
/// live entirely in the caller, which feeds [`TurnByteStream`] chunks into
/// the protocol decoder. Dropping the stream aborts the in-flight request.
pub trait ChatApi: Send + Sync {
    /// Sends one user turn and returns the streamed response body.
    fn send_turn<'a>(&'a self, request: TurnRequest) -> BoxFuture<'a, ClientResult<TurnByteStream>>;

    /// Fetches one page of persisted history for a session.
    fn fetch_history<'a>(
        &'a self,
        session_id: &'a str,
        limit: usize,
        offset: usize,
    ) -> BoxFuture<'a, ClientResult<HistoryPage>>;

    /// Lists the caller's sessions, newest metadata included.
    fn list_sessions<'a>(&'a self) -> BoxFuture<'a, ClientResult<Vec<SessionSummary>>>;

    /// Persists an edited copy of a past user message, forking the session.
    fn edit_message<'a>(
        &'a self,
        session_id: &'a str,
        request: EditRequest,
    ) -> BoxFuture<'a, ClientResult<EditOutcome>>;

    /// Deletes one session.
    fn delete_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, ClientResult<()>>;
}
