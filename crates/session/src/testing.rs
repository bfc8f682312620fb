//! Scripted `ChatApi` double for state-machine tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use quill_client::{
    BoxFuture, ChatApi, ClientError, ClientResult, EditOutcome, EditRequest, HistoryPage,
    SessionSummary, TurnByteStream, TurnRequest,
};

#[derive(Debug)]
enum TurnScript {
    /// Stream these chunks, then end the stream.
    Chunks(Vec<Bytes>),
    /// Stream these chunks, then hang until the consumer gives up.
    ChunksThenHang(Vec<Bytes>),
    /// Fail the send_turn request itself.
    RequestFailure(String),
}

/// Queue-driven `ChatApi` where each call consumes the next scripted
/// response. Unscripted calls get an empty/failed default.
#[derive(Debug, Default)]
pub(crate) struct ScriptedApi {
    turns: Mutex<VecDeque<TurnScript>>,
    turn_requests: Mutex<Vec<TurnRequest>>,
    history: Mutex<VecDeque<Result<HistoryPage, String>>>,
    history_calls: Mutex<Vec<(usize, usize)>>,
    sessions: Mutex<VecDeque<Vec<SessionSummary>>>,
    session_list_calls: Mutex<usize>,
    edits: Mutex<VecDeque<EditOutcome>>,
    edit_requests: Mutex<Vec<EditRequest>>,
    deleted: Mutex<Vec<String>>,
}

impl ScriptedApi {
    /// Scripts one turn whose response body is the given SSE text.
    pub fn with_turn_body(self, body: &str) -> Self {
        self.turns
            .lock()
            .unwrap()
            .push_back(TurnScript::Chunks(vec![Bytes::copy_from_slice(
                body.as_bytes(),
            )]));
        self
    }

    /// Scripts one turn split into the given raw chunks.
    pub fn with_turn_chunks(self, chunks: Vec<&str>) -> Self {
        self.turns.lock().unwrap().push_back(TurnScript::Chunks(
            chunks
                .into_iter()
                .map(|chunk| Bytes::copy_from_slice(chunk.as_bytes()))
                .collect(),
        ));
        self
    }

    /// Scripts one turn that streams the given text and then never ends.
    pub fn with_hanging_turn(self, body: &str) -> Self {
        self.turns
            .lock()
            .unwrap()
            .push_back(TurnScript::ChunksThenHang(vec![Bytes::copy_from_slice(
                body.as_bytes(),
            )]));
        self
    }

    /// Scripts one turn whose request fails outright.
    pub fn with_turn_failure(self, message: &str) -> Self {
        self.turns
            .lock()
            .unwrap()
            .push_back(TurnScript::RequestFailure(message.to_string()));
        self
    }

    pub fn with_history_page(self, page: HistoryPage) -> Self {
        self.history.lock().unwrap().push_back(Ok(page));
        self
    }

    pub fn with_history_failure(self, message: &str) -> Self {
        self.history
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
        self
    }

    pub fn with_sessions(self, sessions: Vec<SessionSummary>) -> Self {
        self.push_sessions(sessions);
        self
    }

    /// Scripts a session-list response after construction.
    pub fn push_sessions(&self, sessions: Vec<SessionSummary>) {
        self.sessions.lock().unwrap().push_back(sessions);
    }

    pub fn with_edit_outcome(self, outcome: EditOutcome) -> Self {
        self.edits.lock().unwrap().push_back(outcome);
        self
    }

    /// Turn requests received so far.
    pub fn turn_requests(&self) -> Vec<TurnRequest> {
        self.turn_requests.lock().unwrap().clone()
    }

    /// (limit, offset) pairs of history calls received so far.
    pub fn history_calls(&self) -> Vec<(usize, usize)> {
        self.history_calls.lock().unwrap().clone()
    }

    pub fn session_list_calls(&self) -> usize {
        *self.session_list_calls.lock().unwrap()
    }

    pub fn edit_requests(&self) -> Vec<EditRequest> {
        self.edit_requests.lock().unwrap().clone()
    }

    pub fn deleted_sessions(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn scripted_failure(stage: &'static str, message: String) -> ClientError {
        ClientError::UnexpectedStatus {
            stage,
            status: 500,
            body: message,
        }
    }
}

impl ChatApi for ScriptedApi {
    fn send_turn<'a>(
        &'a self,
        request: TurnRequest,
    ) -> BoxFuture<'a, ClientResult<TurnByteStream>> {
        self.turn_requests.lock().unwrap().push(request);
        let script = self.turns.lock().unwrap().pop_front();
        Box::pin(async move {
            match script {
                Some(TurnScript::Chunks(chunks)) => {
                    Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
                }
                Some(TurnScript::ChunksThenHang(chunks)) => {
                    Ok(stream::iter(chunks.into_iter().map(Ok))
                        .chain(stream::pending())
                        .boxed())
                }
                Some(TurnScript::RequestFailure(message)) => {
                    Err(Self::scripted_failure("send_turn", message))
                }
                None => Ok(stream::empty().boxed()),
            }
        })
    }

    fn fetch_history<'a>(
        &'a self,
        _session_id: &'a str,
        limit: usize,
        offset: usize,
    ) -> BoxFuture<'a, ClientResult<HistoryPage>> {
        self.history_calls.lock().unwrap().push((limit, offset));
        let scripted = self.history.lock().unwrap().pop_front();
        Box::pin(async move {
            match scripted {
                Some(Ok(page)) => Ok(page),
                Some(Err(message)) => Err(Self::scripted_failure("fetch_history", message)),
                None => Ok(HistoryPage::default()),
            }
        })
    }

    fn list_sessions<'a>(&'a self) -> BoxFuture<'a, ClientResult<Vec<SessionSummary>>> {
        *self.session_list_calls.lock().unwrap() += 1;
        let scripted = self.sessions.lock().unwrap().pop_front();
        Box::pin(async move { Ok(scripted.unwrap_or_default()) })
    }

    fn edit_message<'a>(
        &'a self,
        _session_id: &'a str,
        request: EditRequest,
    ) -> BoxFuture<'a, ClientResult<EditOutcome>> {
        self.edit_requests.lock().unwrap().push(request);
        let scripted = self.edits.lock().unwrap().pop_front();
        Box::pin(async move {
            scripted.ok_or_else(|| {
                Self::scripted_failure("edit_message", "no edit scripted".to_string())
            })
        })
    }

    fn delete_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, ClientResult<()>> {
        self.deleted.lock().unwrap().push(session_id.to_string());
        Box::pin(async move { Ok(()) })
    }
}
