//! Turn orchestration: one user submit becomes a streamed turn whose events
//! flow through the protocol decoder into the session window.
//!
//! The controller owns all session state and applies updates synchronously;
//! I/O runs in detached worker futures that report back over a channel, so a
//! cancelled or stale turn can never mutate the window.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use quill_client::{BoxFuture, ChatApi, EditRequest, TurnByteStream, TurnRequest};
use quill_protocol::{EventInterpreter, LineDecoder, StreamEvent};
use snafu::ResultExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::assembler::{self, TurnOutcome};
use crate::error::{
    DeleteSessionSnafu, EditMessageSnafu, NothingToRetrySnafu, SendTurnSnafu, SessionResult,
    TurnRejectedSnafu,
};
use crate::message::{
    DisplayMessage, MessageId, SessionId, SessionWindow, TurnId, TurnState, TurnTransition,
};
use crate::pagination::{Paginator, PrependedPage};
use crate::scroll::ScrollModel;
use crate::settings::ClientSettings;

/// One update produced by a turn's stream worker.
#[derive(Debug)]
pub enum TurnUpdate {
    /// A decoded protocol event.
    Protocol(StreamEvent),
    /// The transport failed mid-stream.
    TransportFailed(String),
    /// The user cancelled the turn.
    Cancelled,
    /// The stream ended without an explicit stop event.
    Closed,
}

/// Live handles for one in-flight turn.
///
/// `worker` must be polled (spawned, or joined against the event loop) for
/// `events` to produce anything. `title_poll` is present only on a session's
/// first turn; take it before driving if the generated title is wanted.
pub struct TurnHandle {
    pub turn_id: TurnId,
    pub events: mpsc::UnboundedReceiver<TurnUpdate>,
    pub worker: BoxFuture<'static, ()>,
    pub title_poll: Option<TitlePoll>,
}

impl fmt::Debug for TurnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnHandle")
            .field("turn_id", &self.turn_id)
            .field("title_poll", &self.title_poll.is_some())
            .finish_non_exhaustive()
    }
}

/// Background poll that resolves once the backend has generated a session
/// title, or `None` on timeout/cancellation.
pub struct TitlePoll {
    pub worker: BoxFuture<'static, Option<String>>,
}

/// Pipes raw response bytes through the line decoder and event interpreter,
/// forwarding every decoded event. Returns after a stop or error event, a
/// transport failure, stream end, or cancellation.
fn stream_worker(
    mut bytes: TurnByteStream,
    updates: mpsc::UnboundedSender<TurnUpdate>,
    mut cancel: oneshot::Receiver<()>,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let mut decoder = LineDecoder::new();
        let mut interpreter = EventInterpreter::new();
        let mut cancel_open = true;

        loop {
            // Cancellation wins over ready chunks: bytes buffered after the
            // signal fires are discarded, not applied.
            tokio::select! {
                biased;
                cancelled = &mut cancel, if cancel_open => {
                    cancel_open = false;
                    if cancelled.is_ok() {
                        let _ = updates.send(TurnUpdate::Cancelled);
                        return;
                    }
                    // Canceller dropped without firing: keep streaming.
                }
                chunk = bytes.next() => {
                    match chunk {
                        Some(Ok(chunk)) => {
                            for line in decoder.push(&chunk) {
                                let Some(event) = interpreter.interpret(&line) else {
                                    continue;
                                };
                                let terminal = matches!(
                                    event,
                                    StreamEvent::Stop | StreamEvent::Error { .. }
                                );
                                if updates.send(TurnUpdate::Protocol(event)).is_err() {
                                    return;
                                }
                                if terminal {
                                    return;
                                }
                            }
                        }
                        Some(Err(error)) => {
                            let _ = updates.send(TurnUpdate::TransportFailed(error.to_string()));
                            return;
                        }
                        None => {
                            decoder.finish();
                            return;
                        }
                    }
                }
            }
        }
    })
}

/// Polls the session list until this session carries a non-empty title.
fn title_poll_worker(
    api: Arc<dyn ChatApi>,
    session_id: SessionId,
    interval: Duration,
    max_attempts: u32,
    mut cancel: oneshot::Receiver<()>,
) -> BoxFuture<'static, Option<String>> {
    Box::pin(async move {
        let mut cancel_open = true;
        let mut attempts = 0;
        while attempts < max_attempts {
            tokio::select! {
                cancelled = &mut cancel, if cancel_open => {
                    cancel_open = false;
                    if cancelled.is_ok() {
                        debug!(session = %session_id, "title poll cancelled");
                        return None;
                    }
                    continue;
                }
                _ = tokio::time::sleep(interval) => {}
            }
            attempts += 1;

            match api.list_sessions().await {
                Ok(sessions) => {
                    let found = sessions.into_iter().find(|summary| {
                        summary.session_id == session_id.as_str() && summary.has_title()
                    });
                    if let Some(summary) = found {
                        debug!(session = %session_id, attempts, "session title arrived");
                        return Some(summary.title);
                    }
                }
                Err(error) => {
                    warn!(session = %session_id, attempts, error = %error, "title poll request failed");
                }
            }
        }
        debug!(session = %session_id, attempts, "gave up waiting for session title");
        None
    })
}

/// Owns one session view: its message window, turn lifecycle, pagination and
/// scroll state.
pub struct SessionController {
    api: Arc<dyn ChatApi>,
    settings: Arc<ClientSettings>,
    window: SessionWindow,
    turn_state: TurnState,
    paginator: Paginator,
    scroll: ScrollModel,
    session_title: Option<String>,
    next_turn: u64,
    stream_cancel: Option<oneshot::Sender<()>>,
    title_cancel: Option<oneshot::Sender<()>>,
}

impl SessionController {
    /// Opens a fresh session; the backend creates it on the first turn.
    pub fn new(api: Arc<dyn ChatApi>, settings: Arc<ClientSettings>) -> Self {
        let paginator = Paginator::new(settings.history_page_size);
        Self {
            api,
            settings,
            window: SessionWindow::new(SessionId::generate()),
            turn_state: TurnState::Idle,
            paginator,
            scroll: ScrollModel::new(),
            session_title: None,
            next_turn: 1,
            stream_cancel: None,
            title_cancel: None,
        }
    }

    pub fn window(&self) -> &SessionWindow {
        &self.window
    }

    pub fn turn_state(&self) -> &TurnState {
        &self.turn_state
    }

    pub fn scroll(&mut self) -> &mut ScrollModel {
        &mut self.scroll
    }

    pub fn title(&self) -> Option<&str> {
        self.session_title.as_deref()
    }

    /// Applies a title produced by a [`TitlePoll`] worker.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.session_title = Some(title.into());
    }

    /// Submits a user turn, or retries the last one when the draft is empty
    /// and carries no attachments.
    ///
    /// A retry removes a trailing error block and resends the last user
    /// message without appending a new one.
    pub async fn submit(
        &mut self,
        draft: &str,
        images: Vec<String>,
        file_names: Vec<String>,
    ) -> SessionResult<TurnHandle> {
        let is_retry = draft.trim().is_empty() && images.is_empty();
        let (message, images, file_names) = if is_retry {
            self.window.pop_trailing_error();
            let last = self
                .window
                .last_user_message()
                .cloned()
                .ok_or_else(|| NothingToRetrySnafu.build())?;
            (last.content, last.images, Vec::new())
        } else {
            (draft.trim().to_string(), images, file_names)
        };

        let turn = TurnId::new(self.next_turn);
        self.next_turn += 1;
        self.turn_state = self
            .turn_state
            .apply(TurnTransition::Begin(turn))
            .map_err(|rejection| TurnRejectedSnafu { rejection }.build())?;

        let first_turn = !is_retry && self.window.user_message_count() == 0;
        if !is_retry {
            self.window
                .push(DisplayMessage::user(message.clone(), images.clone()));
        }

        let request = TurnRequest::new(
            self.settings.user_id,
            self.window.session_id.as_str(),
            message,
        )
        .with_images(images)
        .with_file_names(file_names);

        debug!(session = %self.window.session_id, ?turn, retry = is_retry, "sending turn");
        let bytes = match self.api.send_turn(request).await {
            Ok(bytes) => bytes,
            Err(source) => {
                self.finish(turn, TurnOutcome::Failed {
                    message: source.to_string(),
                });
                return Err(source).context(SendTurnSnafu { stage: "open-stream" });
            }
        };

        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.stream_cancel = Some(cancel_tx);

        let title_poll = first_turn.then(|| {
            let (title_cancel_tx, title_cancel_rx) = oneshot::channel();
            self.title_cancel = Some(title_cancel_tx);
            TitlePoll {
                worker: title_poll_worker(
                    Arc::clone(&self.api),
                    self.window.session_id.clone(),
                    self.settings.title_poll_interval(),
                    self.settings.title_poll_max_attempts,
                    title_cancel_rx,
                ),
            }
        });

        Ok(TurnHandle {
            turn_id: turn,
            events: updates_rx,
            worker: stream_worker(bytes, updates_tx, cancel_rx),
            title_poll,
        })
    }

    /// Applies one stream update. Returns the turn outcome once the update
    /// is terminal; updates for stale turns are dropped.
    pub fn apply(&mut self, turn: TurnId, update: TurnUpdate) -> Option<TurnOutcome> {
        if !self.turn_state.accepts(turn) {
            debug!(?turn, "dropping update for stale turn");
            return None;
        }

        match update {
            TurnUpdate::Protocol(StreamEvent::Heartbeat) => {
                trace!(?turn, "heartbeat");
                None
            }
            TurnUpdate::Protocol(StreamEvent::Stop) => {
                Some(self.finish(turn, TurnOutcome::Completed))
            }
            TurnUpdate::Protocol(StreamEvent::Error { message }) => {
                Some(self.finish(turn, TurnOutcome::Failed { message }))
            }
            TurnUpdate::Protocol(event) => {
                if let Ok(state) = self.turn_state.apply(TurnTransition::StreamOpened(turn)) {
                    self.turn_state = state;
                }
                assembler::apply_event(&mut self.window, event);
                None
            }
            TurnUpdate::TransportFailed(message) => {
                Some(self.finish(turn, TurnOutcome::Failed { message }))
            }
            TurnUpdate::Cancelled => Some(self.finish(turn, TurnOutcome::Cancelled)),
            TurnUpdate::Closed => Some(self.finish(turn, TurnOutcome::Completed)),
        }
    }

    /// Runs a turn to completion, applying every update as it arrives.
    pub async fn drive_turn(&mut self, handle: TurnHandle) -> TurnOutcome {
        let TurnHandle {
            turn_id,
            mut events,
            worker,
            ..
        } = handle;

        let apply_loop = async {
            loop {
                match events.recv().await {
                    Some(update) => {
                        if let Some(outcome) = self.apply(turn_id, update) {
                            break outcome;
                        }
                    }
                    None => {
                        break self
                            .apply(turn_id, TurnUpdate::Closed)
                            .unwrap_or(TurnOutcome::Completed);
                    }
                }
            }
        };
        let (_, outcome) = tokio::join!(worker, apply_loop);
        outcome
    }

    /// Requests cancellation of the in-flight turn and its title poll.
    pub fn cancel_turn(&mut self) {
        if let Some(cancel) = self.stream_cancel.take() {
            let _ = cancel.send(());
        }
        self.cancel_title_poll();
    }

    /// Loads one older history page when the viewport is near the top.
    ///
    /// When a page was fetched the scroll anchor is armed; report the
    /// post-layout extent via [`ScrollModel::commit_prepend`] to keep the
    /// view steady. A no-op load leaves the anchor alone.
    pub async fn maybe_load_older(&mut self) -> SessionResult<Option<PrependedPage>> {
        if !self.scroll.should_load_older() {
            return Ok(None);
        }
        let page = self
            .paginator
            .load_older(self.api.as_ref(), &mut self.window)
            .await?;
        if page.is_some() {
            self.scroll.begin_prepend();
        }
        Ok(page)
    }

    /// Abandons the current session view and loads another session's newest
    /// history page. Any in-flight turn is cancelled.
    pub async fn switch_session(&mut self, session_id: SessionId) -> SessionResult<()> {
        self.cancel_turn();
        self.turn_state = TurnState::Idle;
        self.window = SessionWindow::new(session_id);
        self.session_title = None;
        self.paginator.reset();
        self.scroll.reset();
        self.paginator
            .load_initial(self.api.as_ref(), &mut self.window)
            .await
    }

    /// Edits a past user message: the backend forks the session at that
    /// message, and the edited content is sent as the fork's next turn.
    pub async fn edit_message(
        &mut self,
        message_id: &MessageId,
        new_content: impl Into<String>,
        images: Vec<String>,
        file_names: Vec<String>,
    ) -> SessionResult<TurnHandle> {
        let new_content = new_content.into();
        let request = EditRequest {
            user_id: self.settings.user_id,
            message_id: message_id.to_string(),
            new_content: new_content.clone(),
            images: images.clone(),
            file_names: file_names.clone(),
        };

        let fork = self
            .api
            .edit_message(self.window.session_id.as_str(), request)
            .await
            .context(EditMessageSnafu { stage: "fork" })?;
        debug!(from = %self.window.session_id, to = %fork.new_session_id, "session forked by edit");

        self.switch_session(SessionId::new(fork.new_session_id)).await?;
        self.submit(&new_content, images, file_names).await
    }

    /// Deletes a session on the backend.
    pub async fn delete_session(&self, session_id: &SessionId) -> SessionResult<()> {
        self.api
            .delete_session(session_id.as_str())
            .await
            .context(DeleteSessionSnafu { stage: "delete" })
    }

    fn finish(&mut self, turn: TurnId, outcome: TurnOutcome) -> TurnOutcome {
        let transition = match &outcome {
            TurnOutcome::Completed => TurnTransition::Complete(turn),
            TurnOutcome::Failed { message } => TurnTransition::Fail {
                turn,
                message: message.clone(),
            },
            TurnOutcome::Cancelled => TurnTransition::Cancel(turn),
        };
        match self.turn_state.apply(transition) {
            Ok(state) => self.turn_state = state,
            Err(rejection) => warn!(?rejection, "turn transition rejected"),
        }

        assembler::finalize(&mut self.window, &outcome);
        self.stream_cancel = None;
        if !matches!(outcome, TurnOutcome::Completed) {
            self.cancel_title_poll();
        }
        outcome
    }

    fn cancel_title_poll(&mut self) {
        if let Some(cancel) = self.title_cancel.take() {
            let _ = cancel.send(());
        }
    }
}
