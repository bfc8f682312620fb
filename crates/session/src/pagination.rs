//! Offset pagination over persisted history.
//!
//! Offsets count back from the newest message, so the next older page always
//! starts at the number of messages already loaded. Pages arrive in
//! chronological order and are prepended ahead of the loaded window.

use quill_client::ChatApi;
use snafu::ResultExt;
use tracing::{debug, warn};

use crate::error::{LoadHistorySnafu, SessionResult};
use crate::message::{DisplayMessage, SessionWindow};

/// Result of one older-page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrependedPage {
    /// Messages actually inserted after id dedup.
    pub added: usize,
}

/// History pagination state for one session window.
#[derive(Debug)]
pub struct Paginator {
    page_size: usize,
    initial_loaded: bool,
    loading_older: bool,
}

impl Paginator {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            initial_loaded: false,
            loading_older: false,
        }
    }

    /// True while an older-page request is in flight.
    pub fn is_loading_older(&self) -> bool {
        self.loading_older
    }

    /// Forgets all pagination progress; call when switching sessions.
    pub fn reset(&mut self) {
        self.initial_loaded = false;
        self.loading_older = false;
    }

    /// Loads the newest page into an empty window.
    pub async fn load_initial(
        &mut self,
        api: &dyn ChatApi,
        window: &mut SessionWindow,
    ) -> SessionResult<()> {
        let page = api
            .fetch_history(window.session_id.as_str(), self.page_size, 0)
            .await
            .context(LoadHistorySnafu { stage: "initial" })?;

        window.messages = page
            .messages
            .into_iter()
            .map(DisplayMessage::from_history)
            .collect();
        window.has_more = page.has_more;
        window.total_count = page.total;
        self.initial_loaded = true;
        self.loading_older = false;

        debug!(
            session = %window.session_id,
            loaded = window.messages.len(),
            total = window.total_count,
            "loaded initial history page"
        );
        Ok(())
    }

    /// Loads the next older page and prepends it, keeping existing order.
    ///
    /// A no-op unless the initial page is in, more history exists, and no
    /// older-page request is already running.
    pub async fn load_older(
        &mut self,
        api: &dyn ChatApi,
        window: &mut SessionWindow,
    ) -> SessionResult<Option<PrependedPage>> {
        if !self.initial_loaded || !window.has_more || self.loading_older {
            return Ok(None);
        }

        self.loading_older = true;
        let offset = window.messages.len();
        let result = api
            .fetch_history(window.session_id.as_str(), self.page_size, offset)
            .await;
        self.loading_older = false;

        let page = match result {
            Ok(page) => page,
            Err(source) => {
                warn!(session = %window.session_id, offset, error = %source, "older page load failed");
                return Err(source).context(LoadHistorySnafu { stage: "older" });
            }
        };

        window.has_more = page.has_more;
        window.total_count = page.total;
        let added = window.prepend(
            page.messages
                .into_iter()
                .map(DisplayMessage::from_history)
                .collect(),
        );

        debug!(session = %window.session_id, offset, added, "prepended older page");
        Ok(Some(PrependedPage { added }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SessionId;
    use crate::testing::ScriptedApi;
    use chrono::{TimeZone, Utc};
    use quill_client::{HistoryMessage, HistoryPage};

    fn record(id: &str, seconds: i64) -> HistoryMessage {
        HistoryMessage {
            id: id.to_string(),
            role: "assistant".to_string(),
            content: format!("body of {id}"),
            thought: None,
            timestamp: Utc.timestamp_opt(seconds, 0).unwrap(),
            images: Vec::new(),
        }
    }

    fn page(ids: &[(&str, i64)], total: usize, has_more: bool) -> HistoryPage {
        HistoryPage {
            messages: ids.iter().map(|(id, at)| record(id, *at)).collect(),
            total,
            has_more,
        }
    }

    #[tokio::test]
    async fn initial_load_fills_the_window() {
        let api = ScriptedApi::default()
            .with_history_page(page(&[("m4", 40), ("m5", 50)], 5, true));
        let mut paginator = Paginator::new(2);
        let mut window = SessionWindow::new(SessionId::new("s1"));

        paginator.load_initial(&api, &mut window).await.unwrap();

        assert_eq!(window.messages.len(), 2);
        assert_eq!(window.total_count, 5);
        assert!(window.has_more);
        assert_eq!(api.history_calls(), vec![(2, 0)]);
    }

    #[tokio::test]
    async fn load_older_uses_loaded_count_as_offset() {
        let api = ScriptedApi::default()
            .with_history_page(page(&[("m4", 40), ("m5", 50)], 5, true))
            .with_history_page(page(&[("m2", 20), ("m3", 30)], 5, true));
        let mut paginator = Paginator::new(2);
        let mut window = SessionWindow::new(SessionId::new("s1"));

        paginator.load_initial(&api, &mut window).await.unwrap();
        let prepended = paginator
            .load_older(&api, &mut window)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(prepended.added, 2);
        assert_eq!(api.history_calls(), vec![(2, 0), (2, 2)]);
        let ids: Vec<&str> = window
            .messages
            .iter()
            .map(|message| message.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m2", "m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn overlapping_page_does_not_duplicate_messages() {
        // Offset drift (a message appended between requests) makes the older
        // page overlap the loaded window.
        let api = ScriptedApi::default()
            .with_history_page(page(&[("m4", 40), ("m5", 50)], 5, true))
            .with_history_page(page(&[("m3", 30), ("m4", 40)], 5, true));
        let mut paginator = Paginator::new(2);
        let mut window = SessionWindow::new(SessionId::new("s1"));

        paginator.load_initial(&api, &mut window).await.unwrap();
        let prepended = paginator
            .load_older(&api, &mut window)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(prepended.added, 1);
        let ids: Vec<&str> = window
            .messages
            .iter()
            .map(|message| message.id.as_str())
            .collect();
        assert_eq!(ids, vec!["m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn load_older_is_a_no_op_when_exhausted() {
        let api = ScriptedApi::default()
            .with_history_page(page(&[("m1", 10)], 1, false));
        let mut paginator = Paginator::new(2);
        let mut window = SessionWindow::new(SessionId::new("s1"));

        paginator.load_initial(&api, &mut window).await.unwrap();
        let outcome = paginator.load_older(&api, &mut window).await.unwrap();

        assert_eq!(outcome, None);
        assert_eq!(api.history_calls().len(), 1);
    }

    #[tokio::test]
    async fn load_older_requires_an_initial_page() {
        let api = ScriptedApi::default();
        let mut paginator = Paginator::new(2);
        let mut window = SessionWindow::new(SessionId::new("s1"));
        window.has_more = true;

        let outcome = paginator.load_older(&api, &mut window).await.unwrap();

        assert_eq!(outcome, None);
        assert!(api.history_calls().is_empty());
    }

    #[tokio::test]
    async fn failed_older_load_clears_the_in_flight_flag() {
        let api = ScriptedApi::default()
            .with_history_page(page(&[("m4", 40)], 3, true))
            .with_history_failure("backend unavailable");
        let mut paginator = Paginator::new(1);
        let mut window = SessionWindow::new(SessionId::new("s1"));

        paginator.load_initial(&api, &mut window).await.unwrap();
        let error = paginator.load_older(&api, &mut window).await.unwrap_err();
        assert!(error.to_string().contains("older"));
        assert!(!paginator.is_loading_older());

        // A subsequent attempt is allowed to try again.
        let api_retry = ScriptedApi::default()
            .with_history_page(page(&[("m3", 30)], 3, true));
        let prepended = paginator
            .load_older(&api_retry, &mut window)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prepended.added, 1);
    }
}
