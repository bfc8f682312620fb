use std::time::Duration;

use futures::StreamExt;
use snafu::ResultExt;

use crate::error::{
    BuildHttpClientSnafu, ClientResult, DecodeResponseSnafu, InvalidBaseUrlSnafu,
    RequestFailedSnafu, StreamChunkSnafu, UnexpectedStatusSnafu,
};
use crate::types::{EditOutcome, EditRequest, HistoryPage, SessionSummary, TurnRequest};
use crate::{BoxFuture, ChatApi, TurnByteStream};

/// Time allowed for connection establishment. Streamed bodies rely on
/// protocol heartbeats for liveness, so no overall request timeout is set.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub agent_id: String,
    pub user_id: u64,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>, agent_id: impl Into<String>, user_id: u64) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent_id: agent_id.into(),
            user_id,
        }
    }
}

pub struct HttpChatApi {
    config: ApiConfig,
    client: reqwest::Client,
}

impl HttpChatApi {
    pub fn new(config: ApiConfig) -> ClientResult<Self> {
        snafu::ensure!(
            !config.base_url.trim().is_empty(),
            InvalidBaseUrlSnafu {
                stage: "http-api-new",
                base_url: config.base_url.clone(),
            }
        );

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context(BuildHttpClientSnafu {
                stage: "http-api-new",
            })?;

        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.config.base_url, self.config.agent_id, path
        )
    }

    async fn check_status(
        stage: &'static str,
        response: reqwest::Response,
    ) -> ClientResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(stage, status = status.as_u16(), %body, "backend rejected request");
        UnexpectedStatusSnafu {
            stage,
            status: status.as_u16(),
            body,
        }
        .fail()
    }
}

impl ChatApi for HttpChatApi {
    fn send_turn<'a>(
        &'a self,
        request: TurnRequest,
    ) -> BoxFuture<'a, ClientResult<TurnByteStream>> {
        Box::pin(async move {
            let url = self.endpoint(&format!("chats/{}", request.session_id));
            tracing::debug!(session_id = %request.session_id, "opening turn stream");

            let response = self
                .client
                .post(url)
                .json(&request)
                .send()
                .await
                .context(RequestFailedSnafu { stage: "send-turn" })?;
            let response = Self::check_status("send-turn", response).await?;

            let stream = response
                .bytes_stream()
                .map(|chunk| {
                    chunk.context(StreamChunkSnafu {
                        stage: "turn-body-chunk",
                    })
                })
                .boxed();
            Ok(stream)
        })
    }

    fn fetch_history<'a>(
        &'a self,
        session_id: &'a str,
        limit: usize,
        offset: usize,
    ) -> BoxFuture<'a, ClientResult<HistoryPage>> {
        Box::pin(async move {
            let url = self.endpoint(&format!("sessions/{session_id}/history"));
            let response = self
                .client
                .get(url)
                .query(&[
                    ("user_id", self.config.user_id.to_string()),
                    ("limit", limit.to_string()),
                    ("offset", offset.to_string()),
                ])
                .send()
                .await
                .context(RequestFailedSnafu {
                    stage: "fetch-history",
                })?;
            let response = Self::check_status("fetch-history", response).await?;

            response.json::<HistoryPage>().await.context(DecodeResponseSnafu {
                stage: "fetch-history",
            })
        })
    }

    fn list_sessions<'a>(&'a self) -> BoxFuture<'a, ClientResult<Vec<SessionSummary>>> {
        Box::pin(async move {
            let url = self.endpoint("sessions");
            let response = self
                .client
                .get(url)
                .query(&[("user_id", self.config.user_id.to_string())])
                .send()
                .await
                .context(RequestFailedSnafu {
                    stage: "list-sessions",
                })?;
            let response = Self::check_status("list-sessions", response).await?;

            // The endpoint returns null for users with no sessions.
            let summaries = response
                .json::<Option<Vec<SessionSummary>>>()
                .await
                .context(DecodeResponseSnafu {
                    stage: "list-sessions",
                })?;
            Ok(summaries.unwrap_or_default())
        })
    }

    fn edit_message<'a>(
        &'a self,
        session_id: &'a str,
        request: EditRequest,
    ) -> BoxFuture<'a, ClientResult<EditOutcome>> {
        Box::pin(async move {
            let url = self.endpoint(&format!("sessions/{session_id}/edit"));
            tracing::debug!(session_id, message_id = %request.message_id, "forking session via edit");

            let response = self
                .client
                .post(url)
                .json(&request)
                .send()
                .await
                .context(RequestFailedSnafu {
                    stage: "edit-message",
                })?;
            let response = Self::check_status("edit-message", response).await?;

            response.json::<EditOutcome>().await.context(DecodeResponseSnafu {
                stage: "edit-message",
            })
        })
    }

    fn delete_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, ClientResult<()>> {
        Box::pin(async move {
            let url = self.endpoint(&format!("sessions/{session_id}"));
            let response = self
                .client
                .delete(url)
                .query(&[("user_id", self.config.user_id.to_string())])
                .send()
                .await
                .context(RequestFailedSnafu {
                    stage: "delete-session",
                })?;
            Self::check_status("delete-session", response).await?;
            Ok(())
        })
    }
}
