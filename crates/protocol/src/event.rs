use serde::Deserialize;

/// Event type assumed until an `event:` line declares otherwise.
const DEFAULT_EVENT_TYPE: &str = "data";

/// One semantic protocol event, parsed at the boundary so downstream code
/// never re-checks optional JSON fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Keep-alive frame; carries no content.
    Heartbeat,
    /// Explicit end-of-turn marker; no content mutation.
    Stop,
    /// Terminal failure reported by the backend mid-stream.
    Error { message: String },
    /// Incremental content, thought, or image data for the active turn.
    Delta {
        author: Option<String>,
        content: Option<String>,
        is_thought: bool,
        images: Vec<String>,
    },
}

/// Payload shape of a `data:` line under the default event type.
#[derive(Debug, Deserialize)]
struct DeltaPayload {
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    is_thought: bool,
    #[serde(default)]
    images: Vec<String>,
}

/// Payload shape of a `data:` line under the `error` event type.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: Option<String>,
}

/// Classifies decoded lines into [`StreamEvent`]s.
///
/// An `event: <type>` line sets the current event type, sticky until the
/// next declaration; a `data: <json>` line is interpreted under that type.
/// Blank and unrecognized lines are ignored. After a data line is consumed
/// the type resets to the default, matching a producer that emits exactly
/// one data line per event block.
#[derive(Debug)]
pub struct EventInterpreter {
    current_event_type: String,
}

impl Default for EventInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventInterpreter {
    pub fn new() -> Self {
        Self {
            current_event_type: DEFAULT_EVENT_TYPE.to_string(),
        }
    }

    /// Interprets one decoded line, returning an event when the line
    /// completes one.
    pub fn interpret(&mut self, line: &str) -> Option<StreamEvent> {
        let trimmed = line.trim();

        if let Some(declared) = trimmed.strip_prefix("event:") {
            self.current_event_type = declared.trim().to_string();
            return None;
        }

        let payload = trimmed.strip_prefix("data:")?.trim();
        if payload.is_empty() {
            return None;
        }

        let event_type = std::mem::replace(
            &mut self.current_event_type,
            DEFAULT_EVENT_TYPE.to_string(),
        );

        match event_type.as_str() {
            "heartbeat" => {
                // Parse failures on keep-alives are irrelevant; the frame
                // carries no content either way.
                Some(StreamEvent::Heartbeat)
            }
            "stop" => Some(StreamEvent::Stop),
            "error" => match serde_json::from_str::<ErrorPayload>(payload) {
                Ok(parsed) => Some(StreamEvent::Error {
                    message: parsed
                        .error
                        .unwrap_or_else(|| "unknown backend error".to_string()),
                }),
                Err(error) => {
                    tracing::warn!(%error, "skipping unparseable error payload");
                    None
                }
            },
            _ => match serde_json::from_str::<DeltaPayload>(payload) {
                Ok(parsed) => Some(StreamEvent::Delta {
                    author: parsed.author.filter(|author| !author.is_empty()),
                    content: parsed.content,
                    is_thought: parsed.is_thought,
                    images: parsed.images,
                }),
                Err(error) => {
                    // One bad frame must not abort the stream.
                    tracing::warn!(%error, "skipping unparseable data payload");
                    None
                }
            },
        }
    }
}
