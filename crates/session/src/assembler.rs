//! Incremental message assembly from stream deltas.
//!
//! Deltas accumulate into an open assistant block at the window tail; an
//! author boundary closes the block and opens a new one, and turn end clears
//! every streaming flag.

use quill_protocol::StreamEvent;
use tracing::debug;

use crate::message::{DisplayMessage, SessionWindow};

/// Why a turn stopped streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Backend signalled an orderly stop, or the stream closed cleanly.
    Completed,
    /// Backend produced an in-band error, or transport failed mid-turn.
    Failed { message: String },
    /// The user tore the turn down.
    Cancelled,
}

/// One assistant entry after merging consecutive streamed blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedMessage {
    pub content: String,
    pub thought: Option<String>,
    pub author: Option<String>,
    pub images: Vec<String>,
    pub is_streaming: bool,
}

/// Applies one stream event to the window. Returns true when the event
/// changed the visible conversation.
pub fn apply_event(window: &mut SessionWindow, event: StreamEvent) -> bool {
    match event {
        StreamEvent::Heartbeat => false,
        StreamEvent::Stop => false,
        StreamEvent::Error { .. } => false,
        StreamEvent::Delta {
            author,
            content,
            is_thought,
            images,
        } => apply_delta(window, author, content, is_thought, images),
    }
}

fn apply_delta(
    window: &mut SessionWindow,
    author: Option<String>,
    content: Option<String>,
    is_thought: bool,
    images: Vec<String>,
) -> bool {
    // One delta can carry both: images attach first, then the same event's
    // content runs through the usual append path.
    let mut applied = false;
    if !images.is_empty() {
        applied = attach_images(window, images);
    }

    let Some(content) = content else {
        return applied;
    };

    if let Some(open) = window.open_assistant_mut() {
        // An agent sometimes echoes the full accumulated answer as its
        // final content delta; the echo is discarded even when it arrives
        // under a different author tag.
        if !is_thought && content == open.content {
            debug!(len = content.len(), "discarding echoed delta");
            return applied;
        }
        // Only an explicit, differing author is a turn boundary; authorless
        // deltas continue whichever block is open.
        let boundary = author.is_some() && author != open.author;
        if !boundary {
            if is_thought {
                match &mut open.thought {
                    Some(thought) => thought.push_str(&content),
                    None => open.thought = Some(content),
                }
            } else {
                open.content.push_str(&content);
            }
            return true;
        }
        // Author boundary: the open block is finished output.
        open.is_streaming = false;
    }

    let message = if is_thought {
        DisplayMessage::assistant_streaming(author, String::new(), Some(content))
    } else {
        DisplayMessage::assistant_streaming(author, content, None)
    };
    window.push(message);
    true
}

/// Attaches images to the open assistant block. Image deltas carried by no
/// open block are dropped; they have nothing to attach to.
fn attach_images(window: &mut SessionWindow, images: Vec<String>) -> bool {
    match window.open_assistant_mut() {
        Some(open) => {
            open.images.extend(images);
            true
        }
        None => {
            debug!(count = images.len(), "image delta with no open message");
            false
        }
    }
}

/// Terminates the turn: appends an error block for failed outcomes, then
/// clears every streaming flag.
pub fn finalize(window: &mut SessionWindow, outcome: &TurnOutcome) {
    if let TurnOutcome::Failed { message } = outcome {
        window.clear_streaming();
        window.push(DisplayMessage::error(message.clone()));
        return;
    }
    window.clear_streaming();
}

/// Projects the window into render order, merging runs of consecutive
/// assistant blocks into single entries. Error blocks and user turns pass
/// through unmerged.
pub fn merged_assistant_view(window: &SessionWindow) -> Vec<MergedMessage> {
    let mut merged: Vec<MergedMessage> = Vec::new();
    let mut run_open = false;

    for message in &window.messages {
        let mergeable = message.role == crate::message::Role::Assistant && !message.is_error;
        if !mergeable {
            run_open = false;
            continue;
        }
        if run_open
            && let Some(current) = merged.last_mut()
        {
            current.content.push_str(&message.content);
            if let Some(thought) = &message.thought {
                match &mut current.thought {
                    Some(existing) => {
                        existing.push_str("\n\n");
                        existing.push_str(thought);
                    }
                    None => current.thought = Some(thought.clone()),
                }
            }
            current.images.extend(message.images.iter().cloned());
            current.is_streaming |= message.is_streaming;
            continue;
        }
        merged.push(MergedMessage {
            content: message.content.clone(),
            thought: message.thought.clone(),
            author: message.author.clone(),
            images: message.images.clone(),
            is_streaming: message.is_streaming,
        });
        run_open = true;
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Role, SessionId};

    fn window() -> SessionWindow {
        SessionWindow::new(SessionId::new("s1"))
    }

    fn delta(author: Option<&str>, content: Option<&str>, is_thought: bool) -> StreamEvent {
        StreamEvent::Delta {
            author: author.map(str::to_string),
            content: content.map(str::to_string),
            is_thought,
            images: Vec::new(),
        }
    }

    #[test]
    fn deltas_accumulate_into_one_streaming_block() {
        let mut window = window();
        assert!(apply_event(&mut window, delta(Some("agent"), Some("Hel"), false)));
        assert!(apply_event(&mut window, delta(Some("agent"), Some("lo"), false)));
        assert_eq!(window.messages.len(), 1);
        assert_eq!(window.messages[0].content, "Hello");
        assert!(window.messages[0].is_streaming);
    }

    #[test]
    fn author_boundary_closes_block_and_opens_new_one() {
        let mut window = window();
        apply_event(&mut window, delta(Some("planner"), Some("step 1"), false));
        apply_event(&mut window, delta(Some("writer"), Some("draft"), false));
        assert_eq!(window.messages.len(), 2);
        assert!(!window.messages[0].is_streaming);
        assert!(window.messages[1].is_streaming);
        assert_eq!(window.messages[1].author.as_deref(), Some("writer"));
    }

    #[test]
    fn echoed_full_content_is_discarded() {
        let mut window = window();
        apply_event(&mut window, delta(Some("agent"), Some("Hel"), false));
        apply_event(&mut window, delta(Some("agent"), Some("lo"), false));
        assert!(!apply_event(&mut window, delta(Some("agent"), Some("Hello"), false)));
        assert_eq!(window.messages[0].content, "Hello");
    }

    #[test]
    fn echo_under_a_new_author_is_still_discarded() {
        let mut window = window();
        apply_event(&mut window, delta(Some("planner"), Some("Hello"), false));
        assert!(!apply_event(&mut window, delta(Some("writer"), Some("Hello"), false)));
        assert_eq!(window.messages.len(), 1);
        assert_eq!(window.messages[0].author.as_deref(), Some("planner"));
    }

    #[test]
    fn thought_echo_is_not_suppressed() {
        let mut window = window();
        apply_event(&mut window, delta(Some("agent"), Some("plan"), false));
        // Thought text equal to the accumulated content is still applied:
        // only non-thought content can be a final echo.
        assert!(apply_event(&mut window, delta(Some("agent"), Some("plan"), true)));
        assert_eq!(window.messages[0].thought.as_deref(), Some("plan"));
    }

    #[test]
    fn thought_and_content_accumulate_independently() {
        let mut window = window();
        apply_event(&mut window, delta(Some("agent"), Some("considering"), true));
        apply_event(&mut window, delta(Some("agent"), Some(" options"), true));
        apply_event(&mut window, delta(Some("agent"), Some("Answer"), false));
        assert_eq!(window.messages.len(), 1);
        assert_eq!(
            window.messages[0].thought.as_deref(),
            Some("considering options")
        );
        assert_eq!(window.messages[0].content, "Answer");
    }

    #[test]
    fn authorless_delta_continues_the_open_block() {
        let mut window = window();
        apply_event(&mut window, delta(Some("writer"), Some("Hel"), false));
        apply_event(&mut window, delta(None, Some("lo"), false));
        assert_eq!(window.messages.len(), 1);
        assert_eq!(window.messages[0].content, "Hello");
        assert_eq!(window.messages[0].author.as_deref(), Some("writer"));
    }

    #[test]
    fn contentless_delta_is_a_no_op() {
        let mut window = window();
        assert!(!apply_event(&mut window, delta(Some("agent"), None, false)));
        assert!(window.messages.is_empty());
    }

    #[test]
    fn images_attach_to_open_block() {
        let mut window = window();
        apply_event(&mut window, delta(Some("agent"), Some("here:"), false));
        let applied = apply_event(
            &mut window,
            StreamEvent::Delta {
                author: Some("agent".to_string()),
                content: None,
                is_thought: false,
                images: vec!["img-1".to_string()],
            },
        );
        assert!(applied);
        assert_eq!(window.messages[0].images, vec!["img-1".to_string()]);
    }

    #[test]
    fn delta_with_images_and_content_applies_both() {
        let mut window = window();
        apply_event(&mut window, delta(Some("agent"), Some("before"), false));
        let applied = apply_event(
            &mut window,
            StreamEvent::Delta {
                author: Some("agent".to_string()),
                content: Some(" after".to_string()),
                is_thought: false,
                images: vec!["img-1".to_string()],
            },
        );
        assert!(applied);
        assert_eq!(window.messages.len(), 1);
        assert_eq!(window.messages[0].content, "before after");
        assert_eq!(window.messages[0].images, vec!["img-1".to_string()]);
    }

    #[test]
    fn images_without_open_block_are_dropped() {
        let mut window = window();
        let applied = apply_event(
            &mut window,
            StreamEvent::Delta {
                author: None,
                content: None,
                is_thought: false,
                images: vec!["img-1".to_string()],
            },
        );
        assert!(!applied);
        assert!(window.messages.is_empty());
    }

    #[test]
    fn heartbeat_and_stop_do_not_change_the_window() {
        let mut window = window();
        apply_event(&mut window, delta(Some("agent"), Some("x"), false));
        assert!(!apply_event(&mut window, StreamEvent::Heartbeat));
        assert!(!apply_event(&mut window, StreamEvent::Stop));
        assert_eq!(window.messages.len(), 1);
        assert!(window.messages[0].is_streaming);
    }

    #[test]
    fn finalize_completed_clears_streaming_flags() {
        let mut window = window();
        apply_event(&mut window, delta(Some("agent"), Some("done"), false));
        finalize(&mut window, &TurnOutcome::Completed);
        assert_eq!(window.messages.len(), 1);
        assert!(!window.messages[0].is_streaming);
    }

    #[test]
    fn finalize_failed_appends_error_block() {
        let mut window = window();
        apply_event(&mut window, delta(Some("agent"), Some("partial"), false));
        finalize(
            &mut window,
            &TurnOutcome::Failed {
                message: "boom".to_string(),
            },
        );
        assert_eq!(window.messages.len(), 2);
        assert!(!window.messages[0].is_streaming);
        let error = &window.messages[1];
        assert!(error.is_error);
        assert_eq!(error.content, "boom");
        assert!(!error.is_streaming);
    }

    #[test]
    fn finalize_cancelled_keeps_partial_output() {
        let mut window = window();
        apply_event(&mut window, delta(Some("agent"), Some("part"), false));
        finalize(&mut window, &TurnOutcome::Cancelled);
        assert_eq!(window.messages.len(), 1);
        assert_eq!(window.messages[0].content, "part");
        assert!(!window.messages[0].is_streaming);
    }

    #[test]
    fn merged_view_joins_consecutive_assistant_blocks() {
        let mut window = window();
        window.push(DisplayMessage::user("hi", Vec::new()));
        apply_event(&mut window, delta(Some("planner"), Some("think"), true));
        apply_event(&mut window, delta(Some("writer"), Some("Hello"), false));
        finalize(&mut window, &TurnOutcome::Completed);

        let merged = merged_assistant_view(&window);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "Hello");
        assert_eq!(merged[0].thought.as_deref(), Some("think"));
    }

    #[test]
    fn merged_view_breaks_runs_at_user_and_error_blocks() {
        let mut window = window();
        apply_event(&mut window, delta(Some("agent"), Some("first"), false));
        finalize(
            &mut window,
            &TurnOutcome::Failed {
                message: "boom".to_string(),
            },
        );
        window.push(DisplayMessage::user("retry", Vec::new()));
        apply_event(&mut window, delta(Some("agent"), Some("second"), false));

        let merged = merged_assistant_view(&window);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content, "first");
        assert_eq!(merged[1].content, "second");
    }

    #[test]
    fn end_to_end_turn_shape() {
        let mut window = window();
        window.push(DisplayMessage::user("hi", Vec::new()));
        apply_event(&mut window, delta(Some("agent"), Some("Hel"), false));
        apply_event(&mut window, delta(Some("agent"), Some("lo"), false));
        apply_event(&mut window, delta(Some("agent"), Some("Hello"), false));
        apply_event(&mut window, StreamEvent::Stop);
        finalize(&mut window, &TurnOutcome::Completed);

        assert_eq!(window.messages.len(), 2);
        assert_eq!(window.messages[0].role, Role::User);
        assert_eq!(window.messages[1].content, "Hello");
        assert!(!window.messages[1].is_streaming);
    }
}
