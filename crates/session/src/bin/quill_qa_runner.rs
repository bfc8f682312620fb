use std::env;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use quill_client::{
    BoxFuture, ChatApi, ClientResult, EditOutcome, EditRequest, HistoryPage, SessionSummary,
    TurnByteStream, TurnRequest,
};
use quill_protocol::{EventInterpreter, LineDecoder, StreamEvent};
use snafu::{ResultExt, Snafu};

use quill::{
    ClientSettings, Role, ScrollModel, ScrollSample, SessionController, SessionId, SessionWindow,
    SettingsStore, TurnOutcome, apply_event, finalize,
};

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    DecodeSplit,
    StickyEventType,
    AssembleTurn,
    DuplicateSuppression,
    ScrollAnchor,
    SettingsRoundtrip,
    TurnRoundtrip,
    CancelTurn,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "decode_split" => Some(Self::DecodeSplit),
            "sticky_event_type" => Some(Self::StickyEventType),
            "assemble_turn" => Some(Self::AssembleTurn),
            "duplicate_suppression" => Some(Self::DuplicateSuppression),
            "scroll_anchor" => Some(Self::ScrollAnchor),
            "settings_roundtrip" => Some(Self::SettingsRoundtrip),
            "turn_roundtrip" => Some(Self::TurnRoundtrip),
            "cancel_turn" => Some(Self::CancelTurn),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::DecodeSplit => "decode_split",
            Self::StickyEventType => "sticky_event_type",
            Self::AssembleTurn => "assemble_turn",
            Self::DuplicateSuppression => "duplicate_suppression",
            Self::ScrollAnchor => "scroll_anchor",
            Self::SettingsRoundtrip => "settings_roundtrip",
            Self::TurnRoundtrip => "turn_roundtrip",
            Self::CancelTurn => "cancel_turn",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
    #[snafu(display("session operation failed: {source}"))]
    SessionOp {
        stage: &'static str,
        source: quill::SessionError,
    },
    #[snafu(display("settings operation failed: {source}"))]
    SettingsOp {
        stage: &'static str,
        source: quill::SettingsError,
    },
    #[snafu(display("file operation failed at '{path}': {source}"))]
    FileIo {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();
    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    match args.scenario {
        Scenario::DecodeSplit => run_decode_split(),
        Scenario::StickyEventType => run_sticky_event_type(),
        Scenario::AssembleTurn => run_assemble_turn(),
        Scenario::DuplicateSuppression => run_duplicate_suppression(),
        Scenario::ScrollAnchor => run_scroll_anchor(),
        Scenario::SettingsRoundtrip => run_settings_roundtrip(),
        Scenario::TurnRoundtrip => run_turn_roundtrip().await,
        Scenario::CancelTurn => run_cancel_turn().await,
        Scenario::All => run_all().await,
    }
}

async fn run_all() -> RunnerResult<()> {
    run_decode_split()?;
    run_sticky_event_type()?;
    run_assemble_turn()?;
    run_duplicate_suppression()?;
    run_scroll_anchor()?;
    run_settings_roundtrip()?;
    run_turn_roundtrip().await?;
    run_cancel_turn().await?;
    println!("all_passed=true");
    Ok(())
}

fn parse_args(mut raw_args: impl Iterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    while let Some(arg) = raw_args.next() {
        match arg.as_str() {
            "--scenario" => {
                let raw = raw_args.next().ok_or_else(|| {
                    MissingScenarioSnafu {
                        stage: "parse-arguments",
                    }
                    .build()
                })?;
                scenario = Some(Scenario::parse(&raw).ok_or_else(|| {
                    UnknownScenarioSnafu {
                        stage: "parse-arguments",
                        raw: raw.clone(),
                    }
                    .build()
                })?);
            }
            other => {
                return UnknownArgumentSnafu {
                    stage: "parse-arguments",
                    raw: other.to_string(),
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.ok_or_else(|| {
            MissingScenarioSnafu {
                stage: "parse-arguments",
            }
            .build()
        })?,
    })
}

fn ensure(scenario: &'static str, condition: bool, reason: &str) -> RunnerResult<()> {
    if condition {
        Ok(())
    } else {
        ScenarioFailedSnafu {
            stage: "check",
            scenario,
            reason: reason.to_string(),
        }
        .fail()
    }
}

const TURN_BODY: &str = "event: data\n\
    data: {\"author\":\"agent\",\"content\":\"Hel\",\"is_thought\":false}\n\
    data: {\"author\":\"agent\",\"content\":\"lo\",\"is_thought\":false}\n\
    event: stop\n\
    data: {\"status\":\"done\"}\n";

fn run_decode_split() -> RunnerResult<()> {
    // The same body must decode identically at every chunk boundary.
    let reference = decode_all(&[TURN_BODY]);
    let mut stable = true;
    for split in 1..TURN_BODY.len() {
        let events = decode_all(&[&TURN_BODY[..split], &TURN_BODY[split..]]);
        if events != reference {
            stable = false;
            break;
        }
    }

    println!("events_decoded={}", reference.len());
    println!("boundary_stable={stable}");
    ensure("decode_split", reference.len() == 3, "expected 3 events")?;
    ensure("decode_split", stable, "chunk boundary changed the decode")?;
    println!("runner_ok=true");
    Ok(())
}

fn decode_all(chunks: &[&str]) -> Vec<StreamEvent> {
    let mut decoder = LineDecoder::new();
    let mut interpreter = EventInterpreter::new();
    let mut events = Vec::new();
    for chunk in chunks {
        for line in decoder.push(chunk.as_bytes()) {
            events.extend(interpreter.interpret(&line));
        }
    }
    decoder.finish();
    events
}

fn run_sticky_event_type() -> RunnerResult<()> {
    let mut interpreter = EventInterpreter::new();
    let primed = interpreter.interpret("event: heartbeat").is_none();
    let heartbeat = interpreter.interpret("data: {\"timestamp\":\"t\"}");
    // The type resets to data after each consumed payload.
    let delta = interpreter.interpret("data: {\"content\":\"x\"}");

    let heartbeat_ok = matches!(heartbeat, Some(StreamEvent::Heartbeat));
    let reset_ok = matches!(delta, Some(StreamEvent::Delta { .. }));
    println!("heartbeat_ok={heartbeat_ok}");
    println!("reset_to_data={reset_ok}");
    ensure("sticky_event_type", primed, "type line must not emit an event")?;
    ensure("sticky_event_type", heartbeat_ok, "heartbeat not decoded")?;
    ensure("sticky_event_type", reset_ok, "type did not reset to data")?;
    println!("runner_ok=true");
    Ok(())
}

fn run_assemble_turn() -> RunnerResult<()> {
    let mut window = SessionWindow::new(SessionId::new("qa"));
    for event in decode_all(&[TURN_BODY]) {
        apply_event(&mut window, event);
    }
    finalize(&mut window, &TurnOutcome::Completed);

    let assembled = window
        .messages
        .first()
        .map(|message| message.content.as_str())
        .unwrap_or_default();
    let ok = window.messages.len() == 1
        && assembled == "Hello"
        && window.messages[0].role == Role::Assistant
        && !window.messages[0].is_streaming;
    println!("assembled_content={assembled}");
    println!("assemble_ok={ok}");
    ensure("assemble_turn", ok, "assembled window is wrong")?;
    println!("runner_ok=true");
    Ok(())
}

fn run_duplicate_suppression() -> RunnerResult<()> {
    let mut window = SessionWindow::new(SessionId::new("qa"));
    let body = "data: {\"author\":\"agent\",\"content\":\"Hello\"}\n\
        data: {\"author\":\"agent\",\"content\":\"Hello\"}\n";
    for event in decode_all(&[body]) {
        apply_event(&mut window, event);
    }

    let ok = window.messages.len() == 1 && window.messages[0].content == "Hello";
    println!("suppressed={ok}");
    ensure("duplicate_suppression", ok, "echoed delta was applied twice")?;
    println!("runner_ok=true");
    Ok(())
}

fn run_scroll_anchor() -> RunnerResult<()> {
    let mut model = ScrollModel::new();
    model.observe(ScrollSample {
        offset: 40.0,
        content_extent: 2000.0,
        viewport_extent: 600.0,
    });
    let trigger = model.should_load_older();
    model.begin_prepend();
    let correction = model.commit_prepend(3200.0);

    println!("load_older_triggered={trigger}");
    println!("offset_correction={correction}");
    ensure("scroll_anchor", trigger, "near-top offset did not trigger")?;
    ensure(
        "scroll_anchor",
        (correction - 1200.0).abs() < f32::EPSILON,
        "anchor correction is wrong",
    )?;
    println!("runner_ok=true");
    Ok(())
}

fn run_settings_roundtrip() -> RunnerResult<()> {
    let path = env::temp_dir().join(format!("quill-qa-{}.json", std::process::id()));
    let store = SettingsStore::new(path.clone());
    store
        .update(ClientSettings {
            endpoint: "http://qa-backend:9000/".to_string(),
            user_id: 99,
            ..ClientSettings::default()
        })
        .context(SettingsOpSnafu {
            stage: "persist-settings",
        })?;

    let reloaded = SettingsStore::new(path.clone()).settings();
    std::fs::remove_file(&path).context(FileIoSnafu {
        stage: "cleanup-settings-file",
        path: path.display().to_string(),
    })?;

    let ok = reloaded.endpoint == "http://qa-backend:9000" && reloaded.user_id == 99;
    println!("settings_roundtrip_ok={ok}");
    ensure("settings_roundtrip", ok, "reloaded settings differ")?;
    println!("runner_ok=true");
    Ok(())
}

/// Minimal backend double: every turn streams the same scripted body.
struct FixedTurnApi {
    body: &'static str,
    hang: bool,
}

impl ChatApi for FixedTurnApi {
    fn send_turn<'a>(
        &'a self,
        _request: TurnRequest,
    ) -> BoxFuture<'a, ClientResult<TurnByteStream>> {
        let chunks = self
            .body
            .as_bytes()
            .chunks(7)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect::<Vec<_>>();
        let hang = self.hang;
        Box::pin(async move {
            let stream = stream::iter(chunks);
            if hang {
                Ok(stream.chain(stream::pending()).boxed())
            } else {
                Ok(stream.boxed())
            }
        })
    }

    fn fetch_history<'a>(
        &'a self,
        _session_id: &'a str,
        _limit: usize,
        _offset: usize,
    ) -> BoxFuture<'a, ClientResult<HistoryPage>> {
        Box::pin(async { Ok(HistoryPage::default()) })
    }

    fn list_sessions<'a>(&'a self) -> BoxFuture<'a, ClientResult<Vec<SessionSummary>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn edit_message<'a>(
        &'a self,
        _session_id: &'a str,
        _request: EditRequest,
    ) -> BoxFuture<'a, ClientResult<EditOutcome>> {
        Box::pin(async {
            Ok(EditOutcome {
                new_session_id: "qa-fork".to_string(),
                thread_id: String::new(),
                version: 1,
                edited_from_message_id: String::new(),
            })
        })
    }

    fn delete_session<'a>(&'a self, _session_id: &'a str) -> BoxFuture<'a, ClientResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

const HANGING_BODY: &str = "data: {\"author\":\"agent\",\"content\":\"par\",\"is_thought\":false}\n";

fn qa_controller(body: &'static str, hang: bool) -> SessionController {
    let api = Arc::new(FixedTurnApi { body, hang });
    SessionController::new(api, Arc::new(ClientSettings::default()))
}

async fn run_turn_roundtrip() -> RunnerResult<()> {
    let mut controller = qa_controller(TURN_BODY, false);
    let mut handle = controller
        .submit("hi", Vec::new(), Vec::new())
        .await
        .context(SessionOpSnafu { stage: "submit" })?;
    let polled_title = handle.title_poll.take().is_some();
    let outcome = controller.drive_turn(handle).await;

    let window = controller.window();
    let ok = outcome == TurnOutcome::Completed
        && window.messages.len() == 2
        && window.messages[1].content == "Hello"
        && window.messages.iter().all(|message| !message.is_streaming);
    println!("first_turn_polls_title={polled_title}");
    println!("turn_outcome_completed={}", outcome == TurnOutcome::Completed);
    println!("turn_roundtrip_ok={ok}");
    ensure("turn_roundtrip", ok, "driven turn left a wrong window")?;
    println!("runner_ok=true");
    Ok(())
}

async fn run_cancel_turn() -> RunnerResult<()> {
    let mut controller = qa_controller(HANGING_BODY, true);
    let handle = controller
        .submit("hi", Vec::new(), Vec::new())
        .await
        .context(SessionOpSnafu { stage: "submit" })?;
    controller.cancel_turn();
    let outcome = controller.drive_turn(handle).await;

    let window = controller.window();
    // Cancel fired before any chunk was applied, so only the user message
    // survives.
    let ok = outcome == TurnOutcome::Cancelled
        && window.messages.len() == 1
        && window.messages.iter().all(|message| !message.is_streaming)
        && window.messages.iter().all(|message| !message.is_error);
    println!("cancel_outcome_ok={}", outcome == TurnOutcome::Cancelled);
    println!("cancel_turn_ok={ok}");
    ensure("cancel_turn", ok, "cancel left streaming or error state")?;
    println!("runner_ok=true");
    Ok(())
}
