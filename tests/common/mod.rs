#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analysis_engine::{EngineError, EngineIo, EngineLauncher, EngineSession, SessionOptions};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf};

/// How the scripted engine behaves. Read on every launch and every `go`, so a
/// test can change it between re-initializations.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub fail_launch: bool,
    pub answer_uci: bool,
    /// Time spent "thinking" before answering `go`
    pub search_delay: Duration,
    /// Whether `stop` cuts a search short
    pub answer_stop: bool,
    /// Close the output as soon as `go` arrives
    pub crash_on_go: bool,
    /// Replaces the generated `info`/`bestmove` lines
    pub search_output: Option<Vec<String>>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            fail_launch: false,
            answer_uci: true,
            search_delay: Duration::from_millis(5),
            answer_stop: true,
            crash_on_go: false,
            search_output: None,
        }
    }
}

/// What the scripted engine observed, shared across launches.
#[derive(Default)]
pub struct Transcript {
    pub launches: AtomicUsize,
    /// Commands that arrived while a search was still running (other than `stop`)
    pub overlaps: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
    /// Consumed one per `go` before falling back to `Behavior::search_delay`
    pub delays: Mutex<VecDeque<Duration>>,
}

impl Transcript {
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    fn record(&self, line: &str) {
        self.commands.lock().unwrap().push(line.to_string());
    }
}

/// In-process UCI engine over a duplex pipe.
#[derive(Clone, Default)]
pub struct FakeEngine {
    pub behavior: Arc<Mutex<Behavior>>,
    pub transcript: Arc<Transcript>,
}

impl FakeEngine {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(behavior)),
            transcript: Arc::new(Transcript::default()),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn queue_delays(&self, delays: &[Duration]) {
        self.transcript.delays.lock().unwrap().extend(delays);
    }
}

impl EngineLauncher for FakeEngine {
    fn launch(&self) -> Result<EngineIo, EngineError> {
        self.transcript.launches.fetch_add(1, Ordering::SeqCst);
        if self.behavior.lock().unwrap().fail_launch {
            return Err(EngineError::Start("fake engine refused to start".into()));
        }

        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(ours);
        tokio::spawn(run_engine(theirs, self.clone()));

        Ok(EngineIo {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: None,
        })
    }
}

/// Centipawn score the fake engine reports for a FEN: its piece count.
pub fn fake_score(fen: &str) -> i32 {
    let placement = fen.split_whitespace().next().unwrap_or("");
    placement.chars().filter(|c| c.is_ascii_alphabetic()).count() as i32
}

async fn run_engine(io: DuplexStream, engine: FakeEngine) {
    let (reader, mut writer) = tokio::io::split(io);
    let mut lines = BufReader::new(reader).lines();
    let mut position = String::new();

    while let Ok(Some(line)) = lines.next_line().await {
        engine.transcript.record(&line);
        let behavior = engine.behavior.lock().unwrap().clone();
        let command = line.split_whitespace().next().unwrap_or("");

        let reply = match command {
            "uci" if behavior.answer_uci => {
                "id name FakeFish\nid author tests\nuciok\n".to_string()
            }
            "isready" => "readyok\n".to_string(),
            "position" => {
                position = line.trim_start_matches("position fen ").to_string();
                continue;
            }
            "d" => format!("Fen: {position}\n"),
            "go" => {
                if behavior.crash_on_go {
                    return;
                }
                match think(&mut lines, &engine, &behavior).await {
                    Some(()) => search_reply(&line, &position, &behavior),
                    None => return,
                }
            }
            "quit" => return,
            _ => continue,
        };

        if writer.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Wait out the search delay while watching the input. Returns `None` when
/// the pipe closes.
async fn think(
    lines: &mut tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
    engine: &FakeEngine,
    behavior: &Behavior,
) -> Option<()> {
    let delay = engine
        .transcript
        .delays
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(behavior.search_delay);
    let deadline = tokio::time::sleep(delay);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return Some(()),
            next = lines.next_line() => {
                let line = next.ok()??;
                engine.transcript.record(&line);
                if line.trim() == "stop" {
                    if behavior.answer_stop {
                        return Some(());
                    }
                } else {
                    engine.transcript.overlaps.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }
}

fn search_reply(go: &str, position: &str, behavior: &Behavior) -> String {
    if let Some(output) = &behavior.search_output {
        return output.iter().map(|l| format!("{l}\n")).collect();
    }
    let depth = go.split_whitespace().nth(2).unwrap_or("1");
    format!(
        "info depth {depth} seldepth {depth} score cp {} nodes 1000 pv e2e4 e7e5\n\
         bestmove e2e4 ponder e7e5\n",
        fake_score(position)
    )
}

pub fn fast_options() -> SessionOptions {
    SessionOptions {
        handshake_timeout: Duration::from_millis(500),
        search_timeout: Duration::from_secs(2),
        stop_grace: Duration::from_millis(300),
        threads: 1,
        hash_mb: 16,
    }
}

pub fn session(behavior: Behavior) -> (Arc<EngineSession>, FakeEngine) {
    session_with(behavior, fast_options())
}

pub fn session_with(
    behavior: Behavior,
    options: SessionOptions,
) -> (Arc<EngineSession>, FakeEngine) {
    let engine = FakeEngine::new(behavior);
    let session = Arc::new(EngineSession::new(engine.clone(), options));
    (session, engine)
}

pub async fn ready_session(behavior: Behavior) -> (Arc<EngineSession>, FakeEngine) {
    let (session, engine) = session(behavior);
    session.initialize().await.unwrap();
    (session, engine)
}

/// One `/parse-board` request as the stub saw it.
#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub orientation: Option<String>,
    pub content_type: Option<String>,
    pub bytes: usize,
}

#[derive(Clone)]
struct StubState {
    status: StatusCode,
    body: String,
    delay: Duration,
    requests: Arc<Mutex<Vec<DetectionRequest>>>,
}

async fn parse_board(
    State(stub): State<StubState>,
    Query(params): Query<HashMap<String, String>>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> (StatusCode, String) {
    stub.requests.lock().unwrap().push(DetectionRequest {
        orientation: params.get("orientation").cloned(),
        content_type: headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        bytes: body.len(),
    });
    tokio::time::sleep(stub.delay).await;
    (stub.status, stub.body.clone())
}

/// Stub detection server on an ephemeral port. Returns `host:port` and the
/// requests it receives.
pub async fn detection_stub(
    status: StatusCode,
    body: &str,
) -> (String, Arc<Mutex<Vec<DetectionRequest>>>) {
    slow_detection_stub(status, body, Duration::ZERO).await
}

/// Like [`detection_stub`], but every answer is held back by `delay`.
pub async fn slow_detection_stub(
    status: StatusCode,
    body: &str,
    delay: Duration,
) -> (String, Arc<Mutex<Vec<DetectionRequest>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = StubState {
        status,
        body: body.to_string(),
        delay,
        requests: requests.clone(),
    };
    let app = Router::new()
        .route("/parse-board", post(parse_board))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr.to_string(), requests)
}
