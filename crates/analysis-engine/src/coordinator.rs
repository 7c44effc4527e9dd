//! Evaluation coordinator.
//!
//! Owns the authoritative position and its version counter, decides when a
//! search has to run, and reconciles results that arrive asynchronously from
//! the detection service, board edits and the engine. A search result is
//! published only if it answers the version that is still current; anything
//! else is dropped.

use std::fmt;
use std::sync::Arc;

use chess_core::{fen, validity, CastlingRights, Color, OpeningInfo, Position};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::detection::{DetectedBoard, DetectionClient, Orientation};
use crate::error::{AnalysisError, DetectionError, EngineError};
use crate::stockfish::{EngineSession, SessionHandle, SessionState};
use crate::uci::SearchResult;

/// Generation of the authoritative position. Strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PositionVersion(u64);

impl PositionVersion {
    pub const INITIAL: Self = Self(0);

    fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PositionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Evaluation {
    /// A search for the current version is queued or running
    Pending,
    Ready(SearchResult),
    /// The search for the current version failed; `last` is the most recent
    /// result published for any version
    Stale {
        last: Option<SearchResult>,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetectionStatus {
    /// No detection requested yet
    Idle,
    Pending,
    Done,
    Failed { reason: String },
    /// The position changed before the service answered; the answer was dropped
    Superseded,
}

/// Everything the UI needs to render, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub version: PositionVersion,
    pub position: Position,
    pub opening: Option<OpeningInfo>,
    pub evaluation: Evaluation,
    pub detection: DetectionStatus,
}

impl Analysis {
    pub fn fen(&self) -> String {
        fen::encode(&self.position)
    }
}

struct State {
    current: Analysis,
    last_result: Option<SearchResult>,
    in_flight: Option<PositionVersion>,
    /// Engine instance the current `Stale` evaluation failed on
    failed_on: Option<SessionHandle>,
    /// Id of the most recent `request_detection` call
    detection_request: u64,
}

struct Shared {
    session: Arc<EngineSession>,
    depth: u32,
    state: Mutex<State>,
    updates: watch::Sender<Analysis>,
}

/// Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Starts at version 0 on the standard starting position.
    pub fn new(session: Arc<EngineSession>, depth: u32) -> Self {
        let initial = Analysis {
            version: PositionVersion::INITIAL,
            position: Position::starting(),
            opening: None,
            evaluation: Evaluation::Pending,
            detection: DetectionStatus::Idle,
        };
        let (updates, _) = watch::channel(initial.clone());

        Self {
            shared: Arc::new(Shared {
                session,
                depth,
                state: Mutex::new(State {
                    current: initial,
                    last_result: None,
                    in_flight: None,
                    failed_on: None,
                    detection_request: 0,
                }),
                updates,
            }),
        }
    }

    pub fn session(&self) -> &Arc<EngineSession> {
        &self.shared.session
    }

    pub fn snapshot(&self) -> Analysis {
        self.shared.updates.borrow().clone()
    }

    pub fn current_version(&self) -> PositionVersion {
        self.shared.updates.borrow().version
    }

    pub fn subscribe(&self) -> watch::Receiver<Analysis> {
        self.shared.updates.subscribe()
    }

    /// Wait until neither detection nor the current evaluation is pending.
    pub async fn settled(&self) -> Analysis {
        let mut updates = self.subscribe();
        loop {
            {
                let analysis = updates.borrow_and_update();
                let busy = matches!(analysis.evaluation, Evaluation::Pending)
                    || matches!(analysis.detection, DetectionStatus::Pending);
                if !busy {
                    return analysis.clone();
                }
            }
            if updates.changed().await.is_err() {
                return self.snapshot();
            }
        }
    }

    /// Adopt the position reported by the detection service.
    ///
    /// Text that does not decode marks detection as failed and leaves the
    /// authoritative position untouched.
    pub async fn accept_detected_position(
        &self,
        text: &str,
        opening: Option<OpeningInfo>,
    ) -> Result<PositionVersion, AnalysisError> {
        let mut state = self.shared.state.lock().await;
        self.accept_detected_locked(&mut state, text, opening)
    }

    /// Report a detection request that never produced a position.
    pub async fn record_detection_failure(&self, error: &DetectionError) {
        let mut state = self.shared.state.lock().await;
        self.fail_detection(&mut state, error);
    }

    /// Fire-and-forget detection: marks detection pending, then feeds the
    /// outcome back through [`Self::accept_detected_position`].
    ///
    /// The answer is applied only if it is still the latest request and the
    /// position has not changed since the photo was sent. Otherwise the task
    /// resolves to [`AnalysisError::DetectionSuperseded`] and the position is
    /// left alone.
    pub async fn request_detection(
        &self,
        client: &DetectionClient,
        image: Vec<u8>,
        orientation: Orientation,
    ) -> JoinHandle<Result<PositionVersion, AnalysisError>> {
        let (request, requested_at) = {
            let mut state = self.shared.state.lock().await;
            state.detection_request += 1;
            state.current.detection = DetectionStatus::Pending;
            self.publish(&state);
            (state.detection_request, state.current.version)
        };

        let coordinator = self.clone();
        let client = client.clone();
        tokio::spawn(async move {
            let outcome = client.detect(image, orientation).await;
            coordinator
                .finish_detection(request, requested_at, outcome)
                .await
        })
    }

    async fn finish_detection(
        &self,
        request: u64,
        requested_at: PositionVersion,
        outcome: Result<DetectedBoard, DetectionError>,
    ) -> Result<PositionVersion, AnalysisError> {
        let mut state = self.shared.state.lock().await;

        if request != state.detection_request {
            debug!(
                request,
                latest = state.detection_request,
                "Discarding answer to an older detection request"
            );
            return Err(AnalysisError::DetectionSuperseded);
        }
        if requested_at != state.current.version {
            debug!(
                requested = %requested_at,
                current = %state.current.version,
                "Discarding detection for a position that has since changed"
            );
            state.current.detection = DetectionStatus::Superseded;
            self.publish(&state);
            return Err(AnalysisError::DetectionSuperseded);
        }

        match outcome {
            Ok(board) => self.accept_detected_locked(&mut state, &board.fen, board.opening),
            Err(e) => {
                self.fail_detection(&mut state, &e);
                Err(e.into())
            }
        }
    }

    fn accept_detected_locked(
        &self,
        state: &mut State,
        text: &str,
        opening: Option<OpeningInfo>,
    ) -> Result<PositionVersion, AnalysisError> {
        match fen::decode(text) {
            Ok(position) => {
                let version = self.install(state, position, opening, DetectionStatus::Done);
                info!(%version, fen = text, "Accepted detected position");
                Ok(version)
            }
            Err(e) => {
                warn!(fen = text, error = %e, "Rejected detected position");
                state.current.detection = DetectionStatus::Failed {
                    reason: e.to_string(),
                };
                self.publish(state);
                Err(e.into())
            }
        }
    }

    fn fail_detection(&self, state: &mut State, error: &DetectionError) {
        warn!(error = %error, "Board detection failed");
        state.current.detection = DetectionStatus::Failed {
            reason: error.to_string(),
        };
        self.publish(state);
    }

    /// Commit a user edit after the engine's validity query accepts it.
    pub async fn apply_edit(&self, position: Position) -> Result<PositionVersion, AnalysisError> {
        // Not under the state lock: this waits for the engine
        if !self.shared.session.validate_position(&position).await? {
            let reason = validity::check_playable(&position)
                .err()
                .unwrap_or_else(|| "rejected by engine".to_string());
            warn!(fen = %position, reason = %reason, "Rejected board edit");
            return Err(AnalysisError::InvalidPosition(reason));
        }

        let mut state = self.shared.state.lock().await;
        let detection = state.current.detection.clone();
        let version = self.install(&mut state, position, None, detection);
        info!(%version, fen = %state.current.position, "Accepted board edit");
        Ok(version)
    }

    /// Decode FEN text and commit it as an edit.
    pub async fn apply_edit_text(&self, text: &str) -> Result<PositionVersion, AnalysisError> {
        let position = fen::decode(text)?;
        self.apply_edit(position).await
    }

    /// Toggle side to move and castling rights on the current position.
    pub async fn set_flags(
        &self,
        side: Color,
        rights: CastlingRights,
    ) -> Result<PositionVersion, AnalysisError> {
        let current = self.snapshot().fen();
        let updated = fen::apply_castling_and_turn(&current, side, rights)?;
        self.apply_edit_text(&updated).await
    }

    /// Search completion callback. Returns whether the result was published.
    pub async fn on_search_completed(
        &self,
        version: PositionVersion,
        result: Result<SearchResult, EngineError>,
    ) -> bool {
        let mut state = self.shared.state.lock().await;
        if state.in_flight == Some(version) {
            state.in_flight = None;
        }

        if version != state.current.version {
            debug!(%version, current = %state.current.version, "Discarding stale search result");
            self.schedule_search(&mut state);
            self.publish(&state);
            return false;
        }

        match result {
            Ok(result) => {
                info!(
                    %version,
                    best_move = %result.best_move,
                    score = %result.score,
                    "Evaluation ready"
                );
                state.last_result = Some(result.clone());
                state.failed_on = None;
                state.current.evaluation = Evaluation::Ready(result);
            }
            Err(e) => {
                error!(%version, error = %e, "Search failed");
                state.failed_on = self.shared.session.handle();
                state.current.evaluation = Evaluation::Stale {
                    last: state.last_result.clone(),
                    reason: format!("analysis unavailable: {e}"),
                };
            }
        }
        self.publish(&state);
        true
    }

    /// Engine readiness event. Starts a deferred search, or retries a failed
    /// one when the engine has been re-initialized since the failure.
    pub async fn engine_ready(&self) {
        let mut state = self.shared.state.lock().await;
        let wanted = match &state.current.evaluation {
            Evaluation::Pending => true,
            Evaluation::Stale { .. } => self.shared.session.handle() != state.failed_on,
            Evaluation::Ready(_) => false,
        };
        if !wanted {
            return;
        }

        state.current.evaluation = Evaluation::Pending;
        self.schedule_search(&mut state);
        self.publish(&state);
    }

    /// Spawn a task that calls [`Self::engine_ready`] whenever the session
    /// reports `Ready`.
    pub fn watch_engine(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let mut states = self.shared.session.subscribe();
        tokio::spawn(async move {
            loop {
                let ready = *states.borrow_and_update() == SessionState::Ready;
                if ready {
                    coordinator.engine_ready().await;
                }
                if states.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    fn install(
        &self,
        state: &mut State,
        position: Position,
        opening: Option<OpeningInfo>,
        detection: DetectionStatus,
    ) -> PositionVersion {
        let version = state.current.version.next();
        state.current = Analysis {
            version,
            position,
            opening,
            evaluation: Evaluation::Pending,
            detection,
        };
        state.failed_on = None;
        self.schedule_search(state);
        self.publish(state);
        version
    }

    /// Start a search for the current version unless one is already running.
    ///
    /// A running search is never cancelled: its result will fail the version
    /// check and the completion handler calls back in here.
    fn schedule_search(&self, state: &mut State) {
        if !matches!(state.current.evaluation, Evaluation::Pending) {
            return;
        }
        if let Some(in_flight) = state.in_flight {
            debug!(
                %in_flight,
                queued = %state.current.version,
                "Search in flight, queued newer version"
            );
            return;
        }

        // Detected positions skip the validity query; Stockfish crashes on some of them
        if let Err(reason) = validity::check_playable(&state.current.position) {
            warn!(
                version = %state.current.version,
                reason = %reason,
                "Position cannot be searched"
            );
            state.failed_on = self.shared.session.handle();
            state.current.evaluation = Evaluation::Stale {
                last: state.last_result.clone(),
                reason: format!("position cannot be analysed: {reason}"),
            };
            return;
        }

        match self.shared.session.state() {
            SessionState::Ready => {}
            SessionState::Faulted => {
                state.failed_on = None;
                state.current.evaluation = Evaluation::Stale {
                    last: state.last_result.clone(),
                    reason: "analysis unavailable: engine session faulted".to_string(),
                };
                return;
            }
            other => {
                debug!(
                    session = %other,
                    version = %state.current.version,
                    "Engine not ready, search deferred"
                );
                return;
            }
        }

        let version = state.current.version;
        let fen = state.current.fen();
        let depth = self.shared.depth;
        state.in_flight = Some(version);
        debug!(%version, fen = %fen, depth, "Starting search");

        let coordinator = self.clone();
        tokio::spawn(async move {
            let result = coordinator.shared.session.evaluate(&fen, depth).await;
            coordinator.on_search_completed(version, result).await;
        });
    }

    fn publish(&self, state: &State) {
        self.shared.updates.send_replace(state.current.clone());
    }
}
