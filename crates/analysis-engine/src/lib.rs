//! Board analysis core: a single-flight UCI engine session, the evaluation
//! coordinator that versions the authoritative position, and the client for
//! the board detection service.

pub mod config;
pub mod coordinator;
pub mod detection;
pub mod error;
pub mod stockfish;
pub mod uci;

pub use config::EngineConfig;
pub use coordinator::{Analysis, Coordinator, DetectionStatus, Evaluation, PositionVersion};
pub use detection::{DetectedBoard, DetectionClient, Orientation};
pub use error::{AnalysisError, DetectionError, EngineError};
pub use stockfish::{
    EngineIo, EngineLauncher, EngineSession, ProcessLauncher, SessionHandle, SessionOptions,
    SessionState,
};
pub use uci::{Score, SearchResult};

pub use chess_core;
