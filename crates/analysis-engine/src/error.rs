//! Error types for the engine session, detection client and coordinator

use std::time::Duration;

use chess_core::{MalformedPositionError, OpeningError};
use thiserror::Error;

use crate::stockfish::SessionState;

/// Session-level failures. Anything other than `InvalidState` means the
/// caller should treat analysis as unavailable until `initialize()` succeeds.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine failed to start: {0}")]
    Start(String),

    #[error("Search did not finish within {0:?}")]
    SearchTimeout(Duration),

    #[error("Engine session faulted: {0}")]
    Faulted(String),

    #[error("Engine session is {actual}, expected {expected}")]
    InvalidState {
        expected: SessionState,
        actual: SessionState,
    },

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The board detection service could not produce a usable answer.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Detection request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Detection service returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("Detection service returned an empty body")]
    EmptyBody,

    #[error("Detection response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Detection response has invalid opening moves: {0}")]
    Opening(#[from] OpeningError),
}

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Configuration error: {0}")]
    Config(&'static str),

    #[error("Malformed position: {0}")]
    Malformed(#[from] MalformedPositionError),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    /// A newer position or detection request arrived while this one was out
    #[error("Detection result discarded: superseded by a newer position or request")]
    DetectionSuperseded,
}
