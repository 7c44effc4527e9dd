//! Codec error types

use thiserror::Error;

/// Why a piece of FEN text could not be decoded into a [`crate::Position`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedPositionError {
    #[error("expected 6 space-separated fields, found {0}")]
    FieldCount(usize),

    #[error("expected 8 ranks in placement, found {0}")]
    RankCount(usize),

    #[error("rank {rank} covers {files} files instead of 8")]
    RankWidth { rank: u8, files: usize },

    #[error("invalid placement character '{0}'")]
    InvalidPiece(char),

    #[error("invalid side to move '{0}'")]
    SideToMove(String),

    #[error("invalid castling field '{0}'")]
    Castling(String),

    #[error("invalid en passant field '{0}'")]
    EnPassant(String),

    #[error("invalid move counter '{0}'")]
    MoveCounter(String),
}

/// Why an opening move list was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpeningError {
    #[error("move pair {index} has {len} half-moves, expected 1 or 2")]
    PairLength { index: usize, len: usize },

    #[error("move pair {index} is missing black's reply but is not the last pair")]
    IncompletePair { index: usize },

    #[error("'{0}' is not a move token")]
    InvalidMove(String),
}
