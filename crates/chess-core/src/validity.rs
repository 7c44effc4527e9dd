//! Playability check for structurally valid positions.
//!
//! A decoded [`Position`] only guarantees a well-formed grid. Engines such as
//! Stockfish assume more (one king per side, no pawns on the back ranks, the
//! side not to move is not in check, castling rights backed by a king and
//! rook) and can crash on input that breaks those assumptions. This module
//! answers that question with `shakmaty` before anything reaches an engine.

use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess};

use crate::fen;
use crate::position::Position;

/// Returns a human-readable reason when the position cannot be played from.
pub fn check_playable(position: &Position) -> Result<(), String> {
    let text = fen::encode(position);
    let setup: Fen = text.parse().map_err(|e| format!("{e}"))?;
    setup
        .into_position::<Chess>(CastlingMode::Standard)
        .map(|_| ())
        .map_err(|e| format!("{e}"))
}

pub fn is_playable(position: &Position) -> bool {
    check_playable(position).is_ok()
}
