//! Board representation shared by the KnightVision analysis crates.
//!
//! [`Position`] is the canonical board model (placement, side to move,
//! castling rights). [`fen`] converts it to and from FEN text, [`opening`]
//! carries the opening information attached by the detection service and
//! [`validity`] decides whether a structurally valid position is safe to hand
//! to an engine.

pub mod error;
pub mod fen;
pub mod opening;
pub mod position;
pub mod validity;

pub use error::{MalformedPositionError, OpeningError};
pub use opening::{MovePair, OpeningInfo};
pub use position::{CastlingRights, Color, Piece, PieceKind, Position, Square};

pub use shakmaty;
