//! Position model: placement grid, side to move and castling rights.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MalformedPositionError;
use crate::fen;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// FEN side-to-move letter.
    pub fn to_char(self) -> char {
        match self {
            Color::White => 'w',
            Color::Black => 'b',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'w' => Some(Color::White),
            'b' => Some(Color::Black),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    /// Lowercase FEN letter.
    pub fn letter(self) -> char {
        match self {
            PieceKind::Pawn => 'p',
            PieceKind::Knight => 'n',
            PieceKind::Bishop => 'b',
            PieceKind::Rook => 'r',
            PieceKind::Queen => 'q',
            PieceKind::King => 'k',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c {
            'p' => Some(PieceKind::Pawn),
            'n' => Some(PieceKind::Knight),
            'b' => Some(PieceKind::Bishop),
            'r' => Some(PieceKind::Rook),
            'q' => Some(PieceKind::Queen),
            'k' => Some(PieceKind::King),
            _ => None,
        }
    }
}

/// One of the 12 color × kind combinations a square can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Piece {
    pub color: Color,
    pub kind: PieceKind,
}

impl Piece {
    pub const fn new(color: Color, kind: PieceKind) -> Self {
        Self { color, kind }
    }

    /// Parse a FEN piece letter (uppercase = white).
    pub fn from_char(c: char) -> Option<Self> {
        let kind = PieceKind::from_letter(c.to_ascii_lowercase())?;
        let color = if c.is_ascii_uppercase() {
            Color::White
        } else {
            Color::Black
        };
        Some(Self { color, kind })
    }

    pub fn to_char(self) -> char {
        match self.color {
            Color::White => self.kind.letter().to_ascii_uppercase(),
            Color::Black => self.kind.letter(),
        }
    }
}

/// A board square. `file` 0..8 is a..h, `rank` 0..8 is 1..8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Square {
    file: u8,
    rank: u8,
}

impl Square {
    /// Returns `None` when either coordinate is off the board.
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        (file < 8 && rank < 8).then_some(Self { file, rank })
    }

    pub fn file(self) -> u8 {
        self.file
    }

    pub fn rank(self) -> u8 {
        self.rank
    }

    fn index(self) -> usize {
        usize::from(self.rank) * 8 + usize::from(self.file)
    }
}

impl FromStr for Square {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 2 {
            return Err(());
        }
        let file = bytes[0].wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        Square::new(file, rank).ok_or(())
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", char::from(b'a' + self.file), self.rank + 1)
    }
}

/// The four independent castling flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CastlingRights {
    pub white_king_side: bool,
    pub white_queen_side: bool,
    pub black_king_side: bool,
    pub black_queen_side: bool,
}

impl CastlingRights {
    pub const ALL: Self = Self {
        white_king_side: true,
        white_queen_side: true,
        black_king_side: true,
        black_queen_side: true,
    };

    pub const NONE: Self = Self {
        white_king_side: false,
        white_queen_side: false,
        black_king_side: false,
        black_queen_side: false,
    };

    pub fn is_empty(self) -> bool {
        self == Self::NONE
    }
}

/// An immutable chess board state.
///
/// Only structure is guaranteed: 64 squares, each empty or holding one of the
/// 12 pieces. Whether the position is reachable or playable is a separate
/// question answered by [`crate::validity`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Position {
    squares: [Option<Piece>; 64],
    side_to_move: Color,
    castling: CastlingRights,
}

impl Position {
    pub fn empty() -> Self {
        Self {
            squares: [None; 64],
            side_to_move: Color::White,
            castling: CastlingRights::NONE,
        }
    }

    /// Standard starting position, white to move, all castling rights.
    pub fn starting() -> Self {
        const BACK_RANK: [PieceKind; 8] = [
            PieceKind::Rook,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Queen,
            PieceKind::King,
            PieceKind::Bishop,
            PieceKind::Knight,
            PieceKind::Rook,
        ];

        let mut squares = [None; 64];
        for (file, kind) in BACK_RANK.iter().enumerate() {
            squares[file] = Some(Piece::new(Color::White, *kind));
            squares[8 + file] = Some(Piece::new(Color::White, PieceKind::Pawn));
            squares[48 + file] = Some(Piece::new(Color::Black, PieceKind::Pawn));
            squares[56 + file] = Some(Piece::new(Color::Black, *kind));
        }

        Self {
            squares,
            side_to_move: Color::White,
            castling: CastlingRights::ALL,
        }
    }

    pub(crate) fn from_parts(
        squares: [Option<Piece>; 64],
        side_to_move: Color,
        castling: CastlingRights,
    ) -> Self {
        Self {
            squares,
            side_to_move,
            castling,
        }
    }

    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.squares[square.index()]
    }

    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    pub fn castling(&self) -> CastlingRights {
        self.castling
    }

    /// Copy of this position with `square` set to `piece` (or cleared).
    pub fn with_piece(&self, square: Square, piece: Option<Piece>) -> Self {
        let mut next = self.clone();
        next.squares[square.index()] = piece;
        next
    }

    pub fn with_side_to_move(&self, side: Color) -> Self {
        Self {
            side_to_move: side,
            ..self.clone()
        }
    }

    pub fn with_castling(&self, castling: CastlingRights) -> Self {
        Self {
            castling,
            ..self.clone()
        }
    }

    /// Rows from rank 8 down to rank 1, each from the a-file to the h-file.
    /// This is the order a board is displayed in and encoded in.
    pub fn rows(&self) -> impl Iterator<Item = &[Option<Piece>]> + '_ {
        self.squares.chunks(8).rev()
    }

    pub fn piece_count(&self) -> usize {
        self.squares.iter().flatten().count()
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::starting()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&fen::encode(self))
    }
}

impl FromStr for Position {
    type Err = MalformedPositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        fen::decode(s)
    }
}

impl From<Position> for String {
    fn from(position: Position) -> Self {
        fen::encode(&position)
    }
}

impl TryFrom<String> for Position {
    type Error = MalformedPositionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        fen::decode(&value)
    }
}
