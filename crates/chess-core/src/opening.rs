//! Opening information attached to a detected position.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::OpeningError;

/// SAN (with optional check/annotation suffix) or UCI coordinate move.
fn move_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"^(?:",
            r"(?:[KQRBN]?[a-h]?[1-8]?x?[a-h][1-8](?:=[QRBN])?|O-O-O|O-O)[+#]?[!?]{0,2}",
            r"|[a-h][1-8][a-h][1-8][qrbn]?",
            r")$",
        ))
        .expect("move token pattern is valid")
    })
}

/// One full move: white's half-move and, unless the line ends on it, black's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<String>", try_from = "Vec<String>")]
pub struct MovePair {
    pub white: String,
    pub black: Option<String>,
}

impl From<MovePair> for Vec<String> {
    fn from(pair: MovePair) -> Self {
        std::iter::once(pair.white).chain(pair.black).collect()
    }
}

impl TryFrom<Vec<String>> for MovePair {
    type Error = OpeningError;

    fn try_from(tokens: Vec<String>) -> Result<Self, Self::Error> {
        Self::from_tokens(0, tokens)
    }
}

impl MovePair {
    fn from_tokens(index: usize, tokens: Vec<String>) -> Result<Self, OpeningError> {
        let len = tokens.len();
        let mut iter = tokens.into_iter();
        let (white, black) = match (iter.next(), iter.next(), len) {
            (Some(white), black, 1 | 2) => (white, black),
            _ => return Err(OpeningError::PairLength { index, len }),
        };

        for token in std::iter::once(&white).chain(black.as_ref()) {
            if !move_token_re().is_match(token) {
                return Err(OpeningError::InvalidMove(token.clone()));
            }
        }

        Ok(Self { white, black })
    }
}

#[derive(Deserialize)]
struct RawOpening {
    name: String,
    #[serde(default)]
    moves: Vec<Vec<String>>,
}

/// Named opening plus the move pairs that reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOpening")]
pub struct OpeningInfo {
    pub name: String,
    pub moves: Vec<MovePair>,
}

impl TryFrom<RawOpening> for OpeningInfo {
    type Error = OpeningError;

    fn try_from(raw: RawOpening) -> Result<Self, Self::Error> {
        Self::new(raw.name, raw.moves)
    }
}

impl OpeningInfo {
    /// Validate raw move pairs. Only the final pair may omit black's move.
    pub fn new(name: impl Into<String>, pairs: Vec<Vec<String>>) -> Result<Self, OpeningError> {
        let count = pairs.len();
        let mut moves = Vec::with_capacity(count);
        for (index, tokens) in pairs.into_iter().enumerate() {
            let pair = MovePair::from_tokens(index, tokens)?;
            if pair.black.is_none() && index + 1 != count {
                return Err(OpeningError::IncompletePair { index });
            }
            moves.push(pair);
        }
        Ok(Self {
            name: name.into(),
            moves,
        })
    }

    /// Numbered move text, e.g. `1. e4 e5 2. Nf3`.
    pub fn move_text(&self) -> String {
        self.moves
            .iter()
            .enumerate()
            .map(|(i, pair)| match &pair.black {
                Some(black) => format!("{}. {} {}", i + 1, pair.white, black),
                None => format!("{}. {}", i + 1, pair.white),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn half_move_count(&self) -> usize {
        self.moves
            .iter()
            .map(|pair| 1 + usize::from(pair.black.is_some()))
            .sum()
    }
}
