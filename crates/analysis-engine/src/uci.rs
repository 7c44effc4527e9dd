//! Parsing of UCI engine output into search results.

use std::fmt;

use serde::Serialize;

/// Evaluation from the side to move's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Score {
    Centipawns(i32),
    /// Mate in N moves; negative when the side to move is getting mated.
    Mate(i32),
    Unknown,
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Centipawns(cp) => write!(f, "{:+.2}", f64::from(*cp) / 100.0),
            Score::Mate(n) if *n < 0 => write!(f, "-#{}", -n),
            Score::Mate(n) => write!(f, "#{n}"),
            Score::Unknown => f.write_str("unknown"),
        }
    }
}

/// Outcome of one `go` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    /// Best move in UCI notation (`(none)` when the side to move has no moves)
    pub best_move: String,
    pub ponder: Option<String>,
    pub score: Score,
    /// Depth reported by the progress line the score came from
    pub depth: Option<u32>,
    /// Principal variation from that same progress line
    pub pv: Vec<String>,
}

/// Accumulates search output until the `bestmove` terminator arrives.
#[derive(Debug, Default)]
pub struct SearchCollector {
    last_progress: Option<String>,
}

impl SearchCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output line. Returns the finished result on the terminator.
    pub fn push(&mut self, line: &str) -> Option<SearchResult> {
        if is_progress_line(line) {
            self.last_progress = Some(line.to_string());
            return None;
        }

        let (best_move, ponder) = parse_bestmove(line)?;
        let progress = self.last_progress.as_deref().unwrap_or("");
        Some(SearchResult {
            best_move,
            ponder,
            score: parse_score(progress),
            depth: parse_depth(progress),
            pv: parse_pv(progress),
        })
    }
}

/// `info` lines that carry a `score`. `currmove`, `hashfull` and other stats
/// lines never replace the last scored line, and `info string` chatter is free
/// text even when it mentions a score.
pub fn is_progress_line(line: &str) -> bool {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return false;
    }
    match tokens.next() {
        Some("string") | None => false,
        Some(first) => first == "score" || tokens.any(|t| t == "score"),
    }
}

/// Parse `bestmove <move> [ponder <move>]`.
pub fn parse_bestmove(line: &str) -> Option<(String, Option<String>)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.first() != Some(&"bestmove") {
        return None;
    }
    let best_move = parts.get(1)?.to_string();
    let ponder = match (parts.get(2), parts.get(3)) {
        (Some(&"ponder"), Some(mv)) => Some(mv.to_string()),
        _ => None,
    };
    Some((best_move, ponder))
}

/// Score from a progress line: the token after `cp` or `mate`, else `Unknown`.
pub fn parse_score(line: &str) -> Score {
    let parts: Vec<&str> = line.split_whitespace().collect();
    for (i, part) in parts.iter().enumerate() {
        let value = parts.get(i + 1).and_then(|v| v.parse::<i32>().ok());
        match (*part, value) {
            ("cp", Some(cp)) => return Score::Centipawns(cp),
            ("mate", Some(n)) => return Score::Mate(n),
            ("cp" | "mate", None) => return Score::Unknown,
            _ => {}
        }
    }
    Score::Unknown
}

fn parse_depth(line: &str) -> Option<u32> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    parts
        .iter()
        .position(|p| *p == "depth")
        .and_then(|i| parts.get(i + 1))
        .and_then(|v| v.parse().ok())
}

/// Moves after the `pv` keyword; `pv` is always the last field of an info line.
fn parse_pv(line: &str) -> Vec<String> {
    line.split_whitespace()
        .skip_while(|p| *p != "pv")
        .skip(1)
        .map(str::to_string)
        .collect()
}
