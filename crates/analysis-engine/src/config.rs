//! Analysis configuration from environment variables

use std::env;
use std::time::Duration;

use tracing::info;

use crate::error::AnalysisError;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Path to Stockfish binary
    pub stockfish_path: String,

    /// Depth bound for every `go` command
    pub search_depth: u32,

    /// Bound on a single search before `stop` is sent
    pub search_timeout: Duration,

    /// Bound on the UCI handshake and on one-shot commands
    pub handshake_timeout: Duration,

    /// Time allowed for `bestmove` after `stop`
    pub stop_grace: Duration,

    /// Engine `Threads` option
    pub threads: u32,

    /// Engine `Hash` option in MB
    pub hash_mb: u32,

    /// Address of the board detection server (`host:port` or a full URL)
    pub detection_server: Option<String>,

    /// Read timeout for detection requests
    pub detection_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stockfish_path: "/usr/local/bin/stockfish".to_string(),
            search_depth: 10,
            search_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_millis(2000),
            threads: 1,
            hash_mb: 16,
            detection_server: None,
            detection_timeout: Duration::from_secs(90),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, AnalysisError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; unparseable numbers fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AnalysisError> {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let stockfish_path = lookup("STOCKFISH_PATH").unwrap_or(defaults.stockfish_path);

        let search_depth = number("SEARCH_DEPTH")
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
            .unwrap_or(defaults.search_depth);
        if search_depth == 0 {
            return Err(AnalysisError::Config("SEARCH_DEPTH must be at least 1"));
        }

        let search_timeout = number("SEARCH_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.search_timeout);

        let handshake_timeout = number("HANDSHAKE_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.handshake_timeout);

        let stop_grace = number("STOP_GRACE_MILLIS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.stop_grace);

        let threads = number("ENGINE_THREADS")
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.threads);

        let hash_mb = number("ENGINE_HASH_MB")
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.hash_mb);

        let detection_server = lookup("DETECTION_SERVER").filter(|v| !v.trim().is_empty());
        if let Some(server) = &detection_server {
            info!(server = %server, "Board detection enabled");
        }

        let detection_timeout = number("DETECTION_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.detection_timeout);

        Ok(Self {
            stockfish_path,
            search_depth,
            search_timeout,
            handshake_timeout,
            stop_grace,
            threads,
            hash_mb,
            detection_server,
            detection_timeout,
        })
    }
}
