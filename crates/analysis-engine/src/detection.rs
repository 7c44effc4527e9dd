//! HTTP client for the board detection service.
//!
//! The service takes a photo of a board and answers with the position as FEN
//! and, when it recognises one, the opening that leads to it. The response is
//! decoded into typed structs; any missing or mismatched field fails the whole
//! detection rather than surfacing later.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chess_core::OpeningInfo;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::DetectionError;

/// Which edge of the photo white's side of the board is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Orientation {
    #[default]
    Left,
    Top,
    Right,
    Bottom,
}

impl Orientation {
    pub const ALL: [Orientation; 4] = [
        Orientation::Left,
        Orientation::Top,
        Orientation::Right,
        Orientation::Bottom,
    ];

    /// Query parameter value.
    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Left => "left",
            Orientation::Top => "top",
            Orientation::Right => "right",
            Orientation::Bottom => "bottom",
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Orientation::ALL
            .into_iter()
            .find(|o| o.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown orientation '{s}'"))
    }
}

/// What the detection service saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedBoard {
    /// FEN text, not yet decoded
    pub fen: String,
    pub opening: Option<OpeningInfo>,
}

#[derive(Deserialize)]
struct ParseBoardResponse {
    fen: String,
    #[serde(default)]
    opening: Option<OpeningResponse>,
}

#[derive(Deserialize)]
struct OpeningResponse {
    name: String,
    #[serde(default)]
    moves: Vec<Vec<String>>,
}

#[derive(Clone)]
pub struct DetectionClient {
    client: Client,
    base_url: String,
}

impl DetectionClient {
    /// `server` is either `host:port` (plain HTTP) or a full base URL.
    pub fn new(server: &str, read_timeout: Duration) -> Result<Self, DetectionError> {
        let client = Client::builder()
            .user_agent(concat!("KnightVision/", env!("CARGO_PKG_VERSION")))
            .timeout(read_timeout)
            .build()?;

        let server = server.trim().trim_end_matches('/');
        let base_url = if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("http://{server}")
        };

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one board photo for detection.
    pub async fn detect(
        &self,
        image: Vec<u8>,
        orientation: Orientation,
    ) -> Result<DetectedBoard, DetectionError> {
        let url = format!("{}/parse-board", self.base_url);
        debug!(url = %url, %orientation, bytes = image.len(), "Requesting board detection");

        let resp = self
            .client
            .post(&url)
            .query(&[("orientation", orientation.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(image)
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "Board detection failed");
            return Err(DetectionError::Status(resp.status()));
        }

        let body = resp.bytes().await?;
        decode_response(&body)
    }
}

/// Typed decode of a `/parse-board` response body.
pub fn decode_response(body: &[u8]) -> Result<DetectedBoard, DetectionError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(DetectionError::EmptyBody);
    }

    let parsed: ParseBoardResponse = serde_json::from_slice(body)?;
    if parsed.fen.trim().is_empty() {
        return Err(DetectionError::EmptyBody);
    }

    let opening = parsed
        .opening
        .map(|o| OpeningInfo::new(o.name, o.moves))
        .transpose()?;

    Ok(DetectedBoard {
        fen: parsed.fen.trim().to_string(),
        opening,
    })
}
