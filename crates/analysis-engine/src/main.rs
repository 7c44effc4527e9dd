//! KnightVision analysis CLI
//!
//! Analyses one board position with a local Stockfish, either from FEN given
//! on the command line or from a board photo sent to the detection server.
//!
//!   knightvision --fen "<FEN>" [--depth N]
//!   knightvision --image board.jpg [--orientation left|top|right|bottom] [--depth N]

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn};

use analysis_engine::{
    Coordinator, DetectionClient, EngineConfig, EngineSession, Evaluation, Orientation,
};

enum Input {
    Fen(String),
    Image {
        path: String,
        orientation: Orientation,
    },
}

struct Args {
    input: Input,
    depth: Option<u32>,
}

/// Value following `flag` on the command line
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();

    let depth = match flag_value(&args, "--depth") {
        Some(v) => Some(v.parse().with_context(|| format!("invalid --depth '{v}'"))?),
        None => None,
    };
    if depth == Some(0) {
        bail!("--depth must be at least 1");
    }

    let input = if let Some(fen) = flag_value(&args, "--fen") {
        Input::Fen(fen)
    } else if let Some(path) = flag_value(&args, "--image") {
        let orientation = match flag_value(&args, "--orientation") {
            Some(v) => v.parse().map_err(anyhow::Error::msg)?,
            None => Orientation::default(),
        };
        Input::Image { path, orientation }
    } else {
        bail!(
            "usage: knightvision (--fen <FEN> | --image <path> [--orientation <o>]) [--depth <n>]"
        );
    };

    Ok(Args { input, depth })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let args = parse_args()?;
    let mut config = EngineConfig::load()?;
    if let Some(depth) = args.depth {
        config.search_depth = depth;
    }
    info!(
        stockfish_path = %config.stockfish_path,
        depth = config.search_depth,
        "Analysis config loaded"
    );

    let session = Arc::new(EngineSession::from_config(&config));
    let coordinator = Coordinator::new(session.clone(), config.search_depth);
    let watcher = coordinator.watch_engine();

    match args.input {
        Input::Fen(fen) => {
            coordinator.accept_detected_position(&fen, None).await?;
        }
        Input::Image { path, orientation } => {
            let server = config
                .detection_server
                .as_deref()
                .context("DETECTION_SERVER must be set to analyse images")?;
            let client = DetectionClient::new(server, config.detection_timeout)?;
            let image = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read image {path}"))?;

            info!(server = %client.base_url(), %orientation, "Sending board photo for detection");
            coordinator
                .request_detection(&client, image, orientation)
                .await
                .await??;
        }
    }

    // Started after the input so the starting position is never searched
    session
        .initialize()
        .await
        .context("Stockfish could not be started")?;

    let analysis = coordinator.settled().await;
    if let Evaluation::Stale { reason, .. } = &analysis.evaluation {
        warn!(reason = %reason, "No evaluation for this position");
    }
    println!("{}", serde_json::to_string_pretty(&analysis)?);

    watcher.abort();
    session.shutdown().await;
    Ok(())
}
