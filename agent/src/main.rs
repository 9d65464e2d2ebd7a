//! Navigation Agent - live route tracking against the Google Directions API
//!
//! Reads line-delimited JSON from stdin:
//! - Location fixes (`{"lat": .., "lng": ..}`)
//! - Navigator commands (`{"command": "requestRoutePreview", ...}`)
//! - Agent controls (`{"control": "requestStateRefresh"}`)
//!
//! Every state change and command status is written to stdout as one JSON
//! line. Logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::Parser;
use nav_core::geo::Position;
use nav_core::{EngineConfig, NavEngine, NavigatorHandle, NavRequest};
use nav_env::{LatLng, TokioContext};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod directions;
mod feed;

use directions::GoogleDirections;
use feed::{Control, FeedLine, LatestFix, PositionFeed};

/// Navigation agent
#[derive(Parser, Debug)]
#[command(name = "nav-agent")]
#[command(about = "Track a vehicle along Google Directions routes", long_about = None)]
struct Args {
    /// Engine configuration file (JSON, every field optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial vehicle position as LAT,LNG
    #[arg(short, long, value_parser = parse_origin)]
    origin: Option<LatLng>,
}

fn parse_origin(text: &str) -> Result<LatLng, String> {
    let (lat, lng) = text
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LNG, got {:?}", text))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("latitude: {}", e))?;
    let lng: f64 = lng.trim().parse().map_err(|e| format!("longitude: {}", e))?;
    Ok(LatLng::new(lat, lng))
}

/// Submits a command and prints its status once the Navigator replies.
fn dispatch(handle: &NavigatorHandle, request: NavRequest) {
    let label = match &request {
        NavRequest::RequestRoutePreview { .. } => "requestRoutePreview",
        NavRequest::ClearRoutePreview => "clearRoutePreview",
        NavRequest::ConfirmRoutePreview => "confirmRoutePreview",
        NavRequest::EndNavigation => "endNavigation",
    };
    let handle = handle.clone();
    tokio::spawn(async move {
        match handle.call(request).await {
            Ok(status) => {
                let line = serde_json::json!({ "command": label, "status": status });
                println!("{}", line);
            }
            Err(e) => error!("{} failed: {}", label, e),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig {
            name: "nav-agent".to_string(),
            ..EngineConfig::default()
        },
    };

    let api_key = match std::env::var("GOOGLE_MAPS_API_KEY") {
        Ok(key) if !key.trim().is_empty() => key,
        _ => bail!("GOOGLE_MAPS_API_KEY is not set"),
    };
    let provider = Arc::new(GoogleDirections::new(api_key)?);

    let context = TokioContext::shared();
    let period = config.tick_period();
    let mut engine = NavEngine::new(context, provider, config);

    let latest: LatestFix = Arc::new(Mutex::new(None));
    if let Some(origin) = args.origin {
        let origin = Position::try_from(origin).context("invalid --origin")?;
        *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(origin);
    }
    engine.add_subsystem(Box::new(PositionFeed::new(Arc::clone(&latest))));

    let mut changes = engine.subscribe_channel();
    tokio::spawn(async move {
        while let Some(change) = changes.recv().await {
            match serde_json::to_string(&change) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to encode {:?} change: {}", change.key, e),
            }
        }
    });

    let handle = engine.handle();
    engine.start()?;
    info!("Agent ready, reading fixes and commands from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                engine.step()?;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match FeedLine::parse(&line) {
                    Ok(FeedLine::Fix(ll)) => match Position::try_from(ll) {
                        Ok(fix) => *latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(fix),
                        Err(e) => warn!("Ignoring fix {}: {}", ll, e),
                    },
                    Ok(FeedLine::Command(request)) => {
                        debug!("Command {:?}", request);
                        dispatch(&handle, request);
                    }
                    Ok(FeedLine::Control(Control::RequestStateRefresh)) => engine.state_mut().replay(),
                    Ok(FeedLine::Control(Control::Shutdown)) => break,
                    Err(e) => warn!("Unrecognized input {:?}: {}", line, e),
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
        }
    }

    engine.stop()?;
    info!("Agent stopped after {} ticks", engine.current_tick());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origin() {
        assert_eq!(parse_origin("41.1, -78.7").unwrap(), LatLng::new(41.1, -78.7));
        assert!(parse_origin("41.1").is_err());
        assert!(parse_origin("north,-78.7").is_err());
    }
}
