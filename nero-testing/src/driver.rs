use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{info, warn};
use nero_location::{Coordinate, LocationConfig, TrackingMode, distance_meters};
use nero_test_shared::{Route, SimOutcome, prelude::*, replay};

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a JSON route through the location manager and print what a watcher would see
    Replay {
        /// Path to the route file
        route: PathBuf,
        /// Use adaptive real-time tracking instead of a basic watch
        #[arg(long)]
        adaptive: bool,
        /// JSON file overriding the default location config
        #[arg(long)]
        config: Option<PathBuf>,
        /// Minimum movement in meters before a new position is reported
        #[arg(long)]
        threshold: Option<f64>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Great-circle distance between two points, in meters
    #[command(allow_negative_numbers = true)]
    Distance {
        lat1: f64,
        lng1: f64,
        lat2: f64,
        lng2: f64,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

// Paused time lets long routes replay instantly
#[tokio::main(flavor = "current_thread", start_paused = true)]
async fn main() -> Result {
    colog::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            route,
            adaptive,
            config,
            threshold,
            json,
        } => {
            let route: Route = read_json(&route)?;
            let config = config
                .map(|path| read_json::<LocationConfig>(&path))
                .transpose()?
                .unwrap_or_default();

            let mut options = config.watch;
            if threshold.is_some() {
                options.threshold_meters = threshold;
            }

            let mode = if adaptive {
                TrackingMode::Adaptive
            } else {
                TrackingMode::Basic
            };

            let report = replay(&route, mode, config, options).await?;

            if json {
                let out =
                    serde_json::to_string_pretty(&report).context("Failed to encode report")?;
                println!("{out}");
            } else {
                for event in report.events.iter() {
                    match &event.outcome {
                        SimOutcome::Delivered(c) => println!(
                            "{:>8} ms  {:.6}, {:.6}  ±{:.0} m",
                            event.at_ms,
                            c.lat,
                            c.lng,
                            c.accuracy.unwrap_or_default()
                        ),
                        SimOutcome::Error(why) => println!("{:>8} ms  error: {why}", event.at_ms),
                    }
                }
                info!(
                    "{} readings emitted, {} events delivered, {} subscriptions opened",
                    report.emitted,
                    report.events.len(),
                    report.watches_opened
                );
            }

            if report.errors().next().is_some() {
                warn!("Replay surfaced errors to the watcher");
            }
        }
        Commands::Distance {
            lat1,
            lng1,
            lat2,
            lng2,
        } => {
            let now = Utc::now();
            let a = Coordinate::new(lat1, lng1, now);
            let b = Coordinate::new(lat2, lng2, now);
            println!("{:.2}", distance_meters(&a, &b));
        }
    }

    Ok(())
}
