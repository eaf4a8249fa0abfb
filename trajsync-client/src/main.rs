//! trajsync: command-line client for the trajectory schedule server
//!
//! Connects to the server, then either prints the server clock or polls a
//! floor and prints a summary of every trajectory update.

use std::sync::Arc;

use clap::Parser;

use trajsync_client::cli::{Cli, Command};
use trajsync_client::{
    raw_knots_to_knots, ClientConfig, ConflictAnalysis, DefaultTrajectoryManager, KnotSpline,
    TrajectoryManager, TrajectoryObserver, TrajectoryPoller, TrajectorySnapshot,
};
use trajsync_protocol::TimeParam;
use trajsync_utils::{init_logging, log_file_path, Result, TrajsyncError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_config()) {
        eprintln!("Warning: {}", e);
    } else if cli.log_file {
        tracing::debug!(path = %log_file_path().display(), "Writing log file");
    }

    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from_path(path)?,
        None => ClientConfig::load_default(),
    };
    let addr = config.resolve_address(cli.addr.as_deref());

    let manager = DefaultTrajectoryManager::connect(&addr, config.channel_options()).await?;
    tracing::info!(addr = %addr, "Connected to schedule server");

    let result = match cli.command {
        Command::Time => manager
            .server_time(TimeParam {})
            .await
            .map(|time| println!("{:.0}", time.millis())),
        Command::Watch {
            map_name,
            speed,
            lookahead_ms,
            once,
            step_ms,
        } => {
            if let Some(speed) = speed {
                config.trajectory.animation_speed = speed;
            }
            if let Some(lookahead_ms) = lookahead_ms {
                config.trajectory.lookahead_ms = lookahead_ms;
            }
            watch(&manager, &config, map_name, once, step_ms).await
        }
    };

    manager.close().await;
    result
}

async fn watch(
    manager: &DefaultTrajectoryManager,
    config: &ClientConfig,
    map_name: String,
    once: bool,
    step_ms: f64,
) -> Result<()> {
    let poller = TrajectoryPoller::new(manager.clone(), config.poll_settings());
    poller.add_observer(Arc::new(SummaryPrinter { step_ms })).await;
    let mut updates = poller.subscribe();

    tracing::info!(
        map_name = %map_name,
        animation = ?config.trajectory.animation,
        animation_scale = config.trajectory.animation_scale(),
        "Watching trajectories"
    );
    poller.select_floor(map_name).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let closed = manager.channel().closed();
    tokio::pin!(closed);

    let result = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break Ok(());
            }
            _ = &mut closed => {
                break Err(TrajsyncError::ChannelClosed);
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                if once && updates.borrow_and_update().is_some() {
                    break Ok(());
                }
            }
        }
    };

    poller.deselect().await;
    result
}

/// Prints one block per update: trajectories, their time span and the
/// conflict split
struct SummaryPrinter {
    step_ms: f64,
}

impl TrajectoryObserver for SummaryPrinter {
    fn on_update(&self, snapshot: &TrajectorySnapshot) {
        let analysis = ConflictAnalysis::from_response(&snapshot.response);
        println!(
            "[{}] {} trajectories, {} conflicts, {} shared positions",
            snapshot.map_name,
            snapshot.trajectories().len(),
            snapshot.conflicts().len(),
            analysis.shared_positions.len()
        );

        for trajectory in snapshot.trajectories() {
            let spline = KnotSpline::new(raw_knots_to_knots(&trajectory.segments));
            match (spline.start_time(), spline.end_time()) {
                (Some(start), Some(end)) => println!(
                    "  robot {} ({}): {} knots, {:.0}..{:.0} ms, {} samples",
                    trajectory.id,
                    trajectory.shape,
                    spline.knots().len(),
                    start,
                    end,
                    spline.samples(self.step_ms).count()
                ),
                _ => println!("  robot {} ({}): no knots", trajectory.id, trajectory.shape),
            }

            if let Some(split) = analysis.split(trajectory.id) {
                println!(
                    "    {} conflicting, {} free",
                    split.conflict_segments.len(),
                    split.non_conflict_segments.len()
                );
            }
        }
    }
}
