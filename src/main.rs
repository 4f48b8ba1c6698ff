/*
 *  main.rs
 *
 *  wallboard - worth a glance
 *  (c) 2020-26 Stuart Hunter
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use anyhow::Context;
use env_logger::Env;
use log::{error, info, warn};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

#[cfg(unix)] // Only compile this block on Unix-like systems
use tokio::signal::unix::{signal, SignalKind}; // Import specific Unix signals

use wallboard::config;
use wallboard::{Board, CredentialManager};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

const REPORT_EVERY: Duration = Duration::from_secs(60);

#[cfg(unix)]
async fn signal_handler() -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received. Initiating graceful shutdown.");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received. Initiating graceful shutdown.");
        }
        _ = sighup.recv() => {
            info!("SIGHUP received. Initiating graceful shutdown.");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn signal_handler() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received. Initiating graceful shutdown.");
    Ok(())
}

/// Log a one-line board summary every minute.
async fn report(board: &Board) {
    let mut ticker = tokio::time::interval_at(Instant::now() + REPORT_EVERY, REPORT_EVERY);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let snapshot = board.snapshot();
        info!("{}", snapshot.summary());
        if log::log_enabled!(log::Level::Debug) {
            match serde_json::to_string(&snapshot) {
                Ok(json) => log::debug!("snapshot: {json}"),
                Err(e) => warn!("snapshot not serializable: {e}"),
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load().context("loading configuration")?;

    // Initialize the logger with the configured level
    let level = cfg.log_level.clone().unwrap_or_else(|| "info".to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();

    info!("This {} worth a glance", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);

    // a restored credential spares the photo panel its first sign-in
    let credentials = CredentialManager::from_config(&cfg.photos());
    credentials.restore();

    let board = Board::new(&cfg, credentials).context("building the board")?;
    board.start();

    tokio::select! {
        // Handle signals for graceful shutdown
        res = signal_handler() => {
            if let Err(e) = res {
                error!("Signal handling unavailable: {}", e);
            }
        }
        _ = report(&board) => {}
    }

    board.stop();
    info!("Shutdown complete.");
    Ok(())
}
