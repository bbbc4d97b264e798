// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, background loops, shutdown.
//!
//! Startup order: state dir + exclusive lock → store open (WAL replay) →
//! admin seed → runtime table load → overseer client → event consumer →
//! reconcile/sweep loops. The first overseer connection triggers the
//! startup reconcile through the on-connect path. Shutdown cancels the
//! root token, waits out the drain timeout, and writes a final snapshot.

use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vcr_core::{Role, SystemClock};
use vcr_overseer::{Overseer, OverseerClient, OverseerEvent};
use vcr_storage::{StorageError, Store};

use crate::env;
use crate::manager::Manager;

/// Depth of the overseer event channel between the client read loop and
/// the manager's consumer task.
const EVENT_CHANNEL_DEPTH: usize = 256;

/// Session-expiry sweep cadence.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Errors during daemon startup/shutdown
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot determine state directory (set VCR_STATE_DIR)")]
    NoStateDir,
    #[error("VCR_OVERSEER_URL is required")]
    NoOverseerUrl,
    #[error("another vcrd is already running (lock at {0})")]
    AlreadyRunning(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Daemon path configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/vcr)
    pub state_dir: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Directory holding the WAL and snapshots
    pub store_dir: PathBuf,
    /// Directory for daemon log files
    pub log_dir: PathBuf,
    /// Overseer WebSocket URL
    pub overseer_url: String,
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = env::state_dir()?;
        Ok(Self {
            lock_path: state_dir.join("vcrd.pid"),
            store_dir: state_dir.join("store"),
            log_dir: state_dir.join("logs"),
            overseer_url: env::overseer_url()?,
            state_dir,
        })
    }
}

/// Take the exclusive daemon lock, writing our pid into it.
fn acquire_lock(path: &PathBuf) -> Result<File, LifecycleError> {
    let mut file = File::options().create(true).write(true).truncate(false).open(path)?;
    if file.try_lock_exclusive().is_err() {
        return Err(LifecycleError::AlreadyRunning(path.clone()));
    }
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    Ok(file)
}

/// Run the daemon until `shutdown` fires (or a signal arrives).
pub async fn run(config: Config, shutdown: CancellationToken) -> Result<(), LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;
    // NOTE(lifetime): held to maintain the exclusive file lock; released on drop
    let _lock_file = acquire_lock(&config.lock_path)?;

    let store = Arc::new(Store::open(&config.store_dir)?);
    seed_admin(&store)?;

    let (events_tx, mut events_rx) = mpsc::channel::<OverseerEvent>(EVENT_CHANNEL_DEPTH);
    let client = Arc::new(OverseerClient::new(config.overseer_url.clone(), events_tx));
    let manager = Arc::new(Manager::new(
        store.clone(),
        client.clone() as Arc<dyn Overseer>,
        SystemClock,
    ));

    // Track every source that has an active subscriber; the first Connected
    // event reconciles them against the overseer's task table.
    manager.load_runtime();

    tokio::spawn(client.clone().run(shutdown.child_token()));

    // Event consumer: the only reader of the overseer event channel.
    let consumer = {
        let manager = Arc::clone(&manager);
        let token = shutdown.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events_rx.recv() => match event {
                        Some(event) => manager.handle_event(event).await,
                        None => break,
                    },
                    _ = token.cancelled() => break,
                }
            }
        })
    };

    // Periodic reconcile; the interval is re-read so config changes apply
    // without a restart.
    {
        let manager = Arc::clone(&manager);
        let store = store.clone();
        let token = shutdown.child_token();
        tokio::spawn(async move {
            loop {
                let interval = store
                    .config()
                    .map(|c| c.reconcile_interval())
                    .unwrap_or(Duration::from_secs(60));
                tokio::select! {
                    _ = tokio::time::sleep(interval) => manager.reconcile_once().await,
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    // Hourly session-expiry sweep.
    {
        let store = store.clone();
        let token = shutdown.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(SESSION_SWEEP_INTERVAL) => {
                        match store.sweep_expired_sessions() {
                            Ok(0) => {}
                            Ok(n) => info!(swept = n, "expired sessions removed"),
                            Err(e) => warn!(%e, "session sweep failed"),
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
    }

    info!(state_dir = %config.state_dir.display(), url = %config.overseer_url, "vcrd ready");

    wait_for_shutdown(&shutdown).await;
    info!("shutting down");
    shutdown.cancel();

    let drain = env::drain_timeout();
    let _ = tokio::time::timeout(drain, consumer).await;

    if let Err(e) = store.snapshot_now() {
        warn!(%e, "final snapshot failed");
    }
    Ok(())
}

/// First-boot admin seeding; skipped when the env vars are absent or the
/// user already exists.
fn seed_admin(store: &Store) -> Result<(), LifecycleError> {
    let Some((username, password_hash)) = env::admin_seed() else {
        return Ok(());
    };
    if store.user_by_name(&username).is_some() {
        return Ok(());
    }
    store.create_user(&username, &password_hash, Role::Admin)?;
    info!(%username, "seeded admin user");
    Ok(())
}

async fn wait_for_shutdown(shutdown: &CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(%e, "failed to install SIGTERM handler");
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = shutdown.cancelled() => {}
                }
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = ctrl_c => {}
            _ = shutdown.cancelled() => {}
        }
    }
}
