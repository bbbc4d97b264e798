// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! vcrd: the stream-recording control-plane daemon.

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use vcr_daemon::lifecycle;

fn init_tracing(log_dir: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::new(vcr_daemon::env::log_filter());
    if std::fs::create_dir_all(log_dir).is_ok() {
        let appender = tracing_appender::rolling::daily(log_dir, "vcrd.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}

#[tokio::main]
async fn main() {
    let config = match lifecycle::Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("vcrd: {e}");
            std::process::exit(1);
        }
    };

    // Keep the non-blocking writer alive for the life of the process
    let _guard = init_tracing(&config.log_dir);

    let shutdown = CancellationToken::new();
    if let Err(e) = lifecycle::run(config, shutdown).await {
        tracing::error!(%e, "daemon failed");
        eprintln!("vcrd: {e}");
        std::process::exit(1);
    }
}
