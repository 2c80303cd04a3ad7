// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


//! Wires the recovery log, the broker and the HTTP server into one process.

pub mod settings;

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

pub use settings::{AppConfig, FlushPolicy, RecoverySettings};
use lmq_broker::Broker;
use lmq_common_storage_recovery::{
    CompactionReport, RecoveryLog, RecoveryLogBuilder, compact,
};
use lmq_server::{ServiceHandler, http::start_rest_server, routes::queue_routes};
use smart_default::SmartDefault;
use snafu::{ResultExt, Whatever};
use tokio::{sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Represents the main application with lifecycle management
#[derive(SmartDefault)]
pub struct App {
    /// Application configuration
    pub config:             AppConfig,
    /// Controls if the application should continue running
    #[default(_code = "Arc::new(AtomicBool::new(false))")]
    pub running:            Arc<AtomicBool>,
    /// Cancelled once servers are stopped and the recovery log is flushed
    #[default(_code = "CancellationToken::new()")]
    pub cancellation_token: CancellationToken,
}

impl AppConfig {
    #[must_use]
    pub fn open(self) -> App {
        App {
            config: self,
            ..Default::default()
        }
    }

    /// Compact the recovery directory.
    ///
    /// Safe while a server is appending to the same directory: the newest
    /// segment, the only one a writer may still have open, is left alone.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be read or a baseline cannot be
    /// written.
    pub fn compact(&self) -> Result<CompactionReport, Whatever> {
        info!(dir = ?self.recovery.dir, "Compacting recovery log");
        let report = compact(&self.recovery.dir, &self.recovery.roll_strategy())
            .whatever_context("Failed to compact recovery log")?;
        info!(
            segments = report.segments_compacted,
            baselines = report.baselines_written,
            records = report.records_written,
            malformed = report.malformed,
            "Compaction finished"
        );
        Ok(report)
    }
}

/// Handle for controlling a running application
pub struct AppHandle {
    /// Sender for triggering shutdown
    shutdown_tx:        Option<oneshot::Sender<()>>,
    /// Application running flag
    running:            Arc<AtomicBool>,
    /// Cancellation token
    cancellation_token: CancellationToken,
    /// Addresses the REST server is bound to
    local_addrs:        Vec<SocketAddr>,
    lifecycle:          Option<JoinHandle<()>>,
}

impl AppHandle {
    /// Gracefully shutdown the application
    pub fn shutdown(&mut self) {
        info!("Initiating graceful shutdown");
        self.running.store(false, Ordering::SeqCst);

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Check if the application is still running
    #[must_use]
    pub fn is_running(&self) -> bool { self.running.load(Ordering::SeqCst) }

    #[must_use]
    pub fn local_addrs(&self) -> &[SocketAddr] { &self.local_addrs }

    /// Wait until servers are stopped and the recovery log is flushed.
    pub async fn wait_for_shutdown(&mut self) {
        self.cancellation_token.cancelled().await;
        if let Some(lifecycle) = self.lifecycle.take() {
            let _ = lifecycle.await;
        }
    }
}

impl App {
    /// Start the application and return a handle for controlling it
    ///
    /// Replays the recovery log into a fresh broker before any listener is
    /// bound, so the first request already sees the restored queues.
    ///
    /// # Errors
    ///
    /// Fails if the recovery log cannot be opened or an address cannot be
    /// bound.
    pub async fn start(&self) -> Result<AppHandle, Whatever> {
        info!(version = env!("CARGO_PKG_VERSION"), "Starting lmq");

        self.running.store(true, Ordering::SeqCst);

        let (log, replay) =
            RecoveryLogBuilder::from_config(self.config.recovery.to_recovery_config())
                .build()
                .whatever_context("Failed to open recovery log")?;
        let appender = match log.create_appender() {
            Ok(appender) => appender,
            Err(e) => {
                close_log(log).await;
                return Err(e).whatever_context("Failed to create recovery appender");
            }
        };

        let broker = Arc::new(Broker::new(&self.config.broker, Arc::new(appender)));
        let restored = broker.restore(&replay.tally);
        info!(
            segments = replay.report.segments,
            records = replay.report.records,
            malformed = replay.report.malformed,
            queues = restored.queues,
            messages = restored.messages,
            "Recovered queues"
        );

        let mut http_handle =
            match start_rest_server(self.config.http.clone(), vec![queue_routes(broker)]).await {
                Ok(handle) => handle,
                Err(e) => {
                    close_log(log).await;
                    return Err(e).whatever_context("Failed to start REST server");
                }
            };
        http_handle
            .wait_for_start()
            .await
            .whatever_context("REST server failed to start")?;
        let local_addrs = http_handle.local_addrs().to_vec();

        info!(addrs = ?local_addrs, "Application started successfully");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let running = Arc::clone(&self.running);
        let cancellation_token = self.cancellation_token.clone();
        let enable_graceful_shutdown = self.config.enable_graceful_shutdown;

        let lifecycle = tokio::spawn(async move {
            if enable_graceful_shutdown {
                shutdown_signal(shutdown_rx).await;
            } else {
                let _ = shutdown_rx.await;
            }

            running.store(false, Ordering::SeqCst);
            stop(http_handle, log).await;
            cancellation_token.cancel();

            info!("Application shutdown complete");
        });

        Ok(AppHandle {
            shutdown_tx: Some(shutdown_tx),
            running: Arc::clone(&self.running),
            cancellation_token: self.cancellation_token.clone(),
            local_addrs,
            lifecycle: Some(lifecycle),
        })
    }

    /// Run the application blocking until it's shut down
    ///
    /// # Errors
    ///
    /// Fails if the application cannot start.
    pub async fn run(self) -> Result<(), Whatever> {
        let mut handle = self.start().await?;
        handle.wait_for_shutdown().await;
        Ok(())
    }
}

/// Stop accepting requests, then drain the recovery log.
async fn stop(http_handle: ServiceHandler, log: RecoveryLog) {
    info!("Shutting down servers");
    http_handle.shutdown();
    if let Err(e) = http_handle.wait_for_stop().await {
        warn!(error = %e, "REST server did not stop cleanly");
    }
    close_log(log).await;
}

async fn close_log(log: RecoveryLog) {
    info!("Flushing recovery log");
    match tokio::task::spawn_blocking(move || log.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Recovery log shutdown failed"),
        Err(e) => error!(error = %e, "Recovery log shutdown panicked"),
    }
}

async fn shutdown_signal(shutdown_rx: oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C signal"); },
        () = terminate => { info!("Received terminate signal"); },
        _ = shutdown_rx => { info!("Received shutdown signal"); },
    }
}
