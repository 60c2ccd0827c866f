use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Coordinates graceful shutdown: stops the accept loop, then waits for
/// in-flight requests to drain within the timeout.
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    is_shutting_down: AtomicBool,
    active_connections: AtomicUsize,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout_secs: u64) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx,
            is_shutting_down: AtomicBool::new(false),
            active_connections: AtomicUsize::new(0),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Flag shutdown, notify the accept loop and wait for connections to
    /// finish. Pending audit writes ride on the runtime and flush with it.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown...");

        self.is_shutting_down.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());

        let start = Instant::now();
        loop {
            let active = self.active_connections();
            if active == 0 {
                info!("All connections drained");
                return Ok(());
            }
            if start.elapsed() > self.timeout {
                warn!(
                    "Shutdown timeout ({}s) reached with {} connection(s) still open",
                    self.timeout.as_secs(),
                    active
                );
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}

/// Wait for SIGTERM/SIGINT and run the coordinated shutdown.
pub async fn setup_signal_handler(coordinator: Arc<ShutdownCoordinator>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM signal");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT signal (Ctrl+C)");
        }
    }

    if let Err(e) = coordinator.shutdown().await {
        warn!("Error during graceful shutdown: {}", e);
    }
}
