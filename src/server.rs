//! Accept loop and global shutdown sequencing (spec §4.6).

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, ErrorKind, Result};
use crate::registry::Registry;
use crate::task;

/// The single global stop signal. Distinct from each channel's own running
/// flag (`Channel::request_stop`): this one tells the accept loop to stop
/// taking new connections, and fans out to every channel's flag afterward.
#[derive(Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Shutdown { tx }, rx)
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Binds `port` and serves connections until `X`, Ctrl-C, or SIGINT.
pub async fn run(port: u16) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(|e| {
        Error::new(
            ErrorKind::SetupFatal,
            format!("could not bind port {port}: {e}"),
        )
    })?;
    log::info!("listening on port {port}");

    let registry = Arc::new(Registry::new());
    let (shutdown, mut shutdown_rx) = Shutdown::new();

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("received interrupt, shutting down");
            ctrl_c_shutdown.trigger();
        }
    });

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        log::info!("accepted connection from {peer}");
                        let registry = registry.clone();
                        let shutdown = shutdown.clone();
                        tasks.push(tokio::spawn(task::run(stream, peer, registry, shutdown)));
                    }
                    Err(e) => log::warn!("accept failed: {e}"),
                }
            }
            _ = shutdown_rx.changed() => {
                log::info!("no longer accepting new connections");
                break;
            }
        }
    }

    for channel in registry.snapshot().await {
        channel.request_stop();
    }

    for handle in tasks {
        let _ = handle.await;
    }

    log::info!("server shutdown complete, {} channels remained", registry.len().await);
    Ok(())
}
