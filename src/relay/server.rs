//! Relay server
//!
//! Accepts connections on a Unix domain socket, applies `register`,
//! `disconnect` and `event` frames to the channel registry, and fans
//! events out through each subscriber's outbound queue.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::cancel;
use crate::conn::IpcConnection;
use crate::error::{Error, Result};
use crate::wire::{self, Message};

use super::config::RelayConfig;
use super::handle::RelayHandle;
use super::registry::{ChannelRegistry, SubscriberHandle};
use super::stats::{RelayStats, StatsCounters};

/// Capability the host supervisor drives.
///
/// Implementors run until the supervisor's token fires or they stop
/// themselves; supervision policy stays with the host.
pub trait Startable {
    /// Run until cancelled.
    fn start(&self, cancel: CancellationToken) -> impl Future<Output = Result<()>> + Send;
}

/// Relay server
pub struct RelayServer {
    config: RelayConfig,
    registry: Arc<ChannelRegistry>,
    stats: Arc<StatsCounters>,
    next_conn_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    stop: CancellationToken,
    control: Arc<Mutex<Option<IpcConnection>>>,
}

impl RelayServer {
    /// Create a new relay with the given configuration
    pub fn new(config: RelayConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            registry: Arc::new(ChannelRegistry::new()),
            stats: Arc::new(StatsCounters::default()),
            next_conn_id: AtomicU64::new(1),
            connection_semaphore,
            stop: CancellationToken::new(),
            control: Arc::new(Mutex::new(None)),
        }
    }

    /// Get a reference to the channel registry
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Get the relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Management handle for the running relay.
    ///
    /// The handle's `emit` publishes through a control connection into the
    /// relay's own socket; `stop` shuts down a relay launched via
    /// [`Startable::start`].
    pub fn handle(&self) -> RelayHandle {
        RelayHandle::new(
            self.config.socket_path(),
            self.stop.clone(),
            Arc::clone(&self.control),
        )
    }

    /// Snapshot of relay statistics
    pub async fn stats(&self) -> RelayStats {
        let channels = self.registry.channel_count().await;
        self.stats.snapshot(channels)
    }

    /// Run the relay.
    ///
    /// This method blocks until the relay is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        let conn_stop = CancellationToken::new();
        self.accept_loop(&listener, &conn_stop).await
    }

    /// Run the relay with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind()?;
        let conn_stop = CancellationToken::new();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!(endpoint = %self.config.endpoint, "Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener, &conn_stop) => result,
        };

        conn_stop.cancel();
        self.cleanup().await;
        result
    }

    fn bind(&self) -> Result<UnixListener> {
        let path = self.config.socket_path();

        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed stale socket file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }

        let listener = UnixListener::bind(&path)?;
        tracing::info!(
            path = %path.display(),
            endpoint = %self.config.endpoint,
            "Relay listening"
        );
        Ok(listener)
    }

    async fn cleanup(&self) {
        if let Some(conn) = self.control.lock().await.take() {
            conn.disconnect().await;
        }

        let path = self.config.socket_path();
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Socket file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }

    async fn accept_loop(
        &self,
        listener: &UnixListener,
        conn_stop: &CancellationToken,
    ) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, _addr)) => {
                    self.handle_connection(socket, conn_stop.clone());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: UnixStream, conn_stop: CancellationToken) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!("Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.stats.total_connections.fetch_add(1, Ordering::Relaxed);
        self.stats.active_connections.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(conn_id = conn_id, "Connection accepted");

        let registry = Arc::clone(&self.registry);
        let stats = Arc::clone(&self.stats);
        let subscriber_queue = self.config.subscriber_queue;
        let max_frame_size = self.config.max_frame_size;

        tokio::spawn(async move {
            let _permit = permit;

            serve_connection(
                registry,
                Arc::clone(&stats),
                socket,
                conn_id,
                subscriber_queue,
                max_frame_size,
                conn_stop,
            )
            .await;

            stats.active_connections.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(conn_id = conn_id, "Connection closed");
        });
    }
}

impl Startable for RelayServer {
    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let combined = cancel::combine([cancel, self.stop.clone()]);
        self.run_until(combined.cancelled()).await
    }
}

async fn serve_connection(
    registry: Arc<ChannelRegistry>,
    stats: Arc<StatsCounters>,
    socket: UnixStream,
    conn_id: u64,
    subscriber_queue: usize,
    max_frame_size: usize,
    conn_stop: CancellationToken,
) {
    let (mut read_half, mut write_half) = socket.into_split();
    let (tx, mut rx) = mpsc::channel::<Message>(subscriber_queue);

    let writer_stop = conn_stop.clone();
    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = writer_stop.cancelled() => break,
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            if let Err(e) = wire::write_message(&mut write_half, &message, max_frame_size).await {
                tracing::debug!(conn_id = conn_id, error = %e, "Subscriber write failed");
                break;
            }
        }
    });

    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let result = tokio::select! {
            _ = conn_stop.cancelled() => break,
            result = wire::read_message(&mut read_half, &mut buf, max_frame_size) => result,
        };

        match result {
            Ok(Some(Message::Register { channel })) => {
                stats.registrations.fetch_add(1, Ordering::Relaxed);
                registry
                    .register_subscriber(&channel, SubscriberHandle::new(conn_id, tx.clone()))
                    .await;
            }
            Ok(Some(Message::Disconnect { channel })) => {
                registry.unregister_subscriber(&channel, conn_id).await;
            }
            Ok(Some(Message::Event { channel, payload })) => {
                stats.events_relayed.fetch_add(1, Ordering::Relaxed);
                let outcome = registry.broadcast(&channel, payload).await;
                stats
                    .deliveries
                    .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
                stats
                    .dropped_deliveries
                    .fetch_add(outcome.dropped as u64, Ordering::Relaxed);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(conn_id = conn_id, error = %e, "Connection read failed");
                break;
            }
        }
    }

    registry.connection_closed(conn_id).await;

    // Let queued deliveries flush before the writer exits
    drop(tx);
    let _ = writer.await;
}
