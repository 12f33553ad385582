//! IPC transport emitter

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::conn::IpcConnection;
use crate::error::Result;
use crate::stream::IpcDuplex;

use super::interface::TransportEmitter;

/// Wait bound applied when `once` is called without an explicit timeout
pub const DEFAULT_ONCE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Emitter multiplexing channels over one shared connection.
///
/// Streams are created lazily, one per channel, and cached until
/// [`reset_internal_streams`] wipes them. All clones of the underlying
/// connection share the reader and writer tasks, so any number of
/// emitters can sit on one socket.
///
/// [`reset_internal_streams`]: TransportEmitter::reset_internal_streams
pub struct IpcEmitter {
    conn: IpcConnection,
    queue_size: usize,
    streams: RwLock<HashMap<String, Arc<IpcDuplex>>>,
}

impl IpcEmitter {
    /// Create an emitter with the given per-channel queue capacity
    pub fn new(conn: IpcConnection, queue_size: usize) -> Self {
        Self {
            conn,
            queue_size: queue_size.max(1),
            streams: RwLock::new(HashMap::new()),
        }
    }

    async fn stream_for(&self, channel: &str) -> Arc<IpcDuplex> {
        if let Some(stream) = self.streams.read().await.get(channel) {
            return Arc::clone(stream);
        }

        let mut streams = self.streams.write().await;
        Arc::clone(streams.entry(channel.to_string()).or_insert_with(|| {
            Arc::new(IpcDuplex::new(
                self.conn.clone(),
                channel,
                self.queue_size,
            ))
        }))
    }
}

impl TransportEmitter for IpcEmitter {
    async fn emit(&self, channel: &str, payload: Value) -> Result<()> {
        let stream = self.stream_for(channel).await;
        stream.write(payload).await
    }

    async fn once(
        &self,
        channel: &str,
        cancel: CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<Option<Value>> {
        let wait = tokio::time::sleep(timeout.unwrap_or(DEFAULT_ONCE_TIMEOUT));
        self.once_until(channel, cancel, wait).await
    }

    async fn once_until<F>(
        &self,
        channel: &str,
        cancel: CancellationToken,
        deadline: F,
    ) -> Result<Option<Value>>
    where
        F: Future<Output = ()> + Send,
    {
        let stream = self.stream_for(channel).await;

        // A buffered value resolves without racing
        if let Some(value) = stream.read().await? {
            return Ok(Some(value));
        }

        // The companion token records that the deadline fired, so the
        // claim guard can never consume a value past it. A value arriving
        // concurrently with cancellation stays queued for a future caller.
        let companion = CancellationToken::new();
        tokio::select! {
            value = next_value(&stream, &cancel, &companion) => value,
            _ = deadline => {
                companion.cancel();
                tracing::trace!(channel = channel, "Wait timed out");
                Ok(None)
            }
            _ = cancel.cancelled() => {
                tracing::trace!(channel = channel, "Wait cancelled");
                Ok(None)
            }
        }
    }

    async fn get_stream(&self, channel: &str) -> Option<Arc<IpcDuplex>> {
        self.streams.read().await.get(channel).map(Arc::clone)
    }

    async fn set_stream(&self, channel: &str, stream: Arc<IpcDuplex>) {
        self.streams
            .write()
            .await
            .insert(channel.to_string(), stream);
    }

    async fn reset_internal_streams(&self) {
        let drained: Vec<_> = self.streams.write().await.drain().collect();
        for (channel, stream) in drained {
            tracing::debug!(channel = %channel, "Destroying cached stream");
            stream.destroy().await;
        }
    }
}

async fn next_value(
    stream: &IpcDuplex,
    cancel: &CancellationToken,
    companion: &CancellationToken,
) -> Result<Option<Value>> {
    stream.readable().await?;
    stream.take_if(|| !cancel.is_cancelled() && !companion.is_cancelled())
}
