//! Emitter capability

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::stream::IpcDuplex;

/// Pub/sub surface a transport exposes to application code.
///
/// Implementations cache one stream per channel and compose them with
/// cancellation tokens. The stream accessors are an escape hatch for an
/// external layer that splices several transports into one source; they
/// must stay on the trait even though most callers never touch them.
pub trait TransportEmitter {
    /// Fire-and-forget publish on a channel.
    ///
    /// Resolves once the value is handed off to the connection, which
    /// says nothing about delivery.
    fn emit(&self, channel: &str, payload: Value) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next value on a channel.
    ///
    /// Resolves `Ok(Some(value))` with the dequeued value, or `Ok(None)`
    /// when `timeout` (default [`DEFAULT_ONCE_TIMEOUT`]) elapses or
    /// `cancel` fires first. A value arriving concurrently with
    /// cancellation stays queued for a future caller.
    ///
    /// [`DEFAULT_ONCE_TIMEOUT`]: super::DEFAULT_ONCE_TIMEOUT
    fn once(
        &self,
        channel: &str,
        cancel: CancellationToken,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Like [`once`], but bounded by an arbitrary future instead of a
    /// clock.
    ///
    /// [`once`]: TransportEmitter::once
    fn once_until<F>(
        &self,
        channel: &str,
        cancel: CancellationToken,
        deadline: F,
    ) -> impl Future<Output = Result<Option<Value>>> + Send
    where
        F: Future<Output = ()> + Send;

    /// Stream currently cached for a channel, if any.
    fn get_stream(&self, channel: &str) -> impl Future<Output = Option<Arc<IpcDuplex>>> + Send;

    /// Inject or replace the stream cached for a channel.
    fn set_stream(
        &self,
        channel: &str,
        stream: Arc<IpcDuplex>,
    ) -> impl Future<Output = ()> + Send;

    /// Destroy every cached stream and clear the cache.
    fn reset_internal_streams(&self) -> impl Future<Output = ()> + Send;
}
