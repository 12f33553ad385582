//! Per-channel duplex stream

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::conn::{IpcConnection, Mailbox};
use crate::error::{Error, Result};
use crate::wire::Message;

/// Bidirectional stream bound to one channel on a shared connection.
///
/// Writes become `event` frames immediately. The read side is lazy: the
/// first read attaches the stream's mailbox to the connection and sends a
/// `register` frame, so a write-only stream never subscribes. Inbound
/// events queue in a bounded mailbox until taken.
pub struct IpcDuplex {
    channel: String,
    conn: IpcConnection,
    mailbox: Arc<Mailbox>,
    activated: AtomicBool,
    destroyed: AtomicBool,
}

impl IpcDuplex {
    /// Create a stream for a channel with the given mailbox capacity
    pub fn new(conn: IpcConnection, channel: impl Into<String>, capacity: usize) -> Self {
        Self {
            channel: channel.into(),
            conn,
            mailbox: Arc::new(Mailbox::new(capacity)),
            activated: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Channel this stream is bound to
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether the stream has been destroyed
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Publish a value on this stream's channel
    pub async fn write(&self, value: Value) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::ClosedChannel {
                channel: self.channel.clone(),
            });
        }
        self.conn.send(Message::event(&self.channel, value)).await
    }

    /// Take the next queued value without waiting.
    ///
    /// Registers on the relay on first use. Returns `Ok(None)` when the
    /// mailbox is empty.
    pub async fn read(&self) -> Result<Option<Value>> {
        if self.is_destroyed() {
            return Err(Error::ClosedChannel {
                channel: self.channel.clone(),
            });
        }
        self.activate().await?;

        match self.mailbox.try_take() {
            Some(value) => Ok(Some(value)),
            None if self.mailbox.is_closed() => Err(Error::ConnectionClosed),
            None => Ok(None),
        }
    }

    /// Wait until a value is queued or the stream is closed.
    ///
    /// Registers on the relay on first use. Waking up is not a claim on
    /// the value; a concurrent reader may still take it first.
    pub async fn readable(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::ClosedChannel {
                channel: self.channel.clone(),
            });
        }
        self.activate().await?;
        self.mailbox.readable().await;
        Ok(())
    }

    /// Take the next value only if `guard` still holds at claim time
    pub(crate) fn take_if(&self, guard: impl FnOnce() -> bool) -> Result<Option<Value>> {
        if self.is_destroyed() {
            return Err(Error::ClosedChannel {
                channel: self.channel.clone(),
            });
        }
        match self.mailbox.take_if(guard) {
            Some(value) => Ok(Some(value)),
            None if self.mailbox.is_closed() => Err(Error::ConnectionClosed),
            None => Ok(None),
        }
    }

    /// Tear the stream down.
    ///
    /// Closes the mailbox, detaches from the connection and, if the stream
    /// ever registered, tells the relay to drop the subscription. Safe to
    /// call more than once.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.mailbox.close();

        if self.activated.load(Ordering::Acquire) {
            self.conn.detach(&self.channel, &self.mailbox).await;
            if let Err(e) = self.conn.send(Message::disconnect(&self.channel)).await {
                tracing::debug!(channel = %self.channel, error = %e, "Disconnect frame not sent");
            }
        }

        tracing::debug!(channel = %self.channel, "Stream destroyed");
    }

    async fn activate(&self) -> Result<()> {
        if self.activated.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Attach before registering so no event can slip between the two
        self.conn
            .attach(&self.channel, Arc::clone(&self.mailbox))
            .await;
        tracing::debug!(channel = %self.channel, "Stream activated");
        self.conn.send(Message::register(&self.channel)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire;
    use bytes::BytesMut;
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::{UnixListener, UnixStream};

    async fn harness() -> (tempfile::TempDir, UnixStream, IpcConnection) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duplex.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let (conn, accepted) = tokio::join!(IpcConnection::connect(&path), listener.accept());
        (dir, accepted.unwrap().0, conn.unwrap())
    }

    async fn next_frame(socket: &mut UnixStream, buf: &mut BytesMut) -> Message {
        tokio::time::timeout(
            Duration::from_secs(2),
            wire::read_message(socket, buf, wire::DEFAULT_MAX_FRAME_SIZE),
        )
        .await
        .expect("timed out waiting for frame")
        .unwrap()
        .expect("peer closed")
    }

    #[tokio::test]
    async fn test_write_sends_event_frame() {
        let (_dir, mut server, conn) = harness().await;
        let stream = IpcDuplex::new(conn, "metrics", 4);
        assert_eq!(stream.channel(), "metrics");

        stream.write(json!({"cpu": 0.5})).await.unwrap();

        let mut buf = BytesMut::new();
        let frame = next_frame(&mut server, &mut buf).await;
        assert_eq!(frame, Message::event("metrics", json!({"cpu": 0.5})));
    }

    #[tokio::test]
    async fn test_first_read_registers_once() {
        let (_dir, mut server, conn) = harness().await;
        let stream = IpcDuplex::new(conn, "metrics", 4);

        assert_eq!(stream.read().await.unwrap(), None);
        assert_eq!(stream.read().await.unwrap(), None);
        stream.write(json!(1)).await.unwrap();

        // Exactly one register frame, then the event
        let mut buf = BytesMut::new();
        let frame = next_frame(&mut server, &mut buf).await;
        assert_eq!(frame, Message::register("metrics"));
        let frame = next_frame(&mut server, &mut buf).await;
        assert_eq!(frame, Message::event("metrics", json!(1)));
    }

    #[tokio::test]
    async fn test_read_receives_in_order() {
        let (_dir, mut server, conn) = harness().await;
        let stream = IpcDuplex::new(conn, "jobs", 8);

        assert_eq!(stream.read().await.unwrap(), None);
        let mut buf = BytesMut::new();
        let frame = next_frame(&mut server, &mut buf).await;
        assert_eq!(frame, Message::register("jobs"));

        for id in 1..=3 {
            wire::write_message(
                &mut server,
                &Message::event("jobs", json!({"id": id})),
                wire::DEFAULT_MAX_FRAME_SIZE,
            )
            .await
            .unwrap();
        }

        for id in 1..=3 {
            stream.readable().await.unwrap();
            assert_eq!(stream.read().await.unwrap(), Some(json!({"id": id})));
        }
    }

    #[tokio::test]
    async fn test_destroy_rejects_further_use() {
        let (_dir, _server, conn) = harness().await;
        let stream = IpcDuplex::new(conn, "jobs", 4);

        stream.destroy().await;
        stream.destroy().await;

        assert!(matches!(
            stream.write(json!(1)).await,
            Err(Error::ClosedChannel { ref channel }) if channel == "jobs"
        ));
        assert!(matches!(
            stream.read().await,
            Err(Error::ClosedChannel { .. })
        ));
        assert!(stream.is_destroyed());
    }

    #[tokio::test]
    async fn test_destroy_after_activation_sends_disconnect() {
        let (_dir, mut server, conn) = harness().await;
        let stream = IpcDuplex::new(conn, "jobs", 4);

        assert_eq!(stream.read().await.unwrap(), None);
        stream.destroy().await;

        let mut buf = BytesMut::new();
        let frame = next_frame(&mut server, &mut buf).await;
        assert_eq!(frame, Message::register("jobs"));
        let frame = next_frame(&mut server, &mut buf).await;
        assert_eq!(frame, Message::disconnect("jobs"));
    }

    #[tokio::test]
    async fn test_destroy_without_activation_is_silent() {
        let (_dir, mut server, conn) = harness().await;
        let stream = IpcDuplex::new(conn, "jobs", 4);

        stream.destroy().await;

        let mut buf = BytesMut::new();
        let silent = tokio::time::timeout(
            Duration::from_millis(100),
            wire::read_message(&mut server, &mut buf, wire::DEFAULT_MAX_FRAME_SIZE),
        )
        .await;
        assert!(silent.is_err(), "no frame should be sent");
    }
}
