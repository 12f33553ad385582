//! Shared client connection
//!
//! One connection to the relay endpoint, shared by every channel of a
//! process. A reader task routes inbound `event` frames to the mailboxes
//! attached per channel; a writer task drains a bounded queue of frames
//! already encoded at hand-off. The handle is cheap to clone and every
//! clone refers to the same socket.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::wire::{self, Message};

use super::mailbox::Mailbox;

/// Capacity of the outbound frame queue
const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// Handle to one connection to the relay endpoint
#[derive(Clone)]
pub struct IpcConnection {
    inner: Arc<ConnInner>,
}

struct ConnInner {
    outbound: mpsc::Sender<Bytes>,
    listeners: RwLock<HashMap<String, Vec<Arc<Mailbox>>>>,
    shutdown: CancellationToken,
    max_frame_size: usize,
}

impl IpcConnection {
    /// Connect to the relay socket at `path`.
    ///
    /// Spawns the connection's reader and writer tasks. The returned
    /// handle can be cloned freely and passed into every channel that
    /// should share this socket.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await?;
        let (read_half, write_half) = stream.into_split();

        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let inner = Arc::new(ConnInner {
            outbound,
            listeners: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            max_frame_size: wire::DEFAULT_MAX_FRAME_SIZE,
        });

        tokio::spawn(reader_loop(Arc::clone(&inner), read_half));
        tokio::spawn(writer_loop(Arc::clone(&inner), outbound_rx, write_half));

        tracing::debug!(path = %path.display(), "Connected to relay endpoint");
        Ok(Self { inner })
    }

    /// Queue a message for sending.
    ///
    /// Completion signals hand-off to the writer task, never delivery.
    /// Suspends only while the outbound queue is full. A message whose
    /// encoded frame exceeds the frame cap is rejected here with
    /// [`Error::Frame`]; the connection stays open.
    pub async fn send(&self, message: Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        // Encode at hand-off so frame violations surface to the caller
        // and the writer task only ever sees I/O failures.
        let mut frame = BytesMut::new();
        wire::encode(&message, &mut frame, self.inner.max_frame_size)?;

        self.inner
            .outbound
            .send(frame.freeze())
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Route future `event` frames for `channel` into `mailbox`.
    ///
    /// A channel may have several mailboxes attached; each receives its
    /// own copy of every event.
    pub(crate) async fn attach(&self, channel: &str, mailbox: Arc<Mailbox>) {
        let mut listeners = self.inner.listeners.write().await;
        listeners
            .entry(channel.to_string())
            .or_default()
            .push(mailbox);
    }

    /// Remove one previously attached mailbox.
    pub(crate) async fn detach(&self, channel: &str, mailbox: &Arc<Mailbox>) {
        let mut listeners = self.inner.listeners.write().await;
        if let Some(boxes) = listeners.get_mut(channel) {
            boxes.retain(|candidate| !Arc::ptr_eq(candidate, mailbox));
            if boxes.is_empty() {
                listeners.remove(channel);
            }
        }
    }

    /// Shut down the connection and close every attached mailbox.
    ///
    /// Idempotent. Pending readers observe the closure through their
    /// mailbox; subsequent `send` calls fail with `ConnectionClosed`.
    pub async fn disconnect(&self) {
        self.inner.teardown().await;
        tracing::debug!("Connection disconnected");
    }

    /// Whether the connection has shut down
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl ConnInner {
    async fn teardown(&self) {
        self.shutdown.cancel();

        let mut listeners = self.listeners.write().await;
        for (_, boxes) in listeners.drain() {
            for mailbox in boxes {
                mailbox.close();
            }
        }
    }

    async fn dispatch(&self, channel: &str, payload: Value) {
        let targets: Vec<Arc<Mailbox>> = {
            let listeners = self.listeners.read().await;
            match listeners.get(channel) {
                Some(boxes) => boxes.clone(),
                None => {
                    tracing::trace!(channel = %channel, "Event without listener, dropped");
                    return;
                }
            }
        };

        let mut saw_closed = false;
        for mailbox in &targets {
            if mailbox.is_closed() {
                saw_closed = true;
                continue;
            }
            // Waits when the mailbox is full; a slow consumer stalls the
            // reader rather than losing values.
            if !mailbox.deliver(payload.clone()).await {
                saw_closed = true;
            }
        }

        if saw_closed {
            let mut listeners = self.listeners.write().await;
            if let Some(boxes) = listeners.get_mut(channel) {
                boxes.retain(|mailbox| !mailbox.is_closed());
                if boxes.is_empty() {
                    listeners.remove(channel);
                }
            }
        }
    }
}

async fn reader_loop(inner: Arc<ConnInner>, mut read_half: OwnedReadHalf) {
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        let message = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            result = wire::read_message(&mut read_half, &mut buf, inner.max_frame_size) => {
                match result {
                    Ok(Some(message)) => message,
                    Ok(None) => {
                        tracing::debug!("Relay endpoint closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Connection read failed");
                        break;
                    }
                }
            }
        };

        match message {
            Message::Event { channel, payload } => inner.dispatch(&channel, payload).await,
            other => {
                tracing::trace!(message = ?other, "Ignoring non-event frame");
            }
        }
    }

    inner.teardown().await;
}

async fn writer_loop(
    inner: Arc<ConnInner>,
    mut outbound: mpsc::Receiver<Bytes>,
    mut write_half: OwnedWriteHalf,
) {
    loop {
        let frame = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = write_half.write_all(&frame).await {
            tracing::warn!(error = %e, "Connection write failed");
            break;
        }
    }

    inner.teardown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameError;
    use serde_json::json;
    use std::time::Duration;
    use tokio::net::UnixListener;

    async fn read_frame(stream: &mut UnixStream, buf: &mut BytesMut) -> Option<Message> {
        wire::read_message(stream, buf, wire::DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap()
    }

    async fn write_frame(stream: &mut UnixStream, message: &Message) {
        wire::write_message(stream, message, wire::DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let conn = IpcConnection::connect(&path).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        conn.send(Message::register("orders")).await.unwrap();

        let mut buf = BytesMut::new();
        let received = read_frame(&mut peer, &mut buf).await;
        assert_eq!(received, Some(Message::register("orders")));
    }

    #[tokio::test]
    async fn test_oversized_send_rejected_without_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let conn = IpcConnection::connect(&path).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        let oversized = Message::event("bulk", json!("x".repeat(2 * 1024 * 1024)));
        assert!(matches!(
            conn.send(oversized).await,
            Err(Error::Frame(FrameError::TooLarge { .. }))
        ));
        assert!(!conn.is_closed());

        // The rejection leaves the connection carrying frames as before
        conn.send(Message::register("bulk")).await.unwrap();
        let mut buf = BytesMut::new();
        let received = read_frame(&mut peer, &mut buf).await;
        assert_eq!(received, Some(Message::register("bulk")));
    }

    #[tokio::test]
    async fn test_dispatch_to_attached_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let conn = IpcConnection::connect(&path).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        let mailbox = Arc::new(Mailbox::new(4));
        conn.attach("orders", Arc::clone(&mailbox)).await;

        write_frame(&mut peer, &Message::event("orders", json!({"id": 1}))).await;

        tokio::time::timeout(Duration::from_secs(1), mailbox.readable())
            .await
            .unwrap();
        assert_eq!(mailbox.try_take(), Some(json!({"id": 1})));
    }

    #[tokio::test]
    async fn test_every_attached_mailbox_gets_a_copy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let conn = IpcConnection::connect(&path).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();

        let first = Arc::new(Mailbox::new(4));
        let second = Arc::new(Mailbox::new(4));
        conn.attach("orders", Arc::clone(&first)).await;
        conn.attach("orders", Arc::clone(&second)).await;

        write_frame(&mut peer, &Message::event("orders", json!("v"))).await;

        tokio::time::timeout(Duration::from_secs(1), first.readable())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), second.readable())
            .await
            .unwrap();
        assert_eq!(first.try_take(), Some(json!("v")));
        assert_eq!(second.try_take(), Some(json!("v")));
    }

    #[tokio::test]
    async fn test_disconnect_closes_mailboxes_and_fails_send() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let conn = IpcConnection::connect(&path).await.unwrap();
        let _peer = listener.accept().await.unwrap();

        let mailbox = Arc::new(Mailbox::new(4));
        conn.attach("orders", Arc::clone(&mailbox)).await;

        conn.disconnect().await;

        assert!(conn.is_closed());
        assert!(mailbox.is_closed());
        assert!(matches!(
            conn.send(Message::register("orders")).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_peer_close_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let conn = IpcConnection::connect(&path).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();

        let mailbox = Arc::new(Mailbox::new(4));
        conn.attach("orders", Arc::clone(&mailbox)).await;

        drop(peer);

        tokio::time::timeout(Duration::from_secs(1), mailbox.readable())
            .await
            .unwrap();
        assert!(mailbox.is_closed());
    }
}
