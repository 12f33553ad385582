//! Management handle for a running relay

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::conn::IpcConnection;
use crate::error::Result;
use crate::wire::Message;

/// Cheap, clonable handle for publishing into and stopping a relay.
///
/// `emit` goes through a control connection into the relay's own socket,
/// so control events take the same path as any client's and observe the
/// same ordering.
#[derive(Clone)]
pub struct RelayHandle {
    socket_path: PathBuf,
    stop: CancellationToken,
    control: Arc<Mutex<Option<IpcConnection>>>,
}

impl RelayHandle {
    pub(crate) fn new(
        socket_path: PathBuf,
        stop: CancellationToken,
        control: Arc<Mutex<Option<IpcConnection>>>,
    ) -> Self {
        Self {
            socket_path,
            stop,
            control,
        }
    }

    /// Publish an event on a channel.
    ///
    /// The control connection is opened lazily on first use and reused
    /// afterwards; a broken one is replaced on the next call.
    pub async fn emit(&self, channel: &str, payload: Value) -> Result<()> {
        let conn = self.control_connection().await?;
        conn.send(Message::event(channel, payload)).await
    }

    /// Stop the relay this handle belongs to.
    ///
    /// Shuts down a relay launched via [`Startable::start`] and closes the
    /// control connection.
    ///
    /// [`Startable::start`]: super::Startable::start
    pub async fn stop(&self) {
        self.stop.cancel();
        if let Some(conn) = self.control.lock().await.take() {
            conn.disconnect().await;
        }
    }

    async fn control_connection(&self) -> Result<IpcConnection> {
        let mut control = self.control.lock().await;
        match control.as_ref() {
            Some(conn) if !conn.is_closed() => Ok(conn.clone()),
            _ => {
                tracing::debug!(path = %self.socket_path.display(), "Opening control connection");
                let conn = IpcConnection::connect(&self.socket_path).await?;
                *control = Some(conn.clone());
                Ok(conn)
            }
        }
    }
}
