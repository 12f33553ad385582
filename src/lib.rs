//! # ipcmux
//!
//! Channel-multiplexed pub/sub over a single Unix domain socket.
//!
//! A relay process owns the socket and keeps a registry of which
//! connection subscribed to which channel. Any number of clients share
//! one connection each, multiplexing named channels over it:
//!
//! ```text
//!  client A ──┐                         ┌── client B
//!   emit ─► IpcEmitter                IpcEmitter ◄─ once
//!             │ IpcDuplex per channel   │
//!             │                         │
//!        IpcConnection            IpcConnection
//!             └────────► RelayServer ◄──┘
//!                    ChannelRegistry fan-out
//! ```
//!
//! - [`RelayServer`] accepts connections and fans out `event` frames to
//!   every subscriber of the frame's channel.
//! - [`IpcConnection`] is a clonable handle over one socket; a reader
//!   task dispatches inbound events to per-channel mailboxes, a writer
//!   task drains a bounded outbound queue.
//! - [`IpcDuplex`] binds one channel: writes publish, the first read
//!   subscribes.
//! - [`IpcEmitter`] caches one duplex per channel and exposes `emit` and
//!   the cancellable, timeout-bound `once`.
//!
//! Delivery is at-most-once and best-effort: the relay drops events for
//! subscribers whose queues are full, keeps no history, and a restart
//! forgets all subscriptions. Values on one channel arrive in write
//! order; nothing is guaranteed across channels.

pub mod cancel;
pub mod conn;
pub mod error;
pub mod relay;
pub mod stream;
pub mod transport;
pub mod wire;

pub use cancel::CancellationToken;
pub use conn::IpcConnection;
pub use error::{Error, Result};
pub use relay::{RelayConfig, RelayHandle, RelayServer, RelayStats, Startable};
pub use stream::IpcDuplex;
pub use transport::{IpcEmitter, TransportEmitter, DEFAULT_ONCE_TIMEOUT};
pub use wire::Message;
