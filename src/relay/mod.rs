//! Relay server for channel pub/sub routing
//!
//! The relay owns the Unix domain socket and routes events from publishers
//! to every connection registered on the event's channel.
//!
//! # Architecture
//!
//! ```text
//!                           RelayServer
//!                     ┌───────────────────────────┐
//!                     │ ChannelRegistry {         │
//!                     │   channels: HashMap<      │
//!                     │     String,               │
//!                     │     Vec<SubscriberHandle> │
//!                     │   >                       │
//!                     │ }                         │
//!                     └────────────┬──────────────┘
//!                                  │
//!          ┌───────────────────────┼───────────────────────┐
//!          │                       │                       │
//!          ▼                       ▼                       ▼
//!     [Publisher]            [Subscriber]            [Subscriber]
//!     event frame            outbound queue          outbound queue
//!          │                       │                       │
//!          └──► registry.broadcast()──► try_send() ──► socket write
//! ```
//!
//! Each accepted connection gets a reader task and a writer task. The
//! reader applies `register`, `disconnect` and `event` frames to the
//! registry; the writer drains that connection's bounded outbound queue.
//! Fan-out never awaits a slow subscriber, it drops the event for that
//! subscriber instead.

pub mod config;
pub mod handle;
pub mod registry;
pub mod server;
pub mod stats;

pub use config::RelayConfig;
pub use handle::RelayHandle;
pub use registry::{BroadcastOutcome, ChannelRegistry, SubscriberHandle};
pub use server::{RelayServer, Startable};
pub use stats::RelayStats;
