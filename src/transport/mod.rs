//! Channel-multiplexed pub/sub over a shared connection
//!
//! [`IpcEmitter`] is the application-facing facade: `emit` publishes on a
//! channel, `once` waits for a single value bounded by a timeout and a
//! cancellation token. Each channel gets a lazily created [`IpcDuplex`]
//! cached on the emitter; all of them share one connection.
//!
//! [`IpcDuplex`]: crate::stream::IpcDuplex

pub mod emitter;
pub mod interface;

pub use emitter::{IpcEmitter, DEFAULT_ONCE_TIMEOUT};
pub use interface::TransportEmitter;
