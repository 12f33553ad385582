//! Client-side connection plumbing
//!
//! Provides the shared connection every channel of a process multiplexes
//! over, plus the per-channel mailboxes the connection's reader task
//! delivers into.

pub mod connection;
pub(crate) mod mailbox;

pub use connection::IpcConnection;

pub(crate) use mailbox::Mailbox;
