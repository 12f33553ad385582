//! Channel-scoped duplex streams over a shared connection

pub mod duplex;

pub use duplex::IpcDuplex;
