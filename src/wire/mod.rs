//! Wire protocol
//!
//! The relay and its clients exchange three messages over a Unix domain
//! socket: `register`, `disconnect` and `event`. Each message travels as a
//! length-prefixed JSON frame:
//!
//! ```text
//! +----------------+------------------------+
//! | length (u32 BE)| JSON body (length bytes)|
//! +----------------+------------------------+
//! ```
//!
//! Frames larger than the configured maximum are rejected on both ends.

pub mod codec;
pub mod message;

pub use codec::{decode, encode, read_message, write_message};
pub use codec::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};
pub use message::Message;
