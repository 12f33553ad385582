//! Error types
//!
//! Central error type for the crate. Timeouts are not errors: a `once` that
//! elapses resolves to `Ok(None)` so callers can tell "no value" apart from
//! a real failure.

/// Convenience result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying socket
    Io(std::io::Error),
    /// The shared connection has shut down
    ConnectionClosed,
    /// Operation on a channel after `destroy()`
    ClosedChannel {
        /// Name of the destroyed channel
        channel: String,
    },
    /// Wire protocol violation
    Frame(FrameError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::ClosedChannel { channel } => write!(f, "Channel is destroyed: {}", channel),
            Error::Frame(e) => write!(f, "Frame error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Frame(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::Frame(e)
    }
}

/// Errors in the length-prefixed frame layer
#[derive(Debug)]
pub enum FrameError {
    /// Frame body exceeds the configured maximum
    TooLarge {
        /// Declared or actual body size
        size: usize,
        /// Configured maximum
        max: usize,
    },
    /// Frame body is not a valid protocol message
    Malformed(serde_json::Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::TooLarge { size, max } => {
                write!(f, "Frame too large: {} bytes (max {})", size, max)
            }
            FrameError::Malformed(e) => write!(f, "Malformed frame: {}", e),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Malformed(e) => Some(e),
            _ => None,
        }
    }
}
