//! Relay configuration

use std::path::PathBuf;

use crate::wire::DEFAULT_MAX_FRAME_SIZE;

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Well-known endpoint identifier; names the socket file
    pub endpoint: String,

    /// Directory the socket file lives in
    pub socket_dir: PathBuf,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Capacity of each subscriber's outbound frame queue
    pub subscriber_queue: usize,

    /// Maximum accepted frame body size
    pub max_frame_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint: "relay".to_string(),
            socket_dir: std::env::temp_dir(),
            max_connections: 0, // Unlimited
            subscriber_queue: 64,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl RelayConfig {
    /// Create a new config with a custom endpoint identifier
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the endpoint identifier
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the socket directory
    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the subscriber queue capacity
    pub fn subscriber_queue(mut self, capacity: usize) -> Self {
        self.subscriber_queue = capacity.max(1);
        self
    }

    /// Set the maximum frame body size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Path of the socket file: `<socket_dir>/<endpoint>.sock`
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", self.endpoint))
    }
}
