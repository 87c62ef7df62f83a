//! Configuration types for the transport layer
//!
//! The transport has no configuration file; callers build a
//! [`TransportConfig`] in code, usually starting from one of the presets.

use crate::error::TransportError;

/// Smallest receive window that can still hold an HTTP header terminator.
const MIN_BUFFER_CAPACITY: usize = 4;

/// Configuration for a [`TransportSocket`](crate::TransportSocket)
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Capacity of the receive window in bytes
    /// Default: 16384
    pub buffer_capacity: usize,

    /// Size of the first raw read when the receive handler does not ask for one
    /// Default: 4096
    pub initial_read_size: usize,

    /// Queued send count above which a warning is logged
    /// Default: 64
    pub send_queue_warn_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 16 * 1024,
            initial_read_size: 4096,
            send_queue_warn_len: 64,
        }
    }
}

impl TransportConfig {
    /// Create a new TransportConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a TransportConfig with a small receive window
    pub fn low_memory() -> Self {
        Self {
            buffer_capacity: 4096,
            initial_read_size: 1024,
            ..Default::default()
        }
    }

    /// Create a TransportConfig tuned for long media transfers
    pub fn bulk_transfer() -> Self {
        Self {
            buffer_capacity: 64 * 1024,
            initial_read_size: 16 * 1024,
            send_queue_warn_len: 256,
        }
    }

    /// Set the receive window capacity
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Set the size of the first read
    pub fn with_initial_read_size(mut self, size: usize) -> Self {
        self.initial_read_size = size;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.buffer_capacity < MIN_BUFFER_CAPACITY {
            return Err(TransportError::InvalidConfig(format!(
                "buffer_capacity must be at least {MIN_BUFFER_CAPACITY} bytes"
            )));
        }

        if self.initial_read_size == 0 {
            return Err(TransportError::InvalidConfig(
                "initial_read_size must be greater than 0".to_string(),
            ));
        }

        if self.initial_read_size > self.buffer_capacity {
            return Err(TransportError::InvalidConfig(
                "initial_read_size cannot exceed buffer_capacity".to_string(),
            ));
        }

        Ok(())
    }
}
