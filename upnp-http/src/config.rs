//! Configuration types for HTTP connections

use upnp_transport::TransportConfig;

use crate::error::HttpError;
use crate::message::Version;

/// Configuration for an [`HttpConnection`](crate::HttpConnection)
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Settings for the underlying socket
    pub transport: TransportConfig,

    /// Bytes read from a stream source per outbound slice
    /// Default: 4096
    pub stream_slice_size: usize,

    /// Largest header block (start line through the blank line) accepted
    /// Default: 8192
    pub max_header_bytes: usize,

    /// Largest chunk-size line accepted, extensions included
    /// Default: 1024
    pub max_chunk_line: usize,

    /// Read size used while the header terminator has not been seen yet
    /// Default: 1
    pub header_scan_step: usize,

    /// Cap on a body buffered in memory when no sink is supplied
    /// Default: 16 MiB
    pub max_buffered_body: u64,

    /// Version written on messages built by the connection itself
    /// Default: HTTP/1.1
    pub default_version: Version,

    /// Publish raw byte and parsed packet events
    /// Default: false
    pub diagnostics: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            stream_slice_size: 4096,
            max_header_bytes: 8 * 1024,
            max_chunk_line: 1024,
            header_scan_step: 1,
            max_buffered_body: 16 * 1024 * 1024,
            default_version: Version::Http11,
            diagnostics: false,
        }
    }
}

impl HttpConfig {
    /// Create a new HttpConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Small windows and slices for constrained devices
    pub fn low_memory() -> Self {
        Self {
            transport: TransportConfig::low_memory(),
            stream_slice_size: 1024,
            max_header_bytes: 4096,
            max_chunk_line: 256,
            max_buffered_body: 1024 * 1024,
            ..Default::default()
        }
    }

    /// Large windows and slices for media streaming
    pub fn bulk_transfer() -> Self {
        Self {
            transport: TransportConfig::bulk_transfer(),
            stream_slice_size: 16 * 1024,
            max_header_bytes: 16 * 1024,
            max_buffered_body: 64 * 1024 * 1024,
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_stream_slice_size(mut self, size: usize) -> Self {
        self.stream_slice_size = size;
        self
    }

    pub fn with_max_header_bytes(mut self, limit: usize) -> Self {
        self.max_header_bytes = limit;
        self
    }

    pub fn with_header_scan_step(mut self, step: usize) -> Self {
        self.header_scan_step = step;
        self
    }

    pub fn with_max_buffered_body(mut self, limit: u64) -> Self {
        self.max_buffered_body = limit;
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), HttpError> {
        self.transport
            .validate()
            .map_err(|e| HttpError::InvalidConfig(e.to_string()))?;

        if self.stream_slice_size == 0 {
            return Err(HttpError::InvalidConfig(
                "stream_slice_size must be greater than 0".to_string(),
            ));
        }

        if self.header_scan_step == 0 {
            return Err(HttpError::InvalidConfig(
                "header_scan_step must be greater than 0".to_string(),
            ));
        }

        // the whole header block has to fit in the receive window
        if self.max_header_bytes > self.transport.buffer_capacity {
            return Err(HttpError::InvalidConfig(format!(
                "max_header_bytes ({}) cannot exceed the receive buffer ({})",
                self.max_header_bytes, self.transport.buffer_capacity
            )));
        }

        if self.max_chunk_line == 0 || self.max_chunk_line > self.transport.buffer_capacity {
            return Err(HttpError::InvalidConfig(
                "max_chunk_line must be between 1 and the receive buffer size".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpConfig::default();
        assert_eq!(config.stream_slice_size, 4096);
        assert_eq!(config.max_header_bytes, 8192);
        assert_eq!(config.header_scan_step, 1);
        assert_eq!(config.default_version, Version::Http11);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(HttpConfig::low_memory().validate().is_ok());
        assert!(HttpConfig::bulk_transfer().validate().is_ok());
    }

    #[test]
    fn test_header_budget_must_fit_window() {
        let config = HttpConfig::new()
            .with_transport(TransportConfig::new().with_buffer_capacity(1024).with_initial_read_size(512))
            .with_max_header_bytes(2048);
        assert!(matches!(config.validate(), Err(HttpError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(HttpConfig::new().with_stream_slice_size(0).validate().is_err());
        assert!(HttpConfig::new().with_header_scan_step(0).validate().is_err());
    }
}
