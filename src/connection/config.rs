//! Connection settings.

use crate::protocol::{DefaultErrorParser, ErrorParser};
use crate::timeout::Timeout;
use std::fmt;
use std::sync::Arc;

/// Timeouts and hooks a [`Connection`](super::Connection) is built with.
///
/// All three timeouts default to zero, meaning waits are unbounded.
///
/// ```
/// use respwire::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::default()
///     .with_connect_timeout(Duration::from_secs(1))
///     .with_read_timeout(Duration::from_millis(500));
/// assert_eq!(config.read_timeout.as_millis(), 500);
/// assert!(config.write_timeout.is_unbounded());
/// ```
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Bound on opening the socket.
    pub connect_timeout: Timeout,
    /// Bound on each readability wait.
    pub read_timeout: Timeout,
    /// Bound on each writability wait.
    pub write_timeout: Timeout,
    /// Turns error reply lines into structured errors.
    pub error_parser: Arc<dyn ErrorParser>,
}

impl ConnectionConfig {
    pub fn with_connect_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.connect_timeout = timeout.into();
        self
    }

    pub fn with_read_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.read_timeout = timeout.into();
        self
    }

    pub fn with_write_timeout(mut self, timeout: impl Into<Timeout>) -> Self {
        self.write_timeout = timeout.into();
        self
    }

    pub fn with_error_parser(mut self, parser: Arc<dyn ErrorParser>) -> Self {
        self.error_parser = parser;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Timeout::NONE,
            read_timeout: Timeout::NONE,
            write_timeout: Timeout::NONE,
            error_parser: Arc::new(DefaultErrorParser),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_defaults_are_unbounded() {
        let config = ConnectionConfig::default();
        assert!(config.connect_timeout.is_unbounded());
        assert!(config.read_timeout.is_unbounded());
        assert!(config.write_timeout.is_unbounded());
    }

    #[test]
    fn test_builders() {
        let config = ConnectionConfig::default()
            .with_connect_timeout(Duration::from_millis(1500))
            .with_read_timeout(Some(Duration::from_secs(2)))
            .with_write_timeout(None::<Duration>);
        assert_eq!(config.connect_timeout.as_millis(), 1_500);
        assert_eq!(config.read_timeout.secs(), 2);
        assert!(config.write_timeout.is_unbounded());
        assert!(format!("{:?}", config).contains("read_timeout"));
    }
}
