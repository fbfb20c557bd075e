//! Fetch configuration shared by every request of a batch.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PollError, Result};

pub const DEFAULT_API_BASE: &str = "https://api-ratp.pierre-grimaud.fr/v4/schedules";
pub const DEFAULT_TIMEOUT_SECS: u64 = 40;
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Read-only settings for one batch.
///
/// A batch owns its own copy; the daemon derives a fresh snapshot per tick
/// with [`FetchConfig::with_max_connections`] instead of mutating one in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub api_base: String,
    /// Budget for the whole request/response cycle of one fetch.
    pub timeout: Duration,
    /// Maximum number of requests in flight at once.
    pub max_connections: usize,
    /// Optional CSV fetch log.
    pub fetch_log: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            fetch_log: None,
        }
    }
}

impl FetchConfig {
    pub fn with_max_connections(&self, max_connections: usize) -> Self {
        Self {
            max_connections,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(PollError::Configuration(
                "timeout must be a positive number of seconds".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(PollError::Configuration(
                "max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_max_connections_leaves_original_untouched() {
        let base = FetchConfig::default();
        let snapshot = base.with_max_connections(7);

        assert_eq!(snapshot.max_connections, 7);
        assert_eq!(base.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(snapshot.timeout, base.timeout);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = FetchConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PollError::Configuration(_))));

        let config = FetchConfig::default().with_max_connections(0);
        assert!(matches!(config.validate(), Err(PollError::Configuration(_))));

        assert!(FetchConfig::default().validate().is_ok());
    }
}
