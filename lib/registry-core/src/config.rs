//! Registry timing configuration

use crate::{RegistryError, Result};
use std::time::Duration;

/// Entries not heartbeated for this long are evicted
pub const DEFAULT_EXPIRE_TIME: Duration = Duration::from_secs(60);
/// Period of the cleanup loop
pub const DEFAULT_CLEAN_INTERVAL: Duration = Duration::from_secs(3);
/// Lower bound applied to the cleanup period
pub const MIN_CLEAN_INTERVAL: Duration = Duration::from_millis(100);

/// Timing configuration for a [`Registry`](crate::Registry)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Time without heartbeat after which an entry is considered dead
    pub expire_time: Duration,
    /// Interval between two cleanup sweeps
    pub clean_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            expire_time: DEFAULT_EXPIRE_TIME,
            clean_interval: DEFAULT_CLEAN_INTERVAL,
        }
    }
}

impl RegistryConfig {
    /// Build a validated configuration.
    ///
    /// The clean interval is raised to [`MIN_CLEAN_INTERVAL`] and must stay
    /// below the expire time, otherwise dead entries would linger for more
    /// than one expiry period.
    pub fn new(expire_time: Duration, clean_interval: Duration) -> Result<Self> {
        let clean_interval = clean_interval.max(MIN_CLEAN_INTERVAL);

        if expire_time.is_zero() {
            return Err(RegistryError::InvalidConfiguration(
                "expire time must be greater than zero".to_string(),
            ));
        }

        if clean_interval >= expire_time {
            return Err(RegistryError::InvalidConfiguration(format!(
                "clean interval {:?} must be below expire time {:?}",
                clean_interval, expire_time
            )));
        }

        Ok(Self {
            expire_time,
            clean_interval,
        })
    }
}
