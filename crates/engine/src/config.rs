//! Construction-time configuration for a [`crate::TxnProcessor`].

use std::time::Duration;

use ccstore_core::{Error, Result};

/// Tuning knobs for a [`crate::TxnProcessor`], independent of which protocol
/// it runs.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Size of the CPU-pinned worker pool. Default 7, the reference count.
    pub workers: usize,
    /// Number of keys the storage backend is sized for.
    pub keyspace_size: u64,
    /// Strife spot-sampling breadth.
    pub strife_k: usize,
    /// Strife merge threshold, in `(0.0, 1.0]`.
    pub strife_alpha: f64,
    /// Strife batch-collection window.
    pub strife_batch_window: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: 7,
            keyspace_size: 1_000_000,
            strife_k: 23,
            strife_alpha: 0.2,
            strife_batch_window: Duration::from_millis(10),
        }
    }
}

impl ProcessorConfig {
    /// Reject a configuration that would silently misbehave rather than
    /// clamp it into range: zero workers or an out-of-range `strife_alpha`
    /// is a caller mistake, not a request to round.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".into()));
        }
        if self.keyspace_size == 0 {
            return Err(Error::InvalidConfig("keyspace_size must be at least 1".into()));
        }
        if self.strife_k == 0 {
            return Err(Error::InvalidConfig("strife_k must be at least 1".into()));
        }
        if !(self.strife_alpha > 0.0 && self.strife_alpha <= 1.0) {
            return Err(Error::InvalidConfig(
                "strife_alpha must be in (0.0, 1.0]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ProcessorConfig::default().validate().expect("defaults must validate");
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = ProcessorConfig {
            workers: 0,
            ..ProcessorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_strife_k_is_rejected() {
        let config = ProcessorConfig {
            strife_k: 0,
            ..ProcessorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn alpha_outside_unit_interval_is_rejected() {
        let too_high = ProcessorConfig {
            strife_alpha: 1.5,
            ..ProcessorConfig::default()
        };
        assert!(too_high.validate().is_err());

        let zero = ProcessorConfig {
            strife_alpha: 0.0,
            ..ProcessorConfig::default()
        };
        assert!(zero.validate().is_err());
    }
}
