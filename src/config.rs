use crate::fleet::constants::{bandwidth, input, interpolation, tick};

/// Invalid configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("tick_rate must be 1-240, got {0}")]
    TickRate(u32),
    #[error("input_rate_limit must be at least 1")]
    InputRateLimit,
    #[error("full_sync_interval_ms must be at least one tick ({tick_ms}ms), got {got}")]
    FullSyncInterval { tick_ms: u64, got: u64 },
    #[error("max_unacked_inputs must be at least 1")]
    MaxUnackedInputs,
}

/// Synchronization settings
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Apply local inputs immediately instead of waiting for the server
    pub prediction_enabled: bool,
    /// Snap and replay on authoritative disagreement
    pub reconciliation_enabled: bool,
    /// Compact-keyed inputs and batched delta updates
    pub compression_enabled: bool,
    /// Base interpolation delay for remote ships (0-500)
    pub interpolation_delay_ms: u64,
    /// Simulation tick rate in Hz
    pub tick_rate: u32,
    /// Accepted inputs per second
    pub input_rate_limit: u32,
    pub full_sync_interval_ms: u64,
    /// Unacknowledged inputs kept before the oldest is dropped
    pub max_unacked_inputs: usize,
    /// Port of the metrics HTTP endpoint
    pub metrics_port: u16,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            prediction_enabled: true,
            reconciliation_enabled: true,
            compression_enabled: true,
            interpolation_delay_ms: interpolation::DEFAULT_DELAY_MS,
            tick_rate: tick::RATE,
            input_rate_limit: input::RATE_LIMIT,
            full_sync_interval_ms: bandwidth::FULL_SYNC_INTERVAL_MS,
            max_unacked_inputs: input::MAX_UNACKED,
            metrics_port: 9090,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl SyncConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load config from an arbitrary key lookup. Invalid values are logged and
    /// the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        for (key, flag) in [
            ("PREDICTION_ENABLED", &mut config.prediction_enabled),
            ("RECONCILIATION_ENABLED", &mut config.reconciliation_enabled),
            ("COMPRESSION_ENABLED", &mut config.compression_enabled),
        ] {
            if let Some(value) = lookup(key) {
                match parse_bool(&value) {
                    Some(parsed) => *flag = parsed,
                    None => tracing::warn!("Invalid {} '{}', using default", key, value),
                }
            }
        }

        if let Some(delay) = lookup("INTERPOLATION_DELAY_MS") {
            if let Ok(parsed) = delay.parse::<u64>() {
                if parsed > interpolation::MAX_DELAY_MS {
                    tracing::warn!(
                        "INTERPOLATION_DELAY_MS {} above {}, clamping",
                        parsed,
                        interpolation::MAX_DELAY_MS
                    );
                }
                config.interpolation_delay_ms = parsed.min(interpolation::MAX_DELAY_MS);
            } else {
                tracing::warn!("Invalid INTERPOLATION_DELAY_MS '{}', using default", delay);
            }
        }

        if let Some(rate) = lookup("TICK_RATE") {
            match rate.parse::<u32>() {
                Ok(parsed) if (1..=240).contains(&parsed) => config.tick_rate = parsed,
                Ok(_) => tracing::warn!("TICK_RATE must be 1-240, using default"),
                Err(_) => tracing::warn!("Invalid TICK_RATE '{}', using default", rate),
            }
        }

        if let Some(limit) = lookup("INPUT_RATE_LIMIT") {
            match limit.parse::<u32>() {
                Ok(parsed) if parsed > 0 => config.input_rate_limit = parsed,
                Ok(_) => tracing::warn!("INPUT_RATE_LIMIT must be > 0, using default"),
                Err(_) => tracing::warn!("Invalid INPUT_RATE_LIMIT '{}', using default", limit),
            }
        }

        if let Some(interval) = lookup("FULL_SYNC_INTERVAL_MS") {
            match interval.parse::<u64>() {
                Ok(parsed) if parsed > 0 => config.full_sync_interval_ms = parsed,
                Ok(_) => tracing::warn!("FULL_SYNC_INTERVAL_MS must be > 0, using default"),
                Err(_) => {
                    tracing::warn!("Invalid FULL_SYNC_INTERVAL_MS '{}', using default", interval)
                }
            }
        }

        if let Some(port) = lookup("METRICS_PORT") {
            match port.parse::<u16>() {
                Ok(parsed) if parsed > 0 => config.metrics_port = parsed,
                Ok(_) => tracing::warn!("METRICS_PORT must be > 0, using default"),
                Err(_) => tracing::warn!("Invalid METRICS_PORT '{}', using default", port),
            }
        }

        config
    }

    /// Tick duration in milliseconds
    pub fn tick_duration_ms(&self) -> u64 {
        1000 / u64::from(self.tick_rate.max(1))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > 240 {
            return Err(ConfigError::TickRate(self.tick_rate));
        }
        if self.input_rate_limit == 0 {
            return Err(ConfigError::InputRateLimit);
        }
        if self.full_sync_interval_ms < self.tick_duration_ms() {
            return Err(ConfigError::FullSyncInterval {
                tick_ms: self.tick_duration_ms(),
                got: self.full_sync_interval_ms,
            });
        }
        if self.max_unacked_inputs == 0 {
            return Err(ConfigError::MaxUnackedInputs);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> SyncConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(config.prediction_enabled);
        assert!(config.reconciliation_enabled);
        assert!(config.compression_enabled);
        assert_eq!(config.interpolation_delay_ms, 100);
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.input_rate_limit, 20);
        assert_eq!(config.full_sync_interval_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_and_values_from_lookup() {
        let config = from_pairs(&[
            ("PREDICTION_ENABLED", "false"),
            ("COMPRESSION_ENABLED", "0"),
            ("TICK_RATE", "60"),
            ("INPUT_RATE_LIMIT", "10"),
            ("METRICS_PORT", "9100"),
        ]);
        assert!(!config.prediction_enabled);
        assert!(config.reconciliation_enabled);
        assert!(!config.compression_enabled);
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.input_rate_limit, 10);
        assert_eq!(config.metrics_port, 9100);
    }

    #[test]
    fn test_interpolation_delay_is_clamped() {
        assert_eq!(
            from_pairs(&[("INTERPOLATION_DELAY_MS", "2000")]).interpolation_delay_ms,
            500
        );
        assert_eq!(
            from_pairs(&[("INTERPOLATION_DELAY_MS", "0")]).interpolation_delay_ms,
            0
        );
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("RECONCILIATION_ENABLED", "maybe"),
            ("TICK_RATE", "0"),
            ("INPUT_RATE_LIMIT", "lots"),
            ("INTERPOLATION_DELAY_MS", "-5"),
        ]);
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_validate() {
        let config = SyncConfig {
            full_sync_interval_ms: 10,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FullSyncInterval { .. })
        ));

        let config = SyncConfig {
            input_rate_limit: 0,
            ..SyncConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InputRateLimit));
    }

    #[test]
    fn test_load_or_default() {
        let config = SyncConfig::load_or_default();
        assert!(config.tick_rate > 0);
    }
}
