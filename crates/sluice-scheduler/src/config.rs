//! Configuration types for the admission scheduler.

use std::time::Duration;

use serde::Deserialize;

/// Scheduler configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Name identifying this process in event records.
    pub manager_name: String,
    /// Upper bound on concurrent admission commit tasks.
    pub worker_count: usize,
    /// Maximum delay between scheduling wake-ups when no events arrive.
    #[serde(with = "serde_duration_secs")]
    pub queue_scan_period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            manager_name: "sluice".to_owned(),
            worker_count: 5,
            queue_scan_period: Duration::from_secs(5),
        }
    }
}

/// Serde helper for Duration as seconds.
mod serde_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.manager_name, "sluice");
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.queue_scan_period, Duration::from_secs(5));
    }

    #[test]
    fn deserialises_durations_as_seconds() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"manager_name":"test","queue_scan_period":30}"#)
                .expect("config should parse");
        assert_eq!(config.manager_name, "test");
        assert_eq!(config.queue_scan_period, Duration::from_secs(30));
        assert_eq!(config.worker_count, 5);
    }
}
