use meter_sdk::selector::{self, DynAggregatorSelector};
use meter_sdk::{AccumulatorConfig, Temporality};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_COLLECT_PERIOD: Duration = Duration::from_secs(10);
pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(with = "humantime_serde", default = "default_collect_period")]
    pub collect_period: Duration,
    #[serde(with = "humantime_serde", default = "default_collect_timeout")]
    pub collect_timeout: Duration,
    #[serde(default)]
    pub temporality: Temporality,
    /// Explicit bucket boundaries for histograms. Without them histograms
    /// are summarised as min/max/sum/count.
    #[serde(default)]
    pub histogram_boundaries: Option<Vec<f64>>,
    #[serde(default)]
    pub stale_after_cycles: Option<u32>,
}

/// File layout used by the TOML format, where the settings live under a
/// `[controller]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerFile {
    pub controller: ControllerConfig,
}

fn default_collect_period() -> Duration {
    DEFAULT_COLLECT_PERIOD
}

fn default_collect_timeout() -> Duration {
    DEFAULT_COLLECT_TIMEOUT
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            collect_period: DEFAULT_COLLECT_PERIOD,
            collect_timeout: DEFAULT_COLLECT_TIMEOUT,
            temporality: Temporality::default(),
            histogram_boundaries: None,
            stale_after_cycles: None,
        }
    }
}

impl ControllerConfig {
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.collect_period.is_zero() {
            return Err("collect_period must be > 0".to_string());
        }

        if self.collect_timeout.is_zero() {
            return Err("collect_timeout must be > 0".to_string());
        }

        if let Some(boundaries) = &self.histogram_boundaries {
            if boundaries.is_empty() {
                return Err("histogram_boundaries cannot be empty".to_string());
            }
            if let Some(bad) = boundaries.iter().find(|b| !b.is_finite()) {
                return Err(format!("histogram boundary {} is not finite", bad));
            }
        }

        if self.stale_after_cycles == Some(0) {
            return Err("stale_after_cycles must be >= 1".to_string());
        }

        Ok(())
    }

    pub fn selector(&self) -> DynAggregatorSelector {
        match &self.histogram_boundaries {
            Some(boundaries) => Arc::new(selector::with_histogram(boundaries)),
            None => Arc::new(selector::inexpensive()),
        }
    }

    pub fn accumulator_config(&self) -> AccumulatorConfig {
        AccumulatorConfig {
            stale_after_cycles: self.stale_after_cycles,
        }
    }
}

#[derive(Default)]
pub struct ControllerConfigBuilder {
    collect_period: Option<Duration>,
    collect_timeout: Option<Duration>,
    temporality: Temporality,
    histogram_boundaries: Option<Vec<f64>>,
    stale_after_cycles: Option<u32>,
}

impl ControllerConfigBuilder {
    pub fn collect_period(mut self, period: Duration) -> Self {
        self.collect_period = Some(period);
        self
    }

    pub fn collect_timeout(mut self, timeout: Duration) -> Self {
        self.collect_timeout = Some(timeout);
        self
    }

    pub fn temporality(mut self, temporality: Temporality) -> Self {
        self.temporality = temporality;
        self
    }

    pub fn histogram_boundaries(mut self, boundaries: impl Into<Vec<f64>>) -> Self {
        self.histogram_boundaries = Some(boundaries.into());
        self
    }

    pub fn stale_after_cycles(mut self, cycles: u32) -> Self {
        self.stale_after_cycles = Some(cycles);
        self
    }

    pub fn build(self) -> ControllerConfig {
        ControllerConfig {
            collect_period: self.collect_period.unwrap_or(DEFAULT_COLLECT_PERIOD),
            collect_timeout: self.collect_timeout.unwrap_or(DEFAULT_COLLECT_TIMEOUT),
            temporality: self.temporality,
            histogram_boundaries: self.histogram_boundaries,
            stale_after_cycles: self.stale_after_cycles,
        }
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
