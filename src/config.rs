//! Scenario configuration loaded from TOML.
//!
//! ```toml
//! [monitor]
//! philosophers = 5
//! sweets = 100
//! termination = { consumption_target = 250 }
//!
//! [table]
//! sweets = 5000
//! forks = ["A", "B", "C"]
//! strategy = "global_order"
//!
//! [[table.seats]]
//! name = "Socrate"
//! first = "A"
//! second = "B"
//!
//! [pipeline]
//! capacity = 5
//! items = 20
//! ```
//!
//! Every section and field is optional; missing ones take the defaults of
//! the classroom exercises.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dining::{DiningTable, Fairness, Strategy};
use crate::error::ConfigError;
use crate::pool::{ResourcePool, Termination};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    pub monitor: MonitorConfig,
    pub table: TableConfig,
    pub pipeline: PipelineConfig,
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub philosophers: usize,
    pub sweets: u64,
    pub termination: Termination,
    /// Units per refill; defaults to `sweets`.
    pub refill_batch: Option<u64>,
    pub think_time_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            philosophers: 5,
            sweets: 100,
            termination: Termination::Exhaustion,
            refill_batch: None,
            think_time_ms: 0,
        }
    }
}

impl MonitorConfig {
    pub fn pool(&self) -> ResourcePool {
        ResourcePool::new(self.sweets, self.termination)
    }

    pub fn think_time(&self) -> Duration {
        Duration::from_millis(self.think_time_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeatConfig {
    pub name: String,
    pub first: String,
    pub second: String,
}

impl SeatConfig {
    fn new(name: &str, first: &str, second: &str) -> Self {
        Self {
            name: name.into(),
            first: first.into(),
            second: second.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableConfig {
    pub sweets: u64,
    pub forks: Vec<String>,
    pub seats: Vec<SeatConfig>,
    pub strategy: Strategy,
    pub fairness: Fairness,
    pub opening_hesitation_ms: u64,
    pub patience_ms: u64,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            sweets: 5_000,
            forks: vec!["A".into(), "B".into(), "C".into()],
            seats: vec![
                SeatConfig::new("Socrate", "A", "B"),
                SeatConfig::new("Platon", "B", "C"),
                SeatConfig::new("Kant", "A", "C"),
            ],
            strategy: Strategy::AsAssigned,
            fairness: Fairness::Barging,
            opening_hesitation_ms: 0,
            patience_ms: 2_000,
        }
    }
}

impl TableConfig {
    pub fn patience(&self) -> Duration {
        Duration::from_millis(self.patience_ms)
    }

    /// Resolves fork names and builds the table.
    pub fn build(&self) -> Result<DiningTable, ConfigError> {
        let index_of = |seat: &SeatConfig, fork: &str| {
            self.forks
                .iter()
                .position(|f| f == fork)
                .ok_or_else(|| ConfigError::UnknownFork {
                    seat: seat.name.clone(),
                    fork: fork.to_string(),
                })
        };

        let mut builder = DiningTable::builder(self.sweets)
            .strategy(self.strategy)
            .fairness(self.fairness)
            .opening_hesitation(Duration::from_millis(self.opening_hesitation_ms));
        for fork in &self.forks {
            builder = builder.fork(fork.as_str());
        }
        for seat in &self.seats {
            let (first, second) = (index_of(seat, &seat.first)?, index_of(seat, &seat.second)?);
            builder = builder.seat(seat.name.as_str(), first, second);
        }
        builder.build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub capacity: usize,
    /// The producer sends `1..=items`.
    pub items: i64,
    pub sentinel: i64,
    pub producer_pause_ms: u64,
    pub consumer_pause_ms: u64,
    pub patience_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            items: 20,
            sentinel: 0,
            producer_pause_ms: 100,
            consumer_pause_ms: 500,
            patience_ms: 30_000,
        }
    }
}

impl PipelineConfig {
    pub fn values(&self) -> std::ops::RangeInclusive<i64> {
        1..=self.items
    }

    pub fn patience(&self) -> Duration {
        Duration::from_millis(self.patience_ms)
    }
}

// =============================================================================
// Loading and validation
// =============================================================================

impl ScenarioConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Reads `path` if given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.philosophers == 0 {
            return Err(ConfigError::invalid("monitor.philosophers", "must be at least 1"));
        }
        if let Termination::ConsumptionTarget(_) = self.monitor.termination {
            if self.monitor.sweets == 0 {
                return Err(ConfigError::invalid(
                    "monitor.sweets",
                    "a refilled pool needs room for at least one sweet",
                ));
            }
        }
        if self.monitor.refill_batch == Some(0) {
            return Err(ConfigError::invalid("monitor.refill_batch", "must be at least 1"));
        }

        if self.table.seats.is_empty() {
            return Err(ConfigError::invalid("table.seats", "at least one philosopher must sit down"));
        }
        for (i, fork) in self.table.forks.iter().enumerate() {
            if self.table.forks[..i].contains(fork) {
                return Err(ConfigError::invalid("table.forks", format!("'{fork}' is declared twice")));
            }
        }
        for seat in &self.table.seats {
            for fork in [&seat.first, &seat.second] {
                if !self.table.forks.contains(fork) {
                    return Err(ConfigError::UnknownFork {
                        seat: seat.name.clone(),
                        fork: fork.clone(),
                    });
                }
            }
            if seat.first == seat.second {
                return Err(ConfigError::invalid(
                    format!("table.seats.{}", seat.name),
                    "first and second fork must differ",
                ));
            }
        }

        if self.pipeline.capacity == 0 {
            return Err(ConfigError::invalid("pipeline.capacity", "must be at least 1"));
        }
        if self.pipeline.values().contains(&self.pipeline.sentinel) {
            return Err(ConfigError::invalid(
                "pipeline.sentinel",
                format!("{} is one of the produced values", self.pipeline.sentinel),
            ));
        }
        Ok(())
    }
}
