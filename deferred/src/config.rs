//! Configuration for deferred

use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::delay::CoordinatorConfig;
use crate::heap::MAX_INITIAL_CAPACITY;
use crate::scheduler::{HeapScheduler, SchedulerConfig};
use crate::task::{Task, TaskHandle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Jobs scheduled by `deferred run`
    #[serde(default = "default_jobs")]
    pub jobs: Vec<JobConfig>,
}

/// How a configured job repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobMode {
    Once,
    FixedDelay,
    FixedRate,
}

/// A demo job: a named payload that reports each firing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,

    pub mode: JobMode,

    /// Delay before the first firing
    #[serde(default)]
    pub delay_ms: u64,

    /// Interval for repeating modes; ignored for `once`
    #[serde(default)]
    pub period_ms: u64,

    /// Make every n-th run fail, to exercise failure reporting
    #[serde(default)]
    pub fail_every: Option<u64>,
}

fn default_jobs() -> Vec<JobConfig> {
    vec![
        JobConfig {
            name: "warmup".to_string(),
            mode: JobMode::Once,
            delay_ms: 50,
            period_ms: 0,
            fail_every: None,
        },
        JobConfig {
            name: "heartbeat".to_string(),
            mode: JobMode::FixedRate,
            delay_ms: 0,
            period_ms: 200,
            fail_every: None,
        },
        JobConfig {
            name: "poller".to_string(),
            mode: JobMode::FixedDelay,
            delay_ms: 100,
            period_ms: 300,
            fail_every: Some(3),
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            jobs: default_jobs(),
        }
    }
}

impl JobConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Whether run number `run` (1-based) should fail
    pub fn should_fail(&self, run: u64) -> bool {
        matches!(self.fail_every, Some(n) if n > 0 && run % n == 0)
    }

    /// Submit `task` to `scheduler` according to this job's mode
    pub fn submit(&self, scheduler: &HeapScheduler, task: &Task) -> crate::error::Result<TaskHandle> {
        debug!(job = %self.name, mode = ?self.mode, "JobConfig::submit: called");
        match self.mode {
            JobMode::Once => scheduler.schedule_once(task, self.delay()),
            JobMode::FixedDelay => scheduler.schedule_fixed_delay(task, self.delay(), self.period()),
            JobMode::FixedRate => scheduler.schedule_fixed_rate(task, self.delay(), self.period()),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::load_from(config_path);
        }

        let default_paths = [
            dirs::config_dir().map(|p| p.join("deferred").join("deferred.yml")),
            Some(PathBuf::from("deferred.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load_from(path);
            }
        }

        debug!("Config::load: no config file found, using defaults");
        Ok(Config::default())
    }

    fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load_from: called");
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read config file {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).context(format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .context(format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Reject values that would only fail later, at startup or first use
    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("scheduler.initial_capacity", self.scheduler.initial_capacity),
            ("coordinator.initial_capacity", self.coordinator.initial_capacity),
        ];
        for (field, capacity) in capacities {
            if capacity == 0 || capacity > MAX_INITIAL_CAPACITY {
                return Err(eyre!(
                    "{} must be between 1 and {}, got {}",
                    field,
                    MAX_INITIAL_CAPACITY,
                    capacity
                ));
            }
        }
        Ok(())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
