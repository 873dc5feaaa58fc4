//! Configuration management for the vigil orchestrator

use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File-based configuration structure matching vigil.toml
#[derive(Debug, Deserialize)]
struct FileConfig {
    orchestrator: Option<OrchestratorSection>,
    scheduler: Option<SchedulerSection>,
}

#[derive(Debug, Deserialize)]
struct OrchestratorSection {
    data_dir: Option<PathBuf>,
    tool_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SchedulerSection {
    tick_secs: Option<u64>,
    disabled: Option<bool>,
}

/// Runtime configuration for the orchestrator
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root directory for job logs and findings artifacts
    pub data_dir: PathBuf,
    /// Per-line read timeout for external tools, in seconds
    pub tool_timeout_secs: u64,
    /// Scheduler tick interval, in seconds
    pub scheduler_tick_secs: u64,
    /// Operational switch: skip all scheduler ticks when set
    pub scheduler_disabled: bool,
    /// API token passed to wpscan when present in the environment
    pub wpscan_api_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            tool_timeout_secs: 3600,
            scheduler_tick_secs: 30,
            scheduler_disabled: false,
            wpscan_api_token: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from an optional TOML file, then applies
    /// environment overrides (`SCHEDULER_DISABLED`, `WPSCAN_API_TOKEN`,
    /// `VIGIL_DATA_DIR`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            let content = std::fs::read_to_string(path)?;
            let file_config: FileConfig = toml::from_str(&content)?;

            if let Some(orch) = file_config.orchestrator {
                if let Some(dir) = orch.data_dir {
                    config.data_dir = dir;
                }
                if let Some(timeout) = orch.tool_timeout_secs {
                    config.tool_timeout_secs = timeout;
                }
            }
            if let Some(sched) = file_config.scheduler {
                if let Some(tick) = sched.tick_secs {
                    config.scheduler_tick_secs = tick;
                }
                if let Some(disabled) = sched.disabled {
                    config.scheduler_disabled = disabled;
                }
            }
        }

        if let Ok(dir) = std::env::var("VIGIL_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if std::env::var("SCHEDULER_DISABLED").is_ok_and(|v| !v.is_empty()) {
            config.scheduler_disabled = true;
        }
        if let Ok(token) = std::env::var("WPSCAN_API_TOKEN") {
            if !token.is_empty() {
                config.wpscan_api_token = Some(token);
            }
        }

        Ok(config)
    }

    /// Root directory holding one subdirectory per job
    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }
}
