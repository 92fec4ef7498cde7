use anyhow::{Context, Result};
use machine_events::{
    DEFAULT_EVENTS_PATH, MachineDescriptor, MonitorOptions, ReconnectPolicy, Retention,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [reconnect]
//                    max_attempts = 50
//
//   env var:         MACHINE_MONITOR_RECONNECT__MAX_ATTEMPTS=50
//                    (double underscore = nesting)
//
// The machine inventory lives in config.toml as an array of tables:
//
//   [[machines]]
//   id = "gpu-1"
//   name = "GPU box"
//   endpoint = "https://gpu-1.example.com"

const ENV_PREFIX: &str = "MACHINE_MONITOR_";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileConfig {
    /// Path appended to every machine endpoint.
    #[serde(default = "default_events_path")]
    pub events_path: String,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub retention: RetentionFileConfig,
    #[serde(default)]
    pub machines: Vec<MachineDescriptor>,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            events_path: default_events_path(),
            reconnect: ReconnectFileConfig::default(),
            retention: RetentionFileConfig::default(),
            machines: Vec::new(),
        }
    }
}

/// Lives under `[reconnect]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: default_max_attempts(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Lives under `[retention]`. Zero means unbounded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RetentionFileConfig {
    #[serde(default)]
    pub max_events: usize,
    #[serde(default)]
    pub max_log_lines_per_machine: usize,
}

fn default_events_path() -> String {
    DEFAULT_EVENTS_PATH.to_string()
}
fn default_interval_ms() -> u64 {
    1000
}
fn default_max_attempts() -> u32 {
    20
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}

/// Build a figment that layers: defaults → config file → MACHINE_MONITOR_* env vars.
pub fn load_config(config_path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

// =============================================================================
// Runtime config
// =============================================================================

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub options: MonitorOptions,
    pub reconnect: ReconnectPolicy,
    pub machines: Vec<MachineDescriptor>,
}

impl MonitorConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            options: MonitorOptions {
                events_path: fc.events_path.clone(),
                retention: Retention {
                    max_events: fc.retention.max_events,
                    max_log_lines_per_machine: fc.retention.max_log_lines_per_machine,
                },
            },
            reconnect: ReconnectPolicy {
                interval: Duration::from_millis(fc.reconnect.interval_ms),
                max_attempts: fc.reconnect.max_attempts,
                connect_timeout: Duration::from_millis(fc.reconnect.connect_timeout_ms),
            },
            machines: fc.machines.clone(),
        }
    }

    pub fn load(config_path: &Path) -> Result<Self> {
        let fc: FileConfig = load_config(config_path)
            .extract()
            .with_context(|| format!("Failed to load config from {:?}", config_path))?;
        Ok(Self::from_file(&fc))
    }
}

// =============================================================================
// Paths (derived from --config, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct MonitorPaths {
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
}

impl MonitorPaths {
    pub fn new(custom_config: Option<PathBuf>) -> Result<Self> {
        let config_path = match custom_config {
            Some(path) => path,
            None => dirs::config_dir()
                .context("Could not determine the config directory")?
                .join("machine-monitor")
                .join("config.toml"),
        };

        let state_dir = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .context("Could not determine a state directory")?
            .join("machine-monitor");

        Ok(Self {
            config_path,
            state_dir,
        })
    }

    /// Where the dashboard writes its tracing output.
    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join("machine-monitor.log")
    }

    pub fn ensure_state_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("Failed to create state directory: {:?}", self.state_dir))
    }
}
