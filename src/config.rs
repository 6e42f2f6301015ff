//! Daemon configuration: where the shared runtime files live, what the
//! control plane binds to, and which external tool names to shell out to.
//! Layered the same way the teacher does it — an optional file, a default
//! file in the config dir, then `STOPLIGHT_`-prefixed environment
//! variables — via the `config` crate.

use crate::paths::get_config_dir;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self { daemon: DaemonConfig::default() }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct DaemonConfig {
    /// HTTP host the control plane binds to. spec.md §6 pins this to the
    /// loopback interface; kept configurable only so tests can bind an
    /// ephemeral port.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Name of the external GPU-introspection binary.
    #[serde(default = "default_gpu_tool")]
    pub gpu_tool: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tick_interval_secs: default_tick_interval_secs(),
            gpu_tool: default_gpu_tool(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_tick_interval_secs() -> u64 {
    5
}

fn default_gpu_tool() -> String {
    "nvidia-smi".to_string()
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            eprintln!("Warning: Config file {config_path:?} not found.");
        }
    }

    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("stoplight.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    let settings = config::Config::builder();
    let settings = config_vec.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    settings
        .add_source(config::Environment::with_prefix("STOPLIGHT").separator("_").try_parsing(true))
        .build()?
        .try_deserialize()
}
