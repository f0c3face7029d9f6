// Daemon settings
// Layered: built-in defaults -> optional TOML file (KILN_CONFIG) -> KILN_* environment

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use kiln_core::application::GateConfig;

pub const CONFIG_PATH_ENV: &str = "KILN_CONFIG";
const ENV_PREFIX: &str = "KILN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data_dir: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub retention_hours: i64,
    pub maintenance_interval_minutes: u64,

    pub generation_overhead_gb: f64,
    pub min_free_memory_percent: f64,
    pub gpu_busy_threshold: f64,
    pub cpu_busy_threshold: f64,

    /// External command used by the media kinds; unset disables them
    pub media_runner: Option<String>,
    pub media_runner_args: Vec<String>,
    pub media_runner_timeout_secs: Option<u64>,
    pub download_dir: String,

    /// Serialize processing across all kinds
    pub shared_device_slot: bool,
    pub log_dir: Option<String>,

    pub rate_limit_burst: u32,
    pub rate_limit_rate: u32,
}

impl Default for Settings {
    fn default() -> Self {
        let gate = GateConfig::default();
        Self {
            data_dir: "~/.kiln/data".to_string(),
            rpc_host: "127.0.0.1".to_string(),
            rpc_port: 9537,
            retention_hours: 24,
            maintenance_interval_minutes: 60,
            generation_overhead_gb: gate.generation_overhead_gb,
            min_free_memory_percent: gate.min_free_memory_percent,
            gpu_busy_threshold: gate.gpu_busy_threshold,
            cpu_busy_threshold: gate.cpu_busy_threshold,
            media_runner: None,
            media_runner_args: Vec::new(),
            media_runner_timeout_secs: None,
            download_dir: "~/.kiln/models".to_string(),
            shared_device_slot: false,
            log_dir: None,
            rate_limit_burst: 20,
            rate_limit_rate: 5,
        }
    }
}

impl Settings {
    /// Load settings from the file named by `KILN_CONFIG` (if any) and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).ok();
        Self::load_from(file.as_deref())
    }

    pub fn load_from(file: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            let path = shellexpand::tilde(path).into_owned();
            builder = builder.add_source(File::with_name(&path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("media_runner_args"),
        );

        builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn data_dir(&self) -> PathBuf {
        expand(&self.data_dir)
    }

    pub fn download_dir(&self) -> PathBuf {
        expand(&self.download_dir)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.log_dir.as_deref().map(expand)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.retention_hours)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_minutes.max(1) * 60)
    }

    pub fn gate(&self) -> GateConfig {
        GateConfig {
            generation_overhead_gb: self.generation_overhead_gb,
            min_free_memory_percent: self.min_free_memory_percent,
            gpu_busy_threshold: self.gpu_busy_threshold,
            cpu_busy_threshold: self.cpu_busy_threshold,
        }
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let settings = Settings::load_from(None).unwrap();
        assert_eq!(settings.rpc_port, 9537);
        assert_eq!(settings.retention_hours, 24);
        assert!(!settings.shared_device_slot);
        assert_eq!(settings.gate(), GateConfig::default());
        assert!(!settings.data_dir().to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "rpc_port = 9999\nmedia_runner = \"/opt/runner\"\nshared_device_slot = true\ngpu_busy_threshold = 50.0"
        )
        .unwrap();

        let settings = Settings::load_from(file.path().to_str()).unwrap();
        assert_eq!(settings.rpc_port, 9999);
        assert_eq!(settings.media_runner.as_deref(), Some("/opt/runner"));
        assert!(settings.shared_device_slot);
        assert_eq!(settings.gate().gpu_busy_threshold, 50.0);
        // untouched keys keep their defaults
        assert_eq!(settings.maintenance_interval_minutes, 60);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let settings = Settings::load_from(Some("/nonexistent/kiln.toml")).unwrap();
        assert_eq!(settings.rpc_host, "127.0.0.1");
    }
}
