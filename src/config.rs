/*!
 * Configuration structures and defaults for the migration engine
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CopeerError, Result};

/// Destination-volume placement strategy (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskStrategy {
    Fill,
    RoundRobin,
}

impl Default for DiskStrategy {
    fn default() -> Self {
        Self::Fill
    }
}

/// Which phase(s) of a plan to dispatch; a pure post-planning filter, not a
/// planner concept (kept only at the CLI boundary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    All,
    CopyOnly,
    ArchiveOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn default_threshold() -> f64 {
    98.0
}

fn default_threads() -> usize {
    8
}

fn default_min_files_for_sequence() -> usize {
    50
}

fn default_image_extensions() -> Vec<String> {
    [
        "dpx", "exr", "tif", "tiff", "jpg", "jpeg", "png", "tga", "bmp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_state_file() -> String {
    "copier_state.csv".to_string()
}

fn default_mapping_file() -> String {
    "mapping.csv".to_string()
}

fn default_dry_run_mapping_file() -> String {
    "dry_run_mapping.csv".to_string()
}

fn default_error_log_file() -> String {
    "errors.log".to_string()
}

fn default_max_concurrent_disks() -> usize {
    1
}

/// Engine configuration, loaded from YAML (§6). All fields are optional in
/// the file itself; `Config::default()` supplies values for everything
/// except `mount_points`, which the caller (CLI) must validate is non-empty
/// before constructing a planner/supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mount_points: Vec<PathBuf>,

    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default)]
    pub source_root: Option<PathBuf>,

    #[serde(default)]
    pub destination_root: Option<PathBuf>,

    #[serde(default = "default_state_file")]
    pub state_file: String,

    #[serde(default = "default_mapping_file")]
    pub mapping_file: String,

    #[serde(default = "default_dry_run_mapping_file")]
    pub dry_run_mapping_file: String,

    #[serde(default = "default_error_log_file")]
    pub error_log_file: String,

    #[serde(default = "default_threads")]
    pub threads: usize,

    #[serde(default)]
    pub disk_strategy: DiskStrategy,

    #[serde(default = "default_max_concurrent_disks")]
    pub max_concurrent_disks: usize,

    #[serde(default = "default_min_files_for_sequence")]
    pub min_files_for_sequence: usize,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default)]
    pub dry_run: bool,

    /// Ambient, not a recognized YAML key: overridden by `--verbose`/`--log-file`.
    #[serde(skip)]
    pub log_level: LogLevel,
    #[serde(skip)]
    pub log_file: Option<PathBuf>,
    #[serde(skip)]
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_points: Vec::new(),
            threshold: default_threshold(),
            source_root: None,
            destination_root: None,
            state_file: default_state_file(),
            mapping_file: default_mapping_file(),
            dry_run_mapping_file: default_dry_run_mapping_file(),
            error_log_file: default_error_log_file(),
            threads: default_threads(),
            disk_strategy: DiskStrategy::default(),
            max_concurrent_disks: default_max_concurrent_disks(),
            min_files_for_sequence: default_min_files_for_sequence(),
            image_extensions: default_image_extensions(),
            dry_run: false,
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CopeerError::Config(format!("failed to read config file: {e}")))?;
        serde_yaml::from_str(&content)
            .map_err(|e| CopeerError::Config(format!("failed to parse config file: {e}")))
    }

    /// Load with fallback priority:
    /// 1. `./copeer.yaml` (project-specific)
    /// 2. `~/.copeer/copeer.yaml` (user defaults)
    /// 3. Built-in defaults, written back to `~/.copeer/copeer.yaml` so the
    ///    operator has something to edit next time.
    pub fn load_with_fallback() -> Self {
        if let Ok(config) = Self::load(Path::new("copeer.yaml")) {
            return config;
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".copeer").join("copeer.yaml");
            if let Ok(config) = Self::load(&user_config) {
                return config;
            }

            let defaults = Self::default();
            if let Ok(serialized) = serde_yaml::to_string(&defaults) {
                if let Some(parent) = user_config.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                let _ = std::fs::write(&user_config, serialized);
            }
            return defaults;
        }

        Self::default()
    }

    /// Validate invariants that the core does not check for itself
    /// (empty `mount_points` is a configuration error, not a planner concern).
    pub fn validate(&self) -> Result<()> {
        if self.mount_points.is_empty() {
            return Err(CopeerError::Config(
                "mount_points must contain at least one destination".to_string(),
            ));
        }
        if self.max_concurrent_disks == 0 {
            return Err(CopeerError::Config(
                "max_concurrent_disks must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.threshold, 98.0);
        assert_eq!(config.threads, 8);
        assert_eq!(config.min_files_for_sequence, 50);
        assert_eq!(config.disk_strategy, DiskStrategy::Fill);
        assert!(!config.dry_run);
    }

    #[test]
    fn validate_rejects_empty_mount_points() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_one_mount_point() {
        let mut config = Config::default();
        config.mount_points.push(PathBuf::from("/mnt/a"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_minimal_yaml() {
        let yaml = "mount_points:\n  - /mnt/a\n  - /mnt/b\nthreshold: 90.0\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mount_points, vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/b")]);
        assert_eq!(config.threshold, 90.0);
        assert_eq!(config.threads, 8, "unspecified keys fall back to defaults");
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let yaml = "mount_points:\n  - /mnt/a\nsome_future_key: true\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mount_points.len(), 1);
    }
}
