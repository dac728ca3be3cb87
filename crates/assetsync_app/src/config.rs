use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use assetsync_engine::{
    CacheSettings, DownloadSettings, EngineConfig, EvictionPolicy, ImportSettings,
    ProgressPolicy, UploadSettings,
};
use engine_logging::{engine_info, engine_warn, LogDestination};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

/// Host settings read from a `.ron` file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache_dir: PathBuf,
    /// Clamped to the supported range when converted.
    pub cache_gigabytes: u64,
    pub temp_dir: PathBuf,
    pub progress_cadence_ms: u64,
    pub progress_min_delta: f64,
    pub connect_timeout_secs: u64,
    /// Log to this file in addition to the terminal.
    pub log_file: Option<PathBuf>,
    pub log_level: String,
    /// Where sticky operations are kept between runs.
    pub state_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let base = std::env::temp_dir().join("assetsync");
        Self {
            cache_dir: base.join("cache"),
            cache_gigabytes: 10,
            temp_dir: base.join("transfers"),
            progress_cadence_ms: 200,
            progress_min_delta: 0.001,
            connect_timeout_secs: 10,
            log_file: None,
            log_level: "info".to_string(),
            state_dir: base,
        }
    }
}

impl Settings {
    /// Missing files yield the defaults; so do malformed ones, with a warning.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                engine_info!("No settings at {:?}, using defaults", path);
                return Self::default();
            }
            Err(err) => {
                engine_warn!("Failed to read settings from {:?}: {}", path, err);
                return Self::default();
            }
        };

        match ron::from_str(&content) {
            Ok(settings) => settings,
            Err(err) => {
                engine_warn!("Failed to parse settings from {:?}: {}", path, err);
                Self::default()
            }
        }
    }

    pub fn progress_policy(&self) -> ProgressPolicy {
        ProgressPolicy {
            cadence: Duration::from_millis(self.progress_cadence_ms.max(1)),
            min_delta: self.progress_min_delta.max(0.0),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            import: ImportSettings {
                temp_dir: self.temp_dir.join("downloads"),
                progress: self.progress_policy(),
            },
            upload: UploadSettings {
                temp_dir: self.temp_dir.join("uploads"),
                progress: self.progress_policy(),
            },
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings::new(
            self.cache_dir.clone(),
            EvictionPolicy::from_gigabytes(self.cache_gigabytes),
        )
    }

    pub fn download_settings(&self) -> DownloadSettings {
        DownloadSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ..DownloadSettings::default()
        }
    }

    pub fn level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or_else(|_| {
            engine_warn!("Unknown log level {:?}, using info", self.log_level);
            LevelFilter::Info
        })
    }

    pub fn log_destination(&self) -> LogDestination {
        match &self.log_file {
            Some(path) => LogDestination::Both(path.clone()),
            None => LogDestination::Terminal,
        }
    }
}
