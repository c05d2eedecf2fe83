use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app_dirs::AppDirs;
use crate::difficulty::{SelectMethod, WrapPolicy};

/// Every recognized option, passed explicitly to the components that
/// consume it instead of read from a global settings table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub overwrite_mode: bool,
    pub lenient_mode: bool,
    pub require_space: bool,
    pub protected_backspace: bool,
    /// Trailing statistics window for difficulty estimation, in days
    pub history_window_days: i64,
    /// Candidate pool size for difficult/easy selection
    pub difficulty_sample_size: usize,
    /// A run below either floor re-presents the same text
    pub min_wpm: f64,
    pub min_accuracy: f64,
    /// Separate floors for generated lessons
    pub min_lesson_wpm: f64,
    pub min_lesson_accuracy: f64,
    /// Queue a review lesson from a run's weak words automatically
    pub auto_review: bool,
    /// Whether lesson runs contribute to the statistics history
    pub use_lesson_stats: bool,
    pub select_method: SelectMethod,
    pub wrap_policy: WrapPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            overwrite_mode: true,
            lenient_mode: false,
            require_space: true,
            protected_backspace: false,
            history_window_days: 30,
            difficulty_sample_size: 10,
            min_wpm: 0.0,
            min_accuracy: 0.0,
            min_lesson_wpm: 0.0,
            min_lesson_accuracy: 0.97,
            auto_review: false,
            use_lesson_stats: false,
            select_method: SelectMethod::Random,
            wrap_policy: WrapPolicy::Restart,
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = AppDirs::config_path().unwrap_or_else(|| PathBuf::from("cadenza_config.json"));
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            if let Ok(cfg) = serde_json::from_slice::<Config>(&bytes) {
                return cfg;
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}
