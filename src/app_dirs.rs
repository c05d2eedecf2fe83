use directories::ProjectDirs;
use std::path::PathBuf;

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    pub fn db_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("cadenza.db"))
    }

    pub fn results_log_path() -> Option<PathBuf> {
        Self::state_dir().map(|dir| dir.join("results.csv"))
    }

    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "cadenza")
            .map(|proj_dirs| proj_dirs.config_dir().join("config.json"))
    }

    fn state_dir() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            Some(
                PathBuf::from(home)
                    .join(".local")
                    .join("state")
                    .join("cadenza"),
            )
        } else {
            ProjectDirs::from("", "", "cadenza")
                .map(|proj_dirs| proj_dirs.data_local_dir().to_path_buf())
        }
    }
}
