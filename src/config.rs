//! Engine, executor and Chrome settings with their defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Engine settings. The binary fills these from its command line.
#[derive(Debug, Clone)]
pub struct AnnotatorConfig {
    /// Root for task working directories and archives.
    pub data_dir: PathBuf,
    /// Console origin the tracking script notifies.
    pub notify_base: String,
    pub executor: ExecutorConfig,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("annotation_data"),
            notify_base: "http://127.0.0.1:3000".to_string(),
            executor: ExecutorConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub click_timeout: Duration,
    pub type_timeout: Duration,
    /// Longer: enumerating options can be slow.
    pub select_timeout: Duration,
    /// Pause between unlocking the element and driving it.
    pub settle_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            click_timeout: Duration::from_secs(5),
            type_timeout: Duration::from_secs(5),
            select_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(100),
        }
    }
}

/// How to start Chrome.
#[derive(Debug, Clone)]
pub struct ChromeConfig {
    pub headless: bool,
    /// Explicit binary; found automatically when `None`.
    pub path: Option<PathBuf>,
    pub user_data_dir: PathBuf,
    pub window_size: (u32, u32),
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            headless: false,
            path: None,
            user_data_dir: default_profile_dir(),
            window_size: (1280, 900),
        }
    }
}

/// Dedicated Chrome profile so the operator's own profile is never locked.
pub fn default_profile_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("task-annotator")
        .join("profile")
}
