use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::AppError;
use crate::notify::MessageTemplates;
use crate::platform::RuntimePermission;

pub const ENV_CONFIG: &str = "COUNTDOWN_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub countdown: CountdownConfig,
    pub notifications: NotificationConfig,
    pub messages: MessageTemplates,
    /// Command run when a completion notification is tapped. Example: ["xdg-open", "myapp://main"]
    pub relaunch_cmd: Option<Vec<String>>,
    /// Also write logs to this file, rotated daily.
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountdownConfig {
    /// First remaining-seconds value; the run shows `seconds..=0`.
    pub seconds: u64,
    pub tick_millis: u64,
}

impl Default for CountdownConfig {
    fn default() -> Self {
        Self {
            seconds: 10,
            tick_millis: 1000,
        }
    }
}

impl CountdownConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub runtime_permission: RuntimePermission,
    pub app_name: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            runtime_permission: RuntimePermission::NotRequired,
            app_name: "Countdown".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Resolve and load the config. A missing file at the default location
    /// yields defaults; an explicitly named file must exist.
    pub fn find_and_load(cli_value: Option<PathBuf>) -> Result<(PathBuf, Self), AppError> {
        let explicit = cli_value.is_some() || std::env::var_os(ENV_CONFIG).is_some();
        let path = resolve_config_path(cli_value)?;
        if !explicit && !path.exists() {
            return Ok((path, Self::default()));
        }
        let cfg = load_config(&path)?;
        Ok((path, cfg))
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.countdown.tick_millis == 0 {
            return Err(AppError::Config("countdown.tick_millis must be > 0".into()));
        }
        if self.relaunch_cmd.as_ref().is_some_and(|c| c.is_empty()) {
            return Err(AppError::Config("relaunch_cmd must not be empty".into()));
        }
        Ok(())
    }
}

pub fn resolve_config_path(cli_value: Option<PathBuf>) -> Result<PathBuf, AppError> {
    if let Some(p) = cli_value {
        return Ok(p);
    }
    if let Ok(p) = std::env::var(ENV_CONFIG) {
        return Ok(PathBuf::from(p));
    }
    default_config_path().ok_or_else(|| AppError::Config("could not determine config dir".into()))
}

pub fn default_config_path() -> Option<PathBuf> {
    let pd = ProjectDirs::from("dev", "countdown", "countdown-notifier")?;
    Some(pd.config_dir().join("service.yaml"))
}

pub fn load_config(path: &Path) -> Result<ServiceConfig, AppError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("read {} failed: {e}", path.display())))?;
    let cfg: ServiceConfig = serde_yaml::from_str(&data)
        .map_err(|e| AppError::Config(format!("parse {} failed: {e}", path.display())))?;
    cfg.validate()?;
    Ok(cfg)
}
