#[cfg(all(unix, not(target_os = "macos")))]
pub mod desktop;
pub mod log_only;

use std::sync::Arc;

use async_trait::async_trait;
use countdown_shared::NotificationSlot;
use serde::{Deserialize, Serialize};

use crate::AppError;
use crate::config::{NotificationConfig, ServiceConfig};
use crate::notify::{ChannelSpec, Notification};

/// Interface to the OS notification and lifecycle facilities we need.
#[async_trait]
pub trait Platform: Send + Sync {
    async fn create_channel(&self, channel: &ChannelSpec) -> Result<(), AppError>;
    /// Current permission state; re-read before every delivery.
    async fn permission(&self) -> PermissionState;
    /// Creates or replaces the notification under `slot`.
    async fn post(&self, slot: NotificationSlot, notification: &Notification)
    -> Result<(), AppError>;
    async fn cancel(&self, slot: NotificationSlot);
    /// Keeps the process resident, anchored on `anchor` shown under `slot`.
    async fn enter_foreground(
        &self,
        slot: NotificationSlot,
        anchor: &Notification,
    ) -> Result<(), AppError>;
    async fn exit_foreground(&self, remove_anchor: bool);
}

/// Runtime grant on platforms that require one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimePermission {
    /// Platform predates runtime grants; always permitted.
    #[default]
    NotRequired,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionState {
    pub notifications_enabled: bool,
    pub runtime: RuntimePermission,
}

impl PermissionState {
    pub fn allowed() -> Self {
        Self {
            notifications_enabled: true,
            runtime: RuntimePermission::Granted,
        }
    }

    pub fn denied() -> Self {
        Self {
            notifications_enabled: false,
            runtime: RuntimePermission::Denied,
        }
    }

    /// Enabled setting OR runtime grant; platforms without grants always pass.
    pub fn allows_delivery(&self) -> bool {
        self.notifications_enabled
            || matches!(
                self.runtime,
                RuntimePermission::NotRequired | RuntimePermission::Granted
            )
    }
}

impl From<&NotificationConfig> for PermissionState {
    fn from(cfg: &NotificationConfig) -> Self {
        Self {
            notifications_enabled: cfg.enabled,
            runtime: cfg.runtime_permission,
        }
    }
}

/// Select the platform implementation for this host.
pub async fn detect(
    cfg: &ServiceConfig,
    force_log_only: bool,
) -> Result<Arc<dyn Platform>, AppError> {
    if force_log_only {
        tracing::info!("platform selected: log-only");
        return Ok(Arc::new(log_only::LogPlatform::new(cfg)));
    }
    Ok(native(cfg))
}

#[cfg(all(unix, not(target_os = "macos")))]
fn native(cfg: &ServiceConfig) -> Arc<dyn Platform> {
    tracing::info!("platform selected: desktop notifications");
    Arc::new(desktop::DesktopPlatform::new(cfg))
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn native(cfg: &ServiceConfig) -> Arc<dyn Platform> {
    tracing::info!("platform selected: log-only (no desktop backend on this OS)");
    Arc::new(log_only::LogPlatform::new(cfg))
}

/// Spawns the configured relaunch command without waiting for it. Runs when
/// a completion notification is tapped.
pub async fn relaunch(cmd: &[String]) -> Result<(), AppError> {
    let Some((prog, args)) = cmd.split_first() else {
        return Err(AppError::Config("relaunch_cmd is empty".into()));
    };
    let child = tokio::process::Command::new(prog)
        .args(args)
        .spawn()
        .map_err(AppError::Io)?;
    tracing::info!(program = %prog, pid = ?child.id(), "relaunched primary screen");
    Ok(())
}
