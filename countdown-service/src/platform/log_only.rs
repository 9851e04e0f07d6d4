use async_trait::async_trait;
use countdown_shared::NotificationSlot;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{PermissionState, Platform};
use crate::AppError;
use crate::config::ServiceConfig;
use crate::notify::{ChannelSpec, Notification};

/// Notifier that only writes to tracing. Used on hosts without a
/// notification daemon and when forced via `--log-only`.
#[derive(Debug)]
pub struct LogPlatform {
    permission: PermissionState,
    foreground: Mutex<Option<NotificationSlot>>,
}

impl LogPlatform {
    pub fn new(cfg: &ServiceConfig) -> Self {
        Self {
            permission: PermissionState::from(&cfg.notifications),
            foreground: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Platform for LogPlatform {
    async fn create_channel(&self, channel: &ChannelSpec) -> Result<(), AppError> {
        debug!(channel = %channel.id, name = %channel.name, "[CHANNEL] declared");
        Ok(())
    }

    async fn permission(&self) -> PermissionState {
        self.permission
    }

    async fn post(
        &self,
        slot: NotificationSlot,
        notification: &Notification,
    ) -> Result<(), AppError> {
        info!(
            slot = slot.0,
            channel = %notification.channel,
            "[NOTIFY] {}: {}",
            notification.title,
            notification.body
        );
        Ok(())
    }

    async fn cancel(&self, slot: NotificationSlot) {
        debug!(slot = slot.0, "[NOTIFY CLOSED]");
    }

    async fn enter_foreground(
        &self,
        slot: NotificationSlot,
        anchor: &Notification,
    ) -> Result<(), AppError> {
        *self.foreground.lock().await = Some(slot);
        info!(slot = slot.0, "[FOREGROUND] {}: {}", anchor.title, anchor.body);
        Ok(())
    }

    async fn exit_foreground(&self, remove_anchor: bool) {
        if let Some(slot) = self.foreground.lock().await.take() {
            info!(slot = slot.0, remove_anchor, "[FOREGROUND] released");
        }
    }
}
