use std::collections::HashMap;

use async_trait::async_trait;
use countdown_shared::NotificationSlot;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{PermissionState, Platform};
use crate::AppError;
use crate::config::ServiceConfig;
use crate::notify::{ChannelSpec, Importance, Notification};

const RELAUNCH_ACTION: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierKind {
    NotifyRust,
    LogOnly,
}

/// Freedesktop notifications via notify-rust. Slots map to replace-ids.
pub struct DesktopPlatform {
    app_name: String,
    relaunch_cmd: Option<Vec<String>>,
    permission: PermissionState,
    state: Mutex<DesktopState>,
}

struct DesktopState {
    kind: NotifierKind,
    channels: HashMap<String, ChannelSpec>,
    handles: HashMap<NotificationSlot, notify_rust::NotificationHandle>,
    foreground: Option<NotificationSlot>,
}

impl DesktopPlatform {
    pub fn new(cfg: &ServiceConfig) -> Self {
        // Start optimistic; if we fail to show, we downgrade to LogOnly.
        debug!("DesktopPlatform created: using notify-rust backend initially");
        Self {
            app_name: cfg.notifications.app_name.clone(),
            relaunch_cmd: cfg.relaunch_cmd.clone(),
            permission: PermissionState::from(&cfg.notifications),
            state: Mutex::new(DesktopState {
                kind: NotifierKind::NotifyRust,
                channels: HashMap::new(),
                handles: HashMap::new(),
                foreground: None,
            }),
        }
    }

    /// Waits for the user to activate the notification, off the runtime.
    fn watch_relaunch(&self, handle: notify_rust::NotificationHandle) {
        let Some(cmd) = self.relaunch_cmd.clone() else {
            return;
        };
        let rt = tokio::runtime::Handle::current();
        let spawned = std::thread::Builder::new()
            .name("relaunch-watch".into())
            .spawn(move || {
                handle.wait_for_action(|action| {
                    if action == RELAUNCH_ACTION {
                        rt.spawn(async move {
                            if let Err(e) = super::relaunch(&cmd).await {
                                warn!(error=%e, "relaunch from notification failed");
                            }
                        });
                    }
                });
            });
        if let Err(e) = spawned {
            warn!(error=%e, "failed to spawn relaunch watcher");
        }
    }
}

fn urgency(importance: Importance) -> notify_rust::Urgency {
    match importance {
        Importance::Low => notify_rust::Urgency::Low,
        Importance::High => notify_rust::Urgency::Critical,
    }
}

#[async_trait]
impl Platform for DesktopPlatform {
    async fn create_channel(&self, channel: &ChannelSpec) -> Result<(), AppError> {
        debug!(channel = %channel.id, importance = ?channel.importance, "declaring channel");
        self.state
            .lock()
            .await
            .channels
            .insert(channel.id.clone(), channel.clone());
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
        let mut st = self.state.lock().await;
        let importance = st
            .channels
            .get(&notification.channel)
            .map(|c| c.importance)
            .ok_or_else(|| {
                AppError::Notify(format!("unknown channel {}", notification.channel))
            })?;

        match st.kind {
            NotifierKind::NotifyRust => {
                debug!(
                    slot = slot.0,
                    channel = %notification.channel,
                    "post: building notification"
                );
                let mut n = notify_rust::Notification::new();
                n.appname(&self.app_name)
                    .summary(&notification.title)
                    .body(&notification.body)
                    .id(slot.0 as u32)
                    .urgency(urgency(importance));
                if notification.ongoing {
                    n.hint(notify_rust::Hint::Resident(true))
                        .timeout(notify_rust::Timeout::Never);
                }
                if notification.relaunch_on_tap {
                    n.action(RELAUNCH_ACTION, "Open");
                }

                match n.show_async().await {
                    Ok(handle) => {
                        if notification.relaunch_on_tap {
                            st.handles.remove(&slot);
                            self.watch_relaunch(handle);
                        } else {
                            st.handles.insert(slot, handle);
                        }
                    }
                    Err(e) => {
                        warn!(error=%e, "notify-rust failed; downgrading to LogOnly notifier");
                        st.kind = NotifierKind::LogOnly;
                        st.handles.clear();
                        info!(
                            slot = slot.0,
                            "[NOTIFY] {}: {}",
                            notification.title,
                            notification.body
                        );
                    }
                }
            }
            NotifierKind::LogOnly => {
                info!(
                    slot = slot.0,
                    "[NOTIFY] {}: {}",
                    notification.title,
                    notification.body
                );
            }
        }
        Ok(())
    }

    async fn cancel(&self, slot: NotificationSlot) {
        let mut st = self.state.lock().await;
        if st.kind == NotifierKind::LogOnly {
            debug!(slot = slot.0, "[NOTIFY CLOSED]");
            return;
        }
        if st.handles.remove(&slot).is_some() {
            debug!(slot = slot.0, "close: replacing with short-timeout notification");
            let mut n = notify_rust::Notification::new();
            // Replace current notification with an empty, near-immediate timeout one.
            let _ = n
                .appname(&self.app_name)
                .summary(" ")
                .id(slot.0 as u32)
                .urgency(notify_rust::Urgency::Low)
                .timeout(notify_rust::Timeout::Milliseconds(1))
                .show_async()
                .await;
        }
    }

    async fn enter_foreground(
        &self,
        slot: NotificationSlot,
        anchor: &Notification,
    ) -> Result<(), AppError> {
        self.post(slot, anchor).await?;
        self.state.lock().await.foreground = Some(slot);
        info!(slot = slot.0, "foreground elevation engaged");
        Ok(())
    }

    async fn exit_foreground(&self, remove_anchor: bool) {
        let slot = self.state.lock().await.foreground.take();
        let Some(slot) = slot else {
            return;
        };
        info!(slot = slot.0, remove_anchor, "foreground elevation released");
        if remove_anchor {
            self.cancel(slot).await;
        }
    }
}
