use countdown_shared::TaskId;
use serde::{Deserialize, Serialize};
use tinytemplate::TinyTemplate;
use tracing::warn;

use crate::AppError;

pub const COUNTDOWN_CHANNEL_ID: &str = "countdown_channel";
pub const COMPLETION_CHANNEL_ID: &str = "completion_channel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    /// Silent, no popup.
    Low,
    High,
}

/// Delivery channel a notification is posted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub id: String,
    pub name: String,
    pub description: String,
    pub importance: Importance,
}

pub fn countdown_channel() -> ChannelSpec {
    ChannelSpec {
        id: COUNTDOWN_CHANNEL_ID.to_string(),
        name: "Countdown Notification".to_string(),
        description: "Displays countdown for worker tasks".to_string(),
        importance: Importance::Low,
    }
}

pub fn completion_channel() -> ChannelSpec {
    ChannelSpec {
        id: COMPLETION_CHANNEL_ID.to_string(),
        name: "Countdown Completion".to_string(),
        description: "Notifies when the countdown is finished".to_string(),
        importance: Importance::High,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub title: String,
    pub body: String,
    /// Stays visible and cannot be dismissed while set.
    pub ongoing: bool,
    pub only_alert_once: bool,
    pub auto_cancel: bool,
    pub relaunch_on_tap: bool,
}

impl Notification {
    pub fn progress(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            channel: COUNTDOWN_CHANNEL_ID.to_string(),
            title: title.into(),
            body: body.into(),
            ongoing: true,
            only_alert_once: true,
            auto_cancel: false,
            relaunch_on_tap: false,
        }
    }

    pub fn completion(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            channel: COMPLETION_CHANNEL_ID.to_string(),
            title: title.into(),
            body: body.into(),
            ongoing: false,
            only_alert_once: false,
            auto_cancel: true,
            relaunch_on_tap: true,
        }
    }
}

/// User-facing texts. Each field is a tinytemplate with `{task_id}` and
/// `{remaining}` in scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTemplates {
    pub progress_title: String,
    pub progress_starting: String,
    pub progress_body: String,
    pub completion_title: String,
    pub completion_body: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            progress_title: "Worker Task {task_id} Running".to_string(),
            progress_starting: "Starting countdown...".to_string(),
            progress_body: "Task {task_id}: {remaining} seconds remaining...".to_string(),
            completion_title: "Countdown Complete!".to_string(),
            completion_body: "Task with ID {task_id} has finished.".to_string(),
        }
    }
}

#[derive(Serialize)]
struct MessageCtx<'a> {
    task_id: &'a str,
    remaining: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Template {
    ProgressTitle,
    ProgressStarting,
    ProgressBody,
    CompletionTitle,
    CompletionBody,
}

impl Template {
    const ALL: [Template; 5] = [
        Template::ProgressTitle,
        Template::ProgressStarting,
        Template::ProgressBody,
        Template::CompletionTitle,
        Template::CompletionBody,
    ];

    fn name(self) -> &'static str {
        match self {
            Template::ProgressTitle => "progress_title",
            Template::ProgressStarting => "progress_starting",
            Template::ProgressBody => "progress_body",
            Template::CompletionTitle => "completion_title",
            Template::CompletionBody => "completion_body",
        }
    }
}

/// Validated message templates.
#[derive(Debug, Clone, Default)]
pub struct Messages {
    templates: MessageTemplates,
}

impl Messages {
    /// Compiles and trial-renders every template so bad overrides fail at startup.
    pub fn new(templates: MessageTemplates) -> Result<Self, AppError> {
        let messages = Self { templates };
        let ctx = MessageCtx {
            task_id: "000",
            remaining: 0,
        };
        for template in Template::ALL {
            messages.try_render(template, &ctx)?;
        }
        Ok(messages)
    }

    pub fn progress_title(&self, task_id: &TaskId) -> String {
        self.render(Template::ProgressTitle, task_id, 0)
    }

    pub fn progress_starting(&self, task_id: &TaskId) -> String {
        self.render(Template::ProgressStarting, task_id, 0)
    }

    pub fn progress_body(&self, task_id: &TaskId, remaining: u64) -> String {
        self.render(Template::ProgressBody, task_id, remaining)
    }

    pub fn completion_title(&self, task_id: &TaskId) -> String {
        self.render(Template::CompletionTitle, task_id, 0)
    }

    pub fn completion_body(&self, task_id: &TaskId) -> String {
        self.render(Template::CompletionBody, task_id, 0)
    }

    fn source(&self, template: Template) -> &str {
        match template {
            Template::ProgressTitle => &self.templates.progress_title,
            Template::ProgressStarting => &self.templates.progress_starting,
            Template::ProgressBody => &self.templates.progress_body,
            Template::CompletionTitle => &self.templates.completion_title,
            Template::CompletionBody => &self.templates.completion_body,
        }
    }

    fn try_render(&self, template: Template, ctx: &MessageCtx<'_>) -> Result<String, AppError> {
        let name = template.name();
        let mut tt = TinyTemplate::new();
        tt.set_default_formatter(&tinytemplate::format_unescaped);
        tt.add_template(name, self.source(template))
            .map_err(|e| AppError::Template(format!("{name}: {e}")))?;
        tt.render(name, ctx)
            .map_err(|e| AppError::Template(format!("{name}: {e}")))
    }

    fn render(&self, template: Template, task_id: &TaskId, remaining: u64) -> String {
        let ctx = MessageCtx {
            task_id: task_id.as_str(),
            remaining,
        };
        self.try_render(template, &ctx).unwrap_or_else(|e| {
            warn!(error=%e, "message render failed; using raw template");
            self.source(template).to_string()
        })
    }
}
