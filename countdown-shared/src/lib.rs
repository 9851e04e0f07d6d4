pub mod api;
pub mod domain;

pub use domain::{NotificationSlot, TaskId, TaskIdError};
