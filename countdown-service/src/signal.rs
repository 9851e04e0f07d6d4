//! Single-slot, last-write-wins broadcast of the most recently completed task.
//!
//! Observers that fall behind only ever see the latest value; intermediate
//! completions are overwritten, never queued.

use std::sync::Arc;

use countdown_shared::TaskId;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct CompletionSignal {
    tx: Arc<watch::Sender<Option<TaskId>>>,
    closed: CancellationToken,
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            closed: CancellationToken::new(),
        }
    }

    /// Overwrites the current value and wakes every watcher.
    pub fn publish(&self, task_id: TaskId) {
        self.tx.send_replace(Some(task_id));
    }

    pub fn latest(&self) -> Option<TaskId> {
        self.tx.borrow().clone()
    }

    /// Watcher that reports completions published after this call.
    pub fn subscribe(&self) -> CompletionWatcher {
        CompletionWatcher {
            rx: self.tx.subscribe(),
            closed: self.closed.clone(),
        }
    }

    /// Ends all watchers once they have drained the pending value.
    pub fn close(&self) {
        self.closed.cancel();
    }
}

#[derive(Debug)]
pub struct CompletionWatcher {
    rx: watch::Receiver<Option<TaskId>>,
    closed: CancellationToken,
}

impl CompletionWatcher {
    /// Next observed completion, or `None` once the signal is closed.
    pub async fn next(&mut self) -> Option<TaskId> {
        loop {
            tokio::select! {
                biased;
                changed = self.rx.changed() => {
                    changed.ok()?;
                    if let Some(id) = self.rx.borrow_and_update().clone() {
                        return Some(id);
                    }
                }
                _ = self.closed.cancelled() => return None,
            }
        }
    }

    pub fn latest(&self) -> Option<TaskId> {
        self.rx.borrow().clone()
    }
}
