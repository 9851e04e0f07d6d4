use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use countdown_shared::api::StartRequest;
use countdown_shared::domain::{self, NotificationSlot, TaskId};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::AppError;
use crate::config::{CountdownConfig, ServiceConfig};
use crate::notify::{self, Messages, Notification};
use crate::platform::Platform;
use crate::signal::{CompletionSignal, CompletionWatcher};

/// Wall clock used to derive fallback notification slots.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Ended runs whose outcome `CountdownNotifier::state` still reports.
pub const FINISHED_HISTORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    Idle,
    Running { remaining: u64 },
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("countdown for task {0} is already running")]
    AlreadyRunning(TaskId),
    #[error("notifier is shutting down")]
    ShuttingDown,
}

enum RunOutcome {
    Completed,
    Cancelled,
}

/// One in-flight countdown.
#[derive(Debug)]
struct CountdownRun {
    run_id: Uuid,
    task_id: TaskId,
    slot: NotificationSlot,
    primary: bool,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct RunEntry {
    run_id: Uuid,
    slot: NotificationSlot,
    state: CountdownState,
    cancel: CancellationToken,
}

/// Live runs, plus the outcomes of the most recently ended ones.
#[derive(Debug, Default)]
struct Registry {
    live: HashMap<TaskId, RunEntry>,
    finished: VecDeque<(TaskId, CountdownState)>,
}

impl Registry {
    fn state(&self, task_id: &TaskId) -> CountdownState {
        if let Some(entry) = self.live.get(task_id) {
            return entry.state;
        }
        self.finished
            .iter()
            .rev()
            .find(|(id, _)| id == task_id)
            .map(|(_, state)| *state)
            .unwrap_or(CountdownState::Idle)
    }

    fn record_finished(&mut self, task_id: TaskId, state: CountdownState) {
        self.finished.retain(|(id, _)| *id != task_id);
        self.finished.push_back((task_id, state));
        while self.finished.len() > FINISHED_HISTORY {
            self.finished.pop_front();
        }
    }
}

struct Inner {
    platform: Arc<dyn Platform>,
    messages: Messages,
    countdown: CountdownConfig,
    clock: Arc<dyn Clock>,
    signal: CompletionSignal,
    runs: Mutex<Registry>,
    running: watch::Sender<usize>,
    root: CancellationToken,
}

/// Runs per-task countdowns and reports them through notifications and the
/// completion signal.
#[derive(Clone)]
pub struct CountdownNotifier {
    inner: Arc<Inner>,
    tracker: TaskTracker,
}

impl CountdownNotifier {
    pub async fn new(
        platform: Arc<dyn Platform>,
        cfg: &ServiceConfig,
    ) -> Result<Self, AppError> {
        Self::with_clock(platform, cfg, Arc::new(SystemClock)).await
    }

    /// Declares both notification channels and prepares an idle notifier.
    pub async fn with_clock(
        platform: Arc<dyn Platform>,
        cfg: &ServiceConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        cfg.validate()?;
        let messages = Messages::new(cfg.messages.clone())?;
        platform.create_channel(&notify::countdown_channel()).await?;
        platform.create_channel(&notify::completion_channel()).await?;
        let (running, _) = watch::channel(0);
        info!(
            seconds = cfg.countdown.seconds,
            tick_millis = cfg.countdown.tick_millis,
            "countdown notifier ready"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                platform,
                messages,
                countdown: cfg.countdown.clone(),
                clock,
                signal: CompletionSignal::new(),
                runs: Mutex::new(Registry::default()),
                running,
                root: CancellationToken::new(),
            }),
            tracker: TaskTracker::new(),
        })
    }

    /// Begin an independent countdown for `task_id`. Returns immediately.
    pub async fn start(&self, task_id: TaskId) -> Result<(), StartError> {
        if self.inner.root.is_cancelled() {
            return Err(StartError::ShuttingDown);
        }
        let run = {
            let mut runs = self.inner.runs.lock().await;
            if runs.live.contains_key(&task_id) {
                return Err(StartError::AlreadyRunning(task_id));
            }
            let slot = self.inner.resolve_slot(&task_id, &runs.live);
            let run = CountdownRun {
                run_id: Uuid::new_v4(),
                primary: task_id.is_primary(),
                task_id: task_id.clone(),
                slot,
                cancel: self.inner.root.child_token(),
            };
            runs.live.insert(
                task_id,
                RunEntry {
                    run_id: run.run_id,
                    slot,
                    state: CountdownState::Running {
                        remaining: self.inner.countdown.seconds,
                    },
                    cancel: run.cancel.clone(),
                },
            );
            self.inner.publish_running(&runs);
            run
        };
        info!(
            task_id = %run.task_id,
            run_id = %run.run_id,
            slot = run.slot.0,
            primary = run.primary,
            "countdown started"
        );
        let inner = self.inner.clone();
        self.tracker.spawn(inner.run_countdown(run));
        Ok(())
    }

    /// Start-request intake. Missing ids and rejected duplicates are logged, never surfaced.
    pub async fn handle_request(&self, req: &StartRequest) -> Option<TaskId> {
        let Some(task_id) = req.task_id() else {
            debug!("start request without task id; ignoring");
            return None;
        };
        match self.start(task_id.clone()).await {
            Ok(()) => Some(task_id),
            Err(e) => {
                warn!(error=%e, task_id=%task_id, "start request rejected");
                None
            }
        }
    }

    /// Cancel one running countdown. No completion is signalled for it.
    ///
    /// The task reports `Cancelled` immediately. A new `start` for the same
    /// id is rejected until the cancelled run has removed its notification.
    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        let mut runs = self.inner.runs.lock().await;
        match runs.live.get_mut(task_id) {
            Some(entry) if matches!(entry.state, CountdownState::Running { .. }) => {
                info!(task_id=%task_id, run_id=%entry.run_id, "cancelling countdown");
                entry.state = CountdownState::Cancelled;
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// State of the live run for `task_id`, else the outcome of its last run
    /// if still within `FINISHED_HISTORY`, else `Idle`.
    pub async fn state(&self, task_id: &TaskId) -> CountdownState {
        self.inner.runs.lock().await.state(task_id)
    }

    pub async fn active(&self) -> Vec<TaskId> {
        let runs = self.inner.runs.lock().await;
        let mut ids: Vec<TaskId> = runs
            .live
            .iter()
            .filter(|(_, e)| matches!(e.state, CountdownState::Running { .. }))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self) -> CompletionWatcher {
        self.inner.signal.subscribe()
    }

    pub fn completion_signal(&self) -> &CompletionSignal {
        &self.inner.signal
    }

    /// Resolves once no countdown is running and every ended run has
    /// finished its notification cleanup.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.running.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Abort every in-flight countdown and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        info!(active = self.tracker.len(), "shutting down countdown notifier");
        self.inner.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.inner.signal.close();
        debug!("countdown notifier stopped");
    }
}

impl Inner {
    /// Fixed slot for recognized ids; otherwise the clock-derived slot,
    /// moved forward past the progress and completion slots of live runs
    /// and past this task's own completion slot.
    fn resolve_slot(
        &self,
        task_id: &TaskId,
        live: &HashMap<TaskId, RunEntry>,
    ) -> NotificationSlot {
        let slot = domain::resolve_progress_slot(task_id, self.clock.now_millis());
        if domain::fixed_progress_slot(task_id).is_some() {
            return slot;
        }
        let taken: HashSet<NotificationSlot> = live
            .iter()
            .flat_map(|(id, e)| [e.slot, domain::completion_slot(id)])
            .chain([domain::completion_slot(task_id)])
            .collect();
        let mut chosen = slot;
        while taken.contains(&chosen) {
            chosen = chosen.next_fallback();
        }
        if chosen != slot {
            debug!(
                task_id=%task_id,
                derived = slot.0,
                chosen = chosen.0,
                "fallback slot in use; moved forward"
            );
        }
        chosen
    }

    fn publish_running(&self, runs: &Registry) {
        self.running.send_replace(runs.live.len());
    }

    /// Moves this run's entry on from `Running`. Returns false once the run
    /// has been cancelled.
    async fn transition(&self, run: &CountdownRun, state: CountdownState) -> bool {
        let mut runs = self.runs.lock().await;
        match runs
            .live
            .get_mut(&run.task_id)
            .filter(|e| e.run_id == run.run_id)
        {
            Some(entry) if matches!(entry.state, CountdownState::Running { .. }) => {
                entry.state = state;
                true
            }
            _ => false,
        }
    }

    /// Drops the live entry and keeps its outcome for `state()`.
    async fn finish(&self, run: &CountdownRun) {
        let mut runs = self.runs.lock().await;
        let owned = runs
            .live
            .get(&run.task_id)
            .is_some_and(|e| e.run_id == run.run_id);
        if owned && let Some(entry) = runs.live.remove(&run.task_id) {
            runs.record_finished(run.task_id.clone(), entry.state);
        }
        self.publish_running(&runs);
    }

    async fn run_countdown(self: Arc<Self>, run: CountdownRun) {
        let completed = matches!(self.tick_down(&run).await, RunOutcome::Completed)
            && self.transition(&run, CountdownState::Completed).await;
        if completed {
            self.signal.publish(run.task_id.clone());
            info!(task_id=%run.task_id, run_id=%run.run_id, "countdown completed");

            let completion = Notification::completion(
                self.messages.completion_title(&run.task_id),
                self.messages.completion_body(&run.task_id),
            );
            self.deliver(domain::completion_slot(&run.task_id), &completion)
                .await;
            if run.primary {
                self.platform.exit_foreground(true).await;
            }
        } else {
            self.transition(&run, CountdownState::Cancelled).await;
            info!(task_id=%run.task_id, run_id=%run.run_id, "countdown cancelled");
            if run.primary {
                self.platform.exit_foreground(true).await;
            } else {
                self.platform.cancel(run.slot).await;
            }
        }
        self.finish(&run).await;
    }

    async fn tick_down(&self, run: &CountdownRun) -> RunOutcome {
        let title = self.messages.progress_title(&run.task_id);
        if run.primary {
            let anchor = Notification::progress(
                title.clone(),
                self.messages.progress_starting(&run.task_id),
            );
            if let Err(e) = self.platform.enter_foreground(run.slot, &anchor).await {
                warn!(error=%e, task_id=%run.task_id, "failed to enter foreground");
            }
        }

        let tick = self.countdown.tick();
        for remaining in (0..=self.countdown.seconds).rev() {
            if !self.transition(run, CountdownState::Running { remaining }).await {
                return RunOutcome::Cancelled;
            }
            let progress = Notification::progress(
                title.clone(),
                self.messages.progress_body(&run.task_id, remaining),
            );
            self.deliver(run.slot, &progress).await;
            debug!(task_id=%run.task_id, remaining, "tick");
            tokio::select! {
                _ = run.cancel.cancelled() => return RunOutcome::Cancelled,
                _ = tokio::time::sleep(tick) => {}
            }
        }
        RunOutcome::Completed
    }

    /// Post if permitted. Denials and delivery errors are logged and dropped.
    async fn deliver(&self, slot: NotificationSlot, notification: &Notification) -> bool {
        if !self.platform.permission().await.allows_delivery() {
            debug!(slot = slot.0, "notifications not permitted; skipping delivery");
            return false;
        }
        if let Err(e) = self.platform.post(slot, notification).await {
            warn!(error=%e, slot = slot.0, "notification delivery failed");
            return false;
        }
        true
    }
}
