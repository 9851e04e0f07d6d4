use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use countdown_service::config::ServiceConfig;
use countdown_service::notify::{COMPLETION_CHANNEL_ID, COUNTDOWN_CHANNEL_ID, ChannelSpec, Notification};
use countdown_service::platform::{PermissionState, Platform};
use countdown_service::service::{Clock, FINISHED_HISTORY};
use countdown_service::{
    AppError, CompletionSignal, CountdownNotifier, CountdownState, StartError, intake,
};
use countdown_shared::api::StartRequest;
use countdown_shared::{NotificationSlot, TaskId};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const CLOCK_MILLIS: i64 = 1_700_000_034_567;
const FALLBACK_SLOT: NotificationSlot = NotificationSlot(34_567);
const PRIMARY_SLOT: NotificationSlot = NotificationSlot(0xCA7);
const SECONDARY_SLOT: NotificationSlot = NotificationSlot(0xCA9);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Channel(String),
    Post(NotificationSlot, Notification),
    Cancel(NotificationSlot),
    EnterForeground(NotificationSlot),
    ExitForeground(bool),
}

struct RecordingPlatform {
    calls: Mutex<Vec<Call>>,
    permission: Mutex<PermissionState>,
    fail_posts: bool,
    // completion signal value observed at each completion post
    signal: OnceLock<CompletionSignal>,
    signalled_at_completion: Mutex<Vec<Option<TaskId>>>,
}

impl RecordingPlatform {
    fn new(permission: PermissionState) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            permission: Mutex::new(permission),
            fail_posts: false,
            signal: OnceLock::new(),
            signalled_at_completion: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            permission: Mutex::new(PermissionState::allowed()),
            fail_posts: true,
            signal: OnceLock::new(),
            signalled_at_completion: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn posts_to(&self, slot: NotificationSlot) -> Vec<Notification> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Post(s, n) if s == slot => Some(n),
                _ => None,
            })
            .collect()
    }

    fn foreground_calls(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::EnterForeground(_) | Call::ExitForeground(_)))
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn create_channel(&self, channel: &ChannelSpec) -> Result<(), AppError> {
        self.record(Call::Channel(channel.id.clone()));
        Ok(())
    }

    async fn permission(&self) -> PermissionState {
        *self.permission.lock().unwrap()
    }

    async fn post(
        &self,
        slot: NotificationSlot,
        notification: &Notification,
    ) -> Result<(), AppError> {
        if self.fail_posts {
            return Err(AppError::Notify("daemon unavailable".into()));
        }
        if notification.channel == COMPLETION_CHANNEL_ID {
            let seen = self.signal.get().and_then(|s| s.latest());
            self.signalled_at_completion.lock().unwrap().push(seen);
        }
        self.record(Call::Post(slot, notification.clone()));
        Ok(())
    }

    async fn cancel(&self, slot: NotificationSlot) {
        self.record(Call::Cancel(slot));
    }

    async fn enter_foreground(
        &self,
        slot: NotificationSlot,
        _anchor: &Notification,
    ) -> Result<(), AppError> {
        self.record(Call::EnterForeground(slot));
        Ok(())
    }

    async fn exit_foreground(&self, remove_anchor: bool) {
        self.record(Call::ExitForeground(remove_anchor));
    }
}

struct FixedClock(i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

fn id(s: &str) -> TaskId {
    TaskId::parse(s).unwrap()
}

async fn notifier_with(platform: &Arc<RecordingPlatform>) -> CountdownNotifier {
    notifier_at(platform, CLOCK_MILLIS, &ServiceConfig::default()).await
}

async fn notifier_at(
    platform: &Arc<RecordingPlatform>,
    clock_millis: i64,
    cfg: &ServiceConfig,
) -> CountdownNotifier {
    let notifier =
        CountdownNotifier::with_clock(platform.clone(), cfg, Arc::new(FixedClock(clock_millis)))
            .await
            .unwrap();
    let _ = platform.signal.set(notifier.completion_signal().clone());
    notifier
}

fn progress_bodies(notes: &[Notification]) -> Vec<String> {
    notes.iter().map(|n| n.body.clone()).collect()
}

fn expected_bodies(task: &str) -> Vec<String> {
    (0..=10u64)
        .rev()
        .map(|i| format!("Task {task}: {i} seconds remaining..."))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn primary_countdown_end_to_end() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;
    let mut watcher = notifier.subscribe();

    let started_at = Instant::now();
    notifier.start(id("001")).await.unwrap();
    assert!(matches!(
        notifier.state(&id("001")).await,
        CountdownState::Running { remaining: 10 }
    ));

    assert_eq!(watcher.next().await, Some(id("001")));
    let elapsed = started_at.elapsed();
    assert!(elapsed >= Duration::from_secs(11), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(12), "elapsed {elapsed:?}");
    notifier.shutdown().await;

    let calls = platform.calls();
    assert_eq!(
        calls[..2],
        [
            Call::Channel(COUNTDOWN_CHANNEL_ID.to_string()),
            Call::Channel(COMPLETION_CHANNEL_ID.to_string()),
        ]
    );
    assert_eq!(calls[2], Call::EnterForeground(PRIMARY_SLOT));

    let progress = platform.posts_to(PRIMARY_SLOT);
    assert_eq!(progress_bodies(&progress), expected_bodies("001"));
    assert!(progress.iter().all(|n| n.ongoing && n.title == "Worker Task 001 Running"));

    let completion = platform.posts_to(NotificationSlot(47_665));
    assert_eq!(completion.len(), 1);
    assert_eq!(completion[0].title, "Countdown Complete!");
    assert_eq!(completion[0].body, "Task with ID 001 has finished.");
    assert!(completion[0].auto_cancel && completion[0].relaunch_on_tap);
    assert_eq!(completion[0].channel, COMPLETION_CHANNEL_ID);

    assert_eq!(calls.last(), Some(&Call::ExitForeground(true)));
    assert_eq!(notifier.state(&id("001")).await, CountdownState::Completed);
    assert_eq!(notifier.completion_signal().latest(), Some(id("001")));
}

#[tokio::test(start_paused = true)]
async fn completion_is_signalled_exactly_once() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;
    let mut watcher = notifier.subscribe();

    notifier.start(id("job-7")).await.unwrap();
    assert_eq!(watcher.next().await, Some(id("job-7")));
    let again = tokio::time::timeout(Duration::from_secs(60), watcher.next()).await;
    assert!(again.is_err(), "completion must not be delivered twice");
    notifier.shutdown().await;

    assert_eq!(
        progress_bodies(&platform.posts_to(FALLBACK_SLOT)),
        expected_bodies("job-7")
    );
    assert!(platform.foreground_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn denied_permission_suppresses_delivery_but_not_completion() {
    let platform = RecordingPlatform::new(PermissionState::denied());
    let notifier = notifier_with(&platform).await;
    let mut watcher = notifier.subscribe();

    let started_at = Instant::now();
    notifier.start(id("002")).await.unwrap();
    assert_eq!(watcher.next().await, Some(id("002")));
    assert!(started_at.elapsed() >= Duration::from_secs(11));
    notifier.shutdown().await;

    assert!(
        platform
            .calls()
            .iter()
            .all(|c| !matches!(c, Call::Post(..))),
        "nothing may be posted without permission"
    );
    assert_eq!(notifier.state(&id("002")).await, CountdownState::Completed);
}

#[tokio::test(start_paused = true)]
async fn only_primary_toggles_foreground() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;

    notifier.start(id("001")).await.unwrap();
    notifier.start(id("002")).await.unwrap();
    assert_eq!(notifier.active().await, vec![id("001"), id("002")]);
    notifier.wait_idle().await;
    notifier.shutdown().await;

    assert_eq!(
        platform.foreground_calls(),
        vec![
            Call::EnterForeground(PRIMARY_SLOT),
            Call::ExitForeground(true)
        ]
    );
    assert_eq!(
        progress_bodies(&platform.posts_to(SECONDARY_SLOT)),
        expected_bodies("002")
    );
    assert_eq!(platform.posts_to(NotificationSlot(47_666)).len(), 1);
    assert_eq!(notifier.state(&id("001")).await, CountdownState::Completed);
    assert_eq!(notifier.state(&id("002")).await, CountdownState::Completed);
}

#[tokio::test(start_paused = true)]
async fn duplicate_start_is_rejected_until_finished() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;

    notifier.start(id("002")).await.unwrap();
    assert_eq!(
        notifier.start(id("002")).await,
        Err(StartError::AlreadyRunning(id("002")))
    );
    notifier.wait_idle().await;
    notifier.start(id("002")).await.unwrap();
    notifier.wait_idle().await;
    notifier.shutdown().await;

    assert_eq!(platform.posts_to(SECONDARY_SLOT).len(), 22);
}

#[tokio::test(start_paused = true)]
async fn fallback_slots_do_not_collide() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;

    notifier.start(id("alpha")).await.unwrap();
    notifier.start(id("beta")).await.unwrap();
    notifier.wait_idle().await;
    notifier.shutdown().await;

    let next = NotificationSlot(FALLBACK_SLOT.0 + 1);
    assert_eq!(
        progress_bodies(&platform.posts_to(FALLBACK_SLOT)),
        expected_bodies("alpha")
    );
    assert_eq!(
        progress_bodies(&platform.posts_to(next)),
        expected_bodies("beta")
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_one_countdown_without_signal() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;

    notifier.start(id("002")).await.unwrap();
    notifier.start(id("003")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert!(notifier.cancel(&id("002")).await);
    assert!(!notifier.cancel(&id("unknown")).await);

    notifier.wait_idle().await;
    notifier.shutdown().await;

    assert_eq!(notifier.state(&id("002")).await, CountdownState::Cancelled);
    assert_eq!(notifier.state(&id("003")).await, CountdownState::Completed);
    assert_eq!(notifier.completion_signal().latest(), Some(id("003")));
    assert_eq!(
        progress_bodies(&platform.posts_to(SECONDARY_SLOT)),
        expected_bodies("002")[..4].to_vec()
    );
    assert!(platform.calls().contains(&Call::Cancel(SECONDARY_SLOT)));
    assert!(platform.posts_to(NotificationSlot(47_666)).is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_everything_and_releases_foreground() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;
    let mut watcher = notifier.subscribe();

    notifier.start(id("001")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    notifier.shutdown().await;

    assert_eq!(watcher.next().await, None);
    assert_eq!(notifier.completion_signal().latest(), None);
    assert_eq!(notifier.state(&id("001")).await, CountdownState::Cancelled);
    assert_eq!(platform.posts_to(PRIMARY_SLOT).len(), 3);
    assert_eq!(
        platform.foreground_calls(),
        vec![
            Call::EnterForeground(PRIMARY_SLOT),
            Call::ExitForeground(true)
        ]
    );
    assert_eq!(
        notifier.start(id("001")).await,
        Err(StartError::ShuttingDown)
    );
}

#[tokio::test(start_paused = true)]
async fn delivery_failures_are_not_fatal() {
    let platform = RecordingPlatform::failing();
    let notifier = notifier_with(&platform).await;
    let mut watcher = notifier.subscribe();

    notifier.start(id("001")).await.unwrap();
    assert_eq!(watcher.next().await, Some(id("001")));
    notifier.shutdown().await;
    assert_eq!(
        platform.foreground_calls(),
        vec![
            Call::EnterForeground(PRIMARY_SLOT),
            Call::ExitForeground(true)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn custom_duration_from_config() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let mut cfg = ServiceConfig::default();
    cfg.countdown.seconds = 2;
    cfg.countdown.tick_millis = 250;
    let notifier = CountdownNotifier::with_clock(
        platform.clone(),
        &cfg,
        Arc::new(FixedClock(CLOCK_MILLIS)),
    )
    .await
    .unwrap();

    let started_at = Instant::now();
    notifier.start(id("002")).await.unwrap();
    notifier.wait_idle().await;
    let elapsed = started_at.elapsed();
    assert!(elapsed >= Duration::from_millis(750), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(800), "elapsed {elapsed:?}");
    notifier.shutdown().await;

    assert_eq!(
        progress_bodies(&platform.posts_to(SECONDARY_SLOT)),
        vec![
            "Task 002: 2 seconds remaining...",
            "Task 002: 1 seconds remaining...",
            "Task 002: 0 seconds remaining...",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn intake_starts_valid_requests_only() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;

    let input: &[u8] = b"{\"Id\":\"001\"}\n{}\n{\"Id\":\n\n002\n{\"Id\":\"001\"}\n";
    let accepted = intake::serve_lines(input, &notifier, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(accepted, 2);
    assert_eq!(notifier.active().await, vec![id("001"), id("002")]);

    assert_eq!(
        notifier.handle_request(&StartRequest::default()).await,
        None
    );
    notifier.wait_idle().await;
    notifier.shutdown().await;
    assert_eq!(notifier.state(&id("001")).await, CountdownState::Completed);
}

#[tokio::test(start_paused = true)]
async fn intake_stops_on_cancel() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (reader, _writer) = tokio::io::duplex(64);
    let accepted = intake::serve_lines(tokio::io::BufReader::new(reader), &notifier, cancel)
        .await
        .unwrap();
    assert_eq!(accepted, 0);
    notifier.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn completion_popup_follows_signal_and_precedes_foreground_release() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;

    notifier.start(id("001")).await.unwrap();
    notifier.wait_idle().await;
    notifier.shutdown().await;

    let calls = platform.calls();
    let popup = calls
        .iter()
        .position(|c| matches!(c, Call::Post(s, _) if *s == NotificationSlot(47_665)))
        .unwrap();
    let last_tick = calls
        .iter()
        .rposition(|c| matches!(c, Call::Post(s, _) if *s == PRIMARY_SLOT))
        .unwrap();
    assert!(last_tick < popup);
    assert_eq!(calls[popup + 1], Call::ExitForeground(true));
    assert_eq!(calls.len(), popup + 2);
    assert_eq!(
        *platform.signalled_at_completion.lock().unwrap(),
        vec![Some(id("001"))]
    );
}

#[tokio::test(start_paused = true)]
async fn fallback_slot_skips_primary_slot() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    // 3239 == 0xCA7
    let notifier = notifier_at(&platform, 1_700_000_003_239, &ServiceConfig::default()).await;

    notifier.start(id("x")).await.unwrap();
    notifier.start(id("001")).await.unwrap();
    notifier.wait_idle().await;
    notifier.shutdown().await;

    assert_eq!(
        progress_bodies(&platform.posts_to(PRIMARY_SLOT)),
        expected_bodies("001")
    );
    assert_eq!(
        progress_bodies(&platform.posts_to(NotificationSlot(3_240))),
        expected_bodies("x")
    );
    assert!(
        platform
            .calls()
            .iter()
            .all(|c| !matches!(c, Call::Cancel(_)))
    );
}

#[tokio::test(start_paused = true)]
async fn fallback_slot_wraps_around() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_at(&platform, 1_700_000_099_999, &ServiceConfig::default()).await;

    notifier.start(id("left")).await.unwrap();
    notifier.start(id("right")).await.unwrap();
    notifier.wait_idle().await;
    notifier.shutdown().await;

    assert_eq!(
        progress_bodies(&platform.posts_to(NotificationSlot(99_999))),
        expected_bodies("left")
    );
    assert_eq!(
        progress_bodies(&platform.posts_to(NotificationSlot(0))),
        expected_bodies("right")
    );
}

#[tokio::test(start_paused = true)]
async fn fallback_slot_skips_completion_slots() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    // "ab" hashes to 3105, "c" to 99
    let notifier = notifier_at(&platform, 1_700_000_003_105, &ServiceConfig::default()).await;

    notifier.start(id("ab")).await.unwrap();
    notifier.start(id("c")).await.unwrap();
    notifier.wait_idle().await;
    notifier.shutdown().await;

    assert_eq!(
        progress_bodies(&platform.posts_to(NotificationSlot(3_106))),
        expected_bodies("ab")
    );
    assert_eq!(
        progress_bodies(&platform.posts_to(NotificationSlot(3_107))),
        expected_bodies("c")
    );
    assert_eq!(
        progress_bodies(&platform.posts_to(NotificationSlot(3_105))),
        vec!["Task with ID ab has finished."]
    );
    assert_eq!(platform.posts_to(NotificationSlot(99)).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn ended_runs_are_not_retained() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let mut cfg = ServiceConfig::default();
    cfg.countdown.seconds = 0;
    cfg.countdown.tick_millis = 10;
    let notifier = notifier_at(&platform, CLOCK_MILLIS, &cfg).await;

    let ids: Vec<TaskId> = (0..FINISHED_HISTORY + 50)
        .map(|i| id(&format!("task-{i}")))
        .collect();
    for task_id in &ids {
        notifier.start(task_id.clone()).await.unwrap();
        notifier.wait_idle().await;
    }

    assert!(notifier.active().await.is_empty());
    assert_eq!(notifier.state(&ids[0]).await, CountdownState::Idle);
    assert_eq!(
        notifier.state(ids.last().unwrap()).await,
        CountdownState::Completed
    );
    let mut remembered = 0;
    for task_id in &ids {
        if notifier.state(task_id).await != CountdownState::Idle {
            remembered += 1;
        }
    }
    assert_eq!(remembered, FINISHED_HISTORY);
    notifier.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancelled_task_reports_state_at_once() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;

    notifier.start(id("002")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(notifier.cancel(&id("002")).await);
    assert_eq!(notifier.state(&id("002")).await, CountdownState::Cancelled);
    assert!(notifier.active().await.is_empty());
    assert!(!notifier.cancel(&id("002")).await);
    assert_eq!(
        notifier.start(id("002")).await,
        Err(StartError::AlreadyRunning(id("002")))
    );

    notifier.wait_idle().await;
    notifier.start(id("002")).await.unwrap();
    assert_eq!(
        notifier.state(&id("002")).await,
        CountdownState::Running { remaining: 10 }
    );
    notifier.shutdown().await;
    assert_eq!(notifier.completion_signal().latest(), None);
}

#[tokio::test(start_paused = true)]
async fn whitespace_id_starts_a_countdown() {
    let platform = RecordingPlatform::new(PermissionState::allowed());
    let notifier = notifier_with(&platform).await;

    assert_eq!(
        notifier.handle_request(&StartRequest::new(" ")).await,
        Some(id(" "))
    );
    notifier.wait_idle().await;
    notifier.shutdown().await;

    assert_eq!(notifier.state(&id(" ")).await, CountdownState::Completed);
    assert_eq!(platform.posts_to(FALLBACK_SLOT).len(), 11);
}
