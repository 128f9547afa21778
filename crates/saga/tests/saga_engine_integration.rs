use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::Utc;
use fleetops_common::protocol::notify::Notification;
use fleetops_saga::{
    engine::{SagaEngine, SagaInput},
    error::{StartError, StepError},
    journal::{BeginOutcome, NewRun, SagaJournal},
    retry::{RetryPolicy, SagaOptions, StepOptions},
    state::SagaState,
    steps::{FleetControl, NotificationSender, StepKind},
};
use tokio::sync::Semaphore;

#[derive(Default)]
struct MockFleet {
    calls: AtomicU32,
    latency: Duration,
    gate: Option<Arc<Semaphore>>,
}

impl MockFleet {
    fn instant() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self { latency, ..Self::default() })
    }

    fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self { gate: Some(gate), ..Self::default() })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FleetControl for MockFleet {
    fn disable(
        &self,
        robot_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<String, StepError>> + Send>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let robot_id = robot_id.to_owned();
        let latency = self.latency;
        let gate = self.gate.clone();
        Box::pin(async move {
            if let Some(gate) = gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            tokio::time::sleep(latency).await;
            Ok(format!("Robot {robot_id} is now disabled."))
        })
    }
}

/// Replays scripted outcomes, then succeeds.
#[derive(Default)]
struct MockSender {
    script: Mutex<VecDeque<StepError>>,
    attempts: Mutex<Vec<Notification>>,
    delivered: Mutex<Vec<Notification>>,
}

impl MockSender {
    fn scripted(errors: impl IntoIterator<Item = StepError>) -> Arc<Self> {
        Arc::new(Self { script: Mutex::new(errors.into_iter().collect()), ..Self::default() })
    }

    fn always_failing(error: StepError) -> Arc<Self> {
        Self::scripted(std::iter::repeat(error).take(64))
    }

    fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

impl NotificationSender for MockSender {
    fn send(
        &self,
        notification: Notification,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send>> {
        self.attempts.lock().unwrap().push(notification.clone());
        let result = match self.script.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => {
                self.delivered.lock().unwrap().push(notification);
                Ok(())
            }
        };
        Box::pin(async move { result })
    }
}

fn fast_options(max_attempts: u32, timeout: Duration) -> SagaOptions {
    SagaOptions::uniform(StepOptions {
        start_to_close_timeout: timeout,
        retry: RetryPolicy::default()
            .with_intervals(Duration::from_millis(10), Duration::from_millis(50))
            .with_maximum_attempts(max_attempts),
    })
}

fn engine(fleet: Arc<MockFleet>, sender: Arc<MockSender>, options: SagaOptions) -> SagaEngine {
    SagaEngine::new(SagaJournal::open_in_memory().expect("journal"), fleet, sender, options)
}

#[tokio::test(start_paused = true)]
async fn happy_path_disables_then_notifies() {
    let fleet = MockFleet::slow(Duration::from_secs(2));
    let sender = MockSender::scripted([]);
    let engine = engine(fleet.clone(), sender.clone(), SagaOptions::default());

    let handle = engine.start(SagaInput::new("R7", "u1")).expect("saga should start");
    assert_eq!(handle.workflow_id(), "disable_robot_workflow_R7");

    let finished = handle.wait().await;
    assert_eq!(finished.state, SagaState::Completed);
    assert_eq!(finished.disable_result.as_deref(), Some("Robot R7 is now disabled."));
    assert_eq!((finished.disable_attempts, finished.notify_attempts), (1, 1));
    assert_eq!(fleet.calls(), 1);
    assert_eq!(sender.delivered(), vec![Notification::new("u1", "Robot R7 has been disabled.")]);

    let states: Vec<_> = engine
        .journal()
        .transitions(&finished.run_id)
        .unwrap()
        .into_iter()
        .map(|transition| transition.to_state)
        .collect();
    assert_eq!(
        states,
        vec![SagaState::Pending, SagaState::Disabling, SagaState::Notifying, SagaState::Completed]
    );
}

#[tokio::test(start_paused = true)]
async fn operator_offline_exhausts_notify_retries() {
    let fleet = MockFleet::instant();
    let sender = MockSender::always_failing(StepError::NotConnected("u2".into()));
    let engine = engine(fleet.clone(), sender.clone(), fast_options(5, Duration::from_secs(1)));

    let finished = engine.start(SagaInput::new("R8", "u2")).unwrap().wait().await;

    assert_eq!(finished.state, SagaState::Failed);
    assert_eq!(fleet.calls(), 1, "disable must run exactly once");
    assert_eq!(finished.notify_attempts, 5);
    assert_eq!(sender.attempts(), 5);
    assert!(sender.delivered().is_empty());
    let reason = finished.failure_reason.expect("failure reason should be recorded");
    assert!(reason.contains("notify step gave up after 5 attempts"), "{reason}");
    assert!(reason.contains("u2"), "{reason}");
}

#[tokio::test(start_paused = true)]
async fn transport_failures_exhaust_retries_without_undoing_disable() {
    let fleet = MockFleet::instant();
    let sender = MockSender::always_failing(StepError::Transport("notifier returned 503".into()));
    let engine = engine(fleet.clone(), sender.clone(), fast_options(4, Duration::from_secs(1)));

    let finished = engine.start(SagaInput::new("R5", "u1")).unwrap().wait().await;

    assert_eq!(finished.state, SagaState::Failed);
    assert_eq!(finished.notify_attempts, 4);
    assert_eq!(sender.attempts(), 4);
    assert!(sender.delivered().is_empty());
    // No compensation: the robot stays disabled.
    assert_eq!(fleet.calls(), 1);
    assert_eq!(finished.disable_result.as_deref(), Some("Robot R5 is now disabled."));
    let reason = finished.failure_reason.expect("failure reason should be recorded");
    assert!(reason.contains("notify step gave up after 4 attempts"), "{reason}");
    assert!(reason.contains("503"), "{reason}");

    let last = engine.journal().transitions(&finished.run_id).unwrap().pop().unwrap();
    assert_eq!((last.from_state, last.to_state), (Some(SagaState::Notifying), SagaState::Failed));
}

#[tokio::test(start_paused = true)]
async fn operator_reconnecting_within_budget_completes() {
    let fleet = MockFleet::instant();
    let sender = MockSender::scripted([
        StepError::NotConnected("u1".into()),
        StepError::Transport("connection reset".into()),
    ]);
    let engine = engine(fleet, sender.clone(), fast_options(5, Duration::from_secs(1)));

    let finished = engine.start(SagaInput::new("R1", "u1")).unwrap().wait().await;

    assert_eq!(finished.state, SagaState::Completed);
    assert_eq!(finished.notify_attempts, 3);
    assert_eq!(sender.delivered().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_payload_fails_without_retry() {
    let fleet = MockFleet::instant();
    let sender = MockSender::always_failing(StepError::InvalidPayload("user_id is required".into()));
    let engine = engine(fleet, sender.clone(), fast_options(5, Duration::from_secs(1)));

    let finished = engine.start(SagaInput::new("R3", "")).unwrap().wait().await;

    assert_eq!(finished.state, SagaState::Failed);
    assert_eq!(finished.notify_attempts, 1);
    assert_eq!(sender.attempts(), 1);
    assert!(finished.failure_reason.unwrap().contains("non-retryable"));
}

#[tokio::test(start_paused = true)]
async fn disable_timeouts_fail_before_notify() {
    let fleet = MockFleet::slow(Duration::from_secs(10));
    let sender = MockSender::scripted([]);
    let engine = engine(fleet.clone(), sender.clone(), fast_options(3, Duration::from_secs(1)));

    let finished = engine.start(SagaInput::new("R4", "u1")).unwrap().wait().await;

    assert_eq!(finished.state, SagaState::Failed);
    assert_eq!(finished.disable_attempts, 3);
    assert_eq!(fleet.calls(), 3);
    assert_eq!(finished.notify_attempts, 0);
    assert_eq!(sender.attempts(), 0, "notify must never run after a failed disable");
    assert!(finished.failure_reason.unwrap().contains("disable step gave up after 3 attempts"));
}

#[tokio::test]
async fn duplicate_start_is_rejected_while_running() {
    let gate = Arc::new(Semaphore::new(0));
    let fleet = MockFleet::gated(Arc::clone(&gate));
    let engine = engine(fleet.clone(), MockSender::scripted([]), SagaOptions::default());

    let first = engine.start(SagaInput::new("R7", "u1")).unwrap();
    let first_run = first.run_id();

    match engine.start(SagaInput::new("R7", "u9")) {
        Err(StartError::AlreadyRunning { workflow_id, run_id }) => {
            assert_eq!(workflow_id, "disable_robot_workflow_R7");
            assert_eq!(run_id, first_run);
        }
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }

    // A different robot is independent.
    let other = engine.start(SagaInput::new("R8", "u1")).expect("other robot should start");

    gate.add_permits(2);
    assert_eq!(first.wait().await.state, SagaState::Completed);
    assert_eq!(other.wait().await.state, SagaState::Completed);

    let rerun = engine.start(SagaInput::new("R7", "u1")).expect("terminal run frees the workflow id");
    assert_ne!(rerun.run_id(), first_run);
    gate.add_permits(1);
    let rerun_record = rerun.wait().await;
    assert_eq!(rerun_record.state, SagaState::Completed);

    let status = engine.status("disable_robot_workflow_R7").unwrap().expect("status");
    assert_eq!(status.run_id, rerun_record.run_id);
}

#[tokio::test]
async fn empty_robot_id_is_rejected() {
    let engine = engine(MockFleet::instant(), MockSender::scripted([]), SagaOptions::default());
    assert!(matches!(engine.start(SagaInput::new("", "u1")), Err(StartError::MissingRobotId)));
    assert!(engine.status("disable_robot_workflow_").unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn recovery_resumes_notify_without_repeating_disable() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("sagas.db");

    {
        let journal = SagaJournal::open(&path).unwrap();
        let outcome = journal
            .begin(
                &NewRun {
                    workflow_id: "disable_robot_workflow_R9",
                    run_id: "run-9",
                    task_queue: "ADMIN_TASK_QUEUE",
                    robot_id: "R9",
                    user_id: "u9",
                },
                Utc::now(),
            )
            .unwrap();
        assert!(matches!(outcome, BeginOutcome::Started(_)));
        journal.transition("run-9", SagaState::Pending, SagaState::Disabling, None, Utc::now()).unwrap();
        journal.record_attempt("run-9", StepKind::Disable, Utc::now()).unwrap();
        journal
            .transition(
                "run-9",
                SagaState::Disabling,
                SagaState::Notifying,
                Some("Robot R9 is now disabled."),
                Utc::now(),
            )
            .unwrap();
        journal.record_attempt("run-9", StepKind::Notify, Utc::now()).unwrap();
    }

    let fleet = MockFleet::instant();
    let sender = MockSender::scripted([]);
    let engine = SagaEngine::new(
        SagaJournal::open(&path).unwrap(),
        fleet.clone(),
        sender.clone(),
        fast_options(5, Duration::from_secs(1)),
    );

    let handles = engine.recover().expect("recovery should load the journal");
    assert_eq!(handles.len(), 1);
    let finished = handles.into_iter().next().unwrap().wait().await;

    assert_eq!(finished.state, SagaState::Completed);
    assert_eq!(fleet.calls(), 0);
    assert_eq!(finished.notify_attempts, 2, "attempt counters survive the restart");
    assert_eq!(sender.delivered(), vec![Notification::new("u9", "Robot R9 has been disabled.")]);
    assert!(engine.recover().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn recovery_with_spent_budget_fails_immediately() {
    let journal = SagaJournal::open_in_memory().unwrap();
    journal
        .begin(
            &NewRun {
                workflow_id: "disable_robot_workflow_R5",
                run_id: "run-5",
                task_queue: "ADMIN_TASK_QUEUE",
                robot_id: "R5",
                user_id: "u5",
            },
            Utc::now(),
        )
        .unwrap();
    journal.transition("run-5", SagaState::Pending, SagaState::Disabling, None, Utc::now()).unwrap();
    for _ in 0..3 {
        journal.record_attempt("run-5", StepKind::Disable, Utc::now()).unwrap();
    }

    let fleet = MockFleet::instant();
    let engine = SagaEngine::new(
        journal,
        fleet.clone(),
        MockSender::scripted([]),
        fast_options(3, Duration::from_secs(1)),
    );

    let finished = engine.recover().unwrap().into_iter().next().unwrap().wait().await;
    assert_eq!(finished.state, SagaState::Failed);
    assert_eq!(fleet.calls(), 0);
    assert!(finished.failure_reason.unwrap().contains("attempt budget was spent"));
}
