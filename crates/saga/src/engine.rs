// Saga engine: starts runs, drives them step by step, and resumes
// unfinished runs from the journal after a restart.

use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use fleetops_common::workflow::{workflow_id_for, TASK_QUEUE};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::{StartError, StepError, StepFailure},
    journal::{BeginOutcome, NewRun, SagaJournal, SagaRecord},
    retry::{SagaOptions, StepOptions},
    state::SagaState,
    steps::{DisableStep, FleetControl, NotificationSender, NotifyStep, StepKind},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaInput {
    pub robot_id: String,
    pub user_id: String,
}

impl SagaInput {
    pub fn new(robot_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { robot_id: robot_id.into(), user_id: user_id.into() }
    }
}

/// Observer for one run. Dropping it does not affect the run.
#[derive(Debug, Clone)]
pub struct SagaHandle {
    updates: watch::Receiver<SagaRecord>,
}

impl SagaHandle {
    pub fn workflow_id(&self) -> String {
        self.updates.borrow().workflow_id.clone()
    }

    pub fn run_id(&self) -> String {
        self.updates.borrow().run_id.clone()
    }

    pub fn current(&self) -> SagaRecord {
        self.updates.borrow().clone()
    }

    /// Resolves once the run is terminal. If the driving task stops early
    /// (journal failure or shutdown) this returns the last known snapshot.
    pub async fn wait(mut self) -> SagaRecord {
        loop {
            {
                let current = self.updates.borrow_and_update();
                if current.state.is_terminal() {
                    return current.clone();
                }
            }
            if self.updates.changed().await.is_err() {
                return self.updates.borrow().clone();
            }
        }
    }
}

#[derive(Clone)]
pub struct SagaEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    journal: Arc<SagaJournal>,
    disable: DisableStep,
    notify: NotifyStep,
    options: SagaOptions,
}

impl SagaEngine {
    pub fn new(
        journal: SagaJournal,
        fleet: Arc<dyn FleetControl>,
        sender: Arc<dyn NotificationSender>,
        options: SagaOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                journal: Arc::new(journal),
                disable: DisableStep::new(fleet),
                notify: NotifyStep::new(sender),
                options,
            }),
        }
    }

    /// Durably record a new run and start driving it in the background.
    ///
    /// Fails with `AlreadyRunning` when the robot's workflow id already has a
    /// non-terminal run.
    pub fn start(&self, input: SagaInput) -> Result<SagaHandle, StartError> {
        if input.robot_id.is_empty() {
            return Err(StartError::MissingRobotId);
        }

        let workflow_id = workflow_id_for(&input.robot_id);
        let run_id = Uuid::new_v4().to_string();
        let outcome = self
            .inner
            .journal
            .begin(
                &NewRun {
                    workflow_id: &workflow_id,
                    run_id: &run_id,
                    task_queue: TASK_QUEUE,
                    robot_id: &input.robot_id,
                    user_id: &input.user_id,
                },
                Utc::now(),
            )
            .map_err(StartError::EngineUnavailable)?;

        match outcome {
            BeginOutcome::Started(record) => {
                info!(
                    workflow_id = %record.workflow_id,
                    run_id = %record.run_id,
                    robot_id = %record.robot_id,
                    user_id = %record.user_id,
                    task_queue = %record.task_queue,
                    "saga started"
                );
                Ok(self.spawn(record))
            }
            BeginOutcome::AlreadyRunning(existing) => {
                warn!(
                    workflow_id = %existing.workflow_id,
                    run_id = %existing.run_id,
                    state = %existing.state,
                    "saga already running"
                );
                Err(StartError::AlreadyRunning {
                    workflow_id: existing.workflow_id,
                    run_id: existing.run_id,
                })
            }
        }
    }

    /// Latest run for a workflow id, if any.
    pub fn status(&self, workflow_id: &str) -> Result<Option<SagaRecord>> {
        self.inner.journal.latest_for_workflow(workflow_id)
    }

    pub fn journal(&self) -> &SagaJournal {
        &self.inner.journal
    }

    /// Resume every non-terminal run found in the journal.
    pub fn recover(&self) -> Result<Vec<SagaHandle>> {
        let active = self.inner.journal.active_runs().context("failed to load unfinished sagas")?;
        if !active.is_empty() {
            info!(count = active.len(), "resuming unfinished sagas");
        }

        Ok(active
            .into_iter()
            .map(|record| {
                info!(
                    workflow_id = %record.workflow_id,
                    run_id = %record.run_id,
                    state = %record.state,
                    disable_attempts = record.disable_attempts,
                    notify_attempts = record.notify_attempts,
                    "resuming saga"
                );
                self.spawn(record)
            })
            .collect())
    }

    fn spawn(&self, record: SagaRecord) -> SagaHandle {
        let (updates_tx, updates_rx) = watch::channel(record.clone());
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let workflow_id = record.workflow_id.clone();
            let run_id = record.run_id.clone();
            if let Err(error) = inner.drive(record, &updates_tx).await {
                error!(
                    workflow_id = %workflow_id,
                    run_id = %run_id,
                    error = %format!("{error:#}"),
                    "saga stopped on journal error; it will resume on next recovery"
                );
            }
        });

        SagaHandle { updates: updates_rx }
    }
}

impl EngineInner {
    async fn drive(&self, mut record: SagaRecord, updates: &watch::Sender<SagaRecord>) -> Result<()> {
        if record.state == SagaState::Pending {
            record = self.advance(&record, SagaState::Disabling, None, updates).await?;
        }

        if record.state == SagaState::Disabling {
            let robot_id = record.robot_id.clone();
            let outcome = self
                .run_step(StepKind::Disable, &self.options.disable, &record, updates, || {
                    self.disable.execute(&robot_id)
                })
                .await?;
            record = match outcome {
                Ok(result) => {
                    self.advance(&record, SagaState::Notifying, Some(&result), updates).await?
                }
                Err(failure) => {
                    self.advance(&record, SagaState::Failed, Some(&failure.to_string()), updates)
                        .await?;
                    return Ok(());
                }
            };
        }

        if record.state == SagaState::Notifying {
            let (robot_id, user_id) = (record.robot_id.clone(), record.user_id.clone());
            let outcome = self
                .run_step(StepKind::Notify, &self.options.notify, &record, updates, || {
                    self.notify.execute(&robot_id, &user_id)
                })
                .await?;
            match outcome {
                Ok(()) => {
                    self.advance(&record, SagaState::Completed, None, updates).await?;
                }
                Err(failure) => {
                    self.advance(&record, SagaState::Failed, Some(&failure.to_string()), updates)
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn advance(
        &self,
        record: &SagaRecord,
        to: SagaState,
        detail: Option<&str>,
        updates: &watch::Sender<SagaRecord>,
    ) -> Result<SagaRecord> {
        let (run_id, from) = (record.run_id.clone(), record.state);
        let owned_detail = detail.map(str::to_owned);
        let next = run_journal_task(&self.journal, move |journal| {
            journal.transition(&run_id, from, to, owned_detail.as_deref(), Utc::now())
        })
        .await?;

        match to {
            SagaState::Failed => warn!(
                workflow_id = %next.workflow_id,
                run_id = %next.run_id,
                from = %record.state,
                to = %to,
                reason = detail.unwrap_or_default(),
                "saga transition"
            ),
            _ => info!(
                workflow_id = %next.workflow_id,
                run_id = %next.run_id,
                from = %record.state,
                to = %to,
                "saga transition"
            ),
        }

        updates.send_replace(next.clone());
        Ok(next)
    }

    /// Run one step under its timeout and retry policy. The outer error is a
    /// journal failure; the inner one is the step's terminal outcome.
    async fn run_step<T, F, Fut>(
        &self,
        step: StepKind,
        options: &StepOptions,
        record: &SagaRecord,
        updates: &watch::Sender<SagaRecord>,
        mut attempt_fn: F,
    ) -> Result<Result<T, StepFailure>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let mut attempts = record.attempts(step);
        let mut last_error: Option<StepError> = None;

        loop {
            if !options.retry.allows_another_attempt(attempts) {
                let last_error = last_error.map_or_else(
                    || "attempt budget was spent before the saga resumed".to_string(),
                    |error| error.to_string(),
                );
                return Ok(Err(StepFailure::RetriesExhausted { step, attempts, last_error }));
            }

            let run_id = record.run_id.clone();
            let (recorded, latest) = run_journal_task(&self.journal, move |journal| {
                let recorded = journal.record_attempt(&run_id, step, Utc::now())?;
                Ok((recorded, journal.run(&run_id)?))
            })
            .await?;
            attempts = recorded;
            if let Some(latest) = latest {
                updates.send_replace(latest);
            }

            let outcome =
                match tokio::time::timeout(options.start_to_close_timeout, attempt_fn()).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(StepError::Timeout(options.start_to_close_timeout)),
                };

            match outcome {
                Ok(value) => {
                    info!(run_id = %record.run_id, step = %step, attempt = attempts, "step succeeded");
                    return Ok(Ok(value));
                }
                Err(error) if !error.is_retryable() => {
                    return Ok(Err(StepFailure::NonRetryable { step, attempt: attempts, error }));
                }
                Err(error) => {
                    if options.retry.allows_another_attempt(attempts) {
                        let delay = options.retry.delay_after_attempt(attempts);
                        warn!(
                            run_id = %record.run_id,
                            step = %step,
                            attempt = attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %error,
                            "step attempt failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(
                            run_id = %record.run_id,
                            step = %step,
                            attempt = attempts,
                            error = %error,
                            "step attempt failed; retry budget spent"
                        );
                    }
                    last_error = Some(error);
                }
            }
        }
    }
}

/// Journal writes fsync, so the driver runs them on the blocking pool.
async fn run_journal_task<T>(
    journal: &Arc<SagaJournal>,
    task: impl FnOnce(&SagaJournal) -> Result<T> + Send + 'static,
) -> Result<T>
where
    T: Send + 'static,
{
    let journal = Arc::clone(journal);
    tokio::task::spawn_blocking(move || task(&journal)).await.context("journal task join failed")?
}
