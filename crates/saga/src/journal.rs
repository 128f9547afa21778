// Durable saga journal backed by SQLite.
//
// `saga_runs` holds the current state of every run. `saga_transitions` is
// append-only: each state change inserts its transition row and updates the
// run in the same transaction, so a crash never leaves the two disagreeing.
// A partial unique index keeps at most one non-terminal run per workflow id.

use std::{
    fs,
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::{state::SagaState, steps::StepKind};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE saga_runs (
    run_id              TEXT PRIMARY KEY,
    workflow_id         TEXT NOT NULL,
    task_queue          TEXT NOT NULL,
    robot_id            TEXT NOT NULL,
    user_id             TEXT NOT NULL,
    state               TEXT NOT NULL,
    disable_attempts    INTEGER NOT NULL DEFAULT 0,
    notify_attempts     INTEGER NOT NULL DEFAULT 0,
    disable_result      TEXT NULL,
    failure_reason      TEXT NULL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE UNIQUE INDEX saga_runs_active_workflow_idx
    ON saga_runs (workflow_id)
    WHERE state NOT IN ('completed', 'failed');

CREATE INDEX saga_runs_workflow_idx
    ON saga_runs (workflow_id);

CREATE TABLE saga_transitions (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id          TEXT NOT NULL REFERENCES saga_runs (run_id),
    from_state      TEXT NULL,
    to_state        TEXT NOT NULL,
    detail          TEXT NULL,
    recorded_at     TEXT NOT NULL
);

CREATE INDEX saga_transitions_run_idx
    ON saga_transitions (run_id, seq);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL)];

const RUN_COLUMNS: &str = "run_id, workflow_id, task_queue, robot_id, user_id, state, \
     disable_attempts, notify_attempts, disable_result, failure_reason, created_at, updated_at";

/// Snapshot of one saga run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SagaRecord {
    pub workflow_id: String,
    pub run_id: String,
    pub task_queue: String,
    pub robot_id: String,
    pub user_id: String,
    pub state: SagaState,
    pub disable_attempts: u32,
    pub notify_attempts: u32,
    pub disable_result: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    pub fn attempts(&self, step: StepKind) -> u32 {
        match step {
            StepKind::Disable => self.disable_attempts,
            StepKind::Notify => self.notify_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun<'a> {
    pub workflow_id: &'a str,
    pub run_id: &'a str,
    pub task_queue: &'a str,
    pub robot_id: &'a str,
    pub user_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    Started(SagaRecord),
    /// A non-terminal run already owns this workflow id.
    AlreadyRunning(SagaRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    pub seq: i64,
    pub run_id: String,
    pub from_state: Option<SagaState>,
    pub to_state: SagaState,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct SagaJournal {
    conn: Mutex<Connection>,
}

impl SagaJournal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create saga journal directory `{}`", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open saga journal at `{}`", path.display()))?;
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )
        .context("failed to configure sqlite pragmas for saga journal")?;

        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory saga journal")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("failed to configure sqlite pragmas for saga journal")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn())
    }

    /// Insert a new run in `pending`, unless the workflow id already has a
    /// non-terminal run.
    pub fn begin(&self, run: &NewRun<'_>, now: DateTime<Utc>) -> Result<BeginOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to start saga begin transaction")?;

        if let Some(existing) = active_run(&tx, run.workflow_id)? {
            return Ok(BeginOutcome::AlreadyRunning(existing));
        }

        let now_str = now.to_rfc3339();
        tx.execute(
            "INSERT INTO saga_runs \
             (run_id, workflow_id, task_queue, robot_id, user_id, state, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                run.run_id,
                run.workflow_id,
                run.task_queue,
                run.robot_id,
                run.user_id,
                SagaState::Pending.as_str(),
                now_str,
            ],
        )
        .with_context(|| format!("failed to insert saga run `{}`", run.run_id))?;
        insert_transition(&tx, run.run_id, None, SagaState::Pending, None, &now_str)?;

        let record = run_by_id(&tx, run.run_id)?
            .ok_or_else(|| anyhow!("saga run `{}` vanished after insert", run.run_id))?;
        tx.commit().context("failed to commit saga begin transaction")?;
        Ok(BeginOutcome::Started(record))
    }

    /// Move a run from `from` to `to`. `detail` becomes the disable result when
    /// entering `notifying` and the failure reason when entering `failed`.
    pub fn transition(
        &self,
        run_id: &str,
        from: SagaState,
        to: SagaState,
        detail: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SagaRecord> {
        if !from.can_transition_to(to) {
            bail!("illegal saga transition {from} -> {to} for run `{run_id}`");
        }

        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to start saga transition transaction")?;
        let now_str = now.to_rfc3339();

        insert_transition(&tx, run_id, Some(from), to, detail, &now_str)?;
        let rows = tx
            .execute(
                "UPDATE saga_runs SET state = ?1, updated_at = ?2, \
                 disable_result = CASE WHEN ?1 = 'notifying' THEN ?3 ELSE disable_result END, \
                 failure_reason = CASE WHEN ?1 = 'failed' THEN ?3 ELSE failure_reason END \
                 WHERE run_id = ?4 AND state = ?5",
                params![to.as_str(), now_str, detail, run_id, from.as_str()],
            )
            .with_context(|| format!("failed to move saga run `{run_id}` to {to}"))?;
        if rows == 0 {
            bail!("saga run `{run_id}` is not in state {from}");
        }

        let record = run_by_id(&tx, run_id)?
            .ok_or_else(|| anyhow!("saga run `{run_id}` vanished during transition"))?;
        tx.commit().context("failed to commit saga transition")?;
        Ok(record)
    }

    /// Count one more attempt of `step` before it runs. Returns the new count.
    pub fn record_attempt(&self, run_id: &str, step: StepKind, now: DateTime<Utc>) -> Result<u32> {
        let column = match step {
            StepKind::Disable => "disable_attempts",
            StepKind::Notify => "notify_attempts",
        };
        let conn = self.conn();
        conn.query_row(
            &format!(
                "UPDATE saga_runs SET {column} = {column} + 1, updated_at = ?1 \
                 WHERE run_id = ?2 RETURNING {column}"
            ),
            params![now.to_rfc3339(), run_id],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("failed to record {step} attempt for saga run `{run_id}`"))?
        .ok_or_else(|| anyhow!("saga run `{run_id}` does not exist"))
    }

    pub fn run(&self, run_id: &str) -> Result<Option<SagaRecord>> {
        run_by_id(&self.conn(), run_id)
    }

    /// The most recently started run for a workflow id, terminal or not.
    pub fn latest_for_workflow(&self, workflow_id: &str) -> Result<Option<SagaRecord>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM saga_runs WHERE workflow_id = ?1 \
                     ORDER BY rowid DESC LIMIT 1"
                ),
                params![workflow_id],
                row_to_record,
            )
            .optional()
            .with_context(|| format!("failed to load latest run for workflow `{workflow_id}`"))
    }

    /// All runs that have not reached a terminal state, oldest first.
    pub fn active_runs(&self) -> Result<Vec<SagaRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM saga_runs \
                 WHERE state NOT IN ('completed', 'failed') ORDER BY rowid ASC"
            ))
            .context("failed to prepare active saga query")?;
        let rows = stmt.query_map([], row_to_record).context("failed to query active sagas")?;
        rows.collect::<std::result::Result<Vec<_>, _>>().context("failed to collect active sagas")
    }

    pub fn transitions(&self, run_id: &str) -> Result<Vec<TransitionRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT seq, run_id, from_state, to_state, detail, recorded_at \
                 FROM saga_transitions WHERE run_id = ?1 ORDER BY seq ASC",
            )
            .context("failed to prepare saga transition query")?;
        let rows = stmt
            .query_map(params![run_id], row_to_transition)
            .context("failed to query saga transitions")?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to collect saga transitions")
    }
}

fn active_run(conn: &Connection, workflow_id: &str) -> Result<Option<SagaRecord>> {
    conn.query_row(
        &format!(
            "SELECT {RUN_COLUMNS} FROM saga_runs \
             WHERE workflow_id = ?1 AND state NOT IN ('completed', 'failed')"
        ),
        params![workflow_id],
        row_to_record,
    )
    .optional()
    .with_context(|| format!("failed to look up active run for workflow `{workflow_id}`"))
}

fn run_by_id(conn: &Connection, run_id: &str) -> Result<Option<SagaRecord>> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM saga_runs WHERE run_id = ?1"),
        params![run_id],
        row_to_record,
    )
    .optional()
    .with_context(|| format!("failed to load saga run `{run_id}`"))
}

fn insert_transition(
    conn: &Connection,
    run_id: &str,
    from: Option<SagaState>,
    to: SagaState,
    detail: Option<&str>,
    recorded_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO saga_transitions (run_id, from_state, to_state, detail, recorded_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![run_id, from.map(SagaState::as_str), to.as_str(), detail, recorded_at],
    )
    .with_context(|| format!("failed to append transition to {to} for saga run `{run_id}`"))?;
    Ok(())
}

fn parse_state(index: usize, value: &str) -> rusqlite::Result<SagaState> {
    SagaState::parse(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            index,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(format!("unknown saga state `{value}`"))),
        )
    })
}

fn parse_timestamp(index: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    value.parse::<DateTime<Utc>>().map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(error))
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SagaRecord> {
    let state: String = row.get(5)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(SagaRecord {
        run_id: row.get(0)?,
        workflow_id: row.get(1)?,
        task_queue: row.get(2)?,
        robot_id: row.get(3)?,
        user_id: row.get(4)?,
        state: parse_state(5, &state)?,
        disable_attempts: row.get(6)?,
        notify_attempts: row.get(7)?,
        disable_result: row.get(8)?,
        failure_reason: row.get(9)?,
        created_at: parse_timestamp(10, &created_at)?,
        updated_at: parse_timestamp(11, &updated_at)?,
    })
}

fn row_to_transition(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransitionRecord> {
    let from_state: Option<String> = row.get(2)?;
    let to_state: String = row.get(3)?;
    let recorded_at: String = row.get(5)?;

    Ok(TransitionRecord {
        seq: row.get(0)?,
        run_id: row.get(1)?,
        from_state: from_state.as_deref().map(|value| parse_state(2, value)).transpose()?,
        to_state: parse_state(3, &to_state)?,
        detail: row.get(4)?,
        recorded_at: parse_timestamp(5, &recorded_at)?,
    })
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql)
            .with_context(|| format!("failed to apply saga journal migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, second).single().expect("valid timestamp")
    }

    fn new_run<'a>(robot_id: &'a str, workflow_id: &'a str, run_id: &'a str) -> NewRun<'a> {
        NewRun { workflow_id, run_id, task_queue: "ADMIN_TASK_QUEUE", robot_id, user_id: "u1" }
    }

    fn started(outcome: BeginOutcome) -> SagaRecord {
        match outcome {
            BeginOutcome::Started(record) => record,
            BeginOutcome::AlreadyRunning(record) => panic!("unexpected duplicate: {record:?}"),
        }
    }

    #[test]
    fn begin_creates_pending_run_with_initial_transition() {
        let journal = SagaJournal::open_in_memory().expect("journal should open");
        let record = started(
            journal.begin(&new_run("R7", "disable_robot_workflow_R7", "run-1"), at(0)).unwrap(),
        );

        assert_eq!(record.state, SagaState::Pending);
        assert_eq!(record.workflow_id, "disable_robot_workflow_R7");
        assert_eq!(record.task_queue, "ADMIN_TASK_QUEUE");
        assert_eq!((record.disable_attempts, record.notify_attempts), (0, 0));
        assert_eq!(record.created_at, at(0));

        let transitions = journal.transitions("run-1").unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].from_state, None);
        assert_eq!(transitions[0].to_state, SagaState::Pending);
    }

    #[test]
    fn second_begin_for_active_workflow_returns_existing_run() {
        let journal = SagaJournal::open_in_memory().unwrap();
        started(journal.begin(&new_run("R7", "wf-R7", "run-1"), at(0)).unwrap());

        match journal.begin(&new_run("R7", "wf-R7", "run-2"), at(1)).unwrap() {
            BeginOutcome::AlreadyRunning(existing) => assert_eq!(existing.run_id, "run-1"),
            BeginOutcome::Started(record) => panic!("duplicate run started: {record:?}"),
        }
        assert!(journal.run("run-2").unwrap().is_none());
    }

    #[test]
    fn workflow_can_run_again_after_terminal_state() {
        let journal = SagaJournal::open_in_memory().unwrap();
        started(journal.begin(&new_run("R7", "wf-R7", "run-1"), at(0)).unwrap());
        journal.transition("run-1", SagaState::Pending, SagaState::Disabling, None, at(1)).unwrap();
        journal
            .transition("run-1", SagaState::Disabling, SagaState::Failed, Some("fleet down"), at(2))
            .unwrap();

        let second = started(journal.begin(&new_run("R7", "wf-R7", "run-2"), at(3)).unwrap());
        assert_eq!(second.run_id, "run-2");
        assert_eq!(journal.latest_for_workflow("wf-R7").unwrap().unwrap().run_id, "run-2");
    }

    #[test]
    fn transitions_record_results_and_reasons() {
        let journal = SagaJournal::open_in_memory().unwrap();
        started(journal.begin(&new_run("R7", "wf-R7", "run-1"), at(0)).unwrap());

        journal.transition("run-1", SagaState::Pending, SagaState::Disabling, None, at(1)).unwrap();
        let notifying = journal
            .transition(
                "run-1",
                SagaState::Disabling,
                SagaState::Notifying,
                Some("Robot R7 is now disabled."),
                at(2),
            )
            .unwrap();
        assert_eq!(notifying.disable_result.as_deref(), Some("Robot R7 is now disabled."));

        let failed = journal
            .transition("run-1", SagaState::Notifying, SagaState::Failed, Some("gave up"), at(3))
            .unwrap();
        assert_eq!(failed.state, SagaState::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("gave up"));
        assert_eq!(failed.disable_result.as_deref(), Some("Robot R7 is now disabled."));
        assert_eq!(failed.updated_at, at(3));

        let states: Vec<_> =
            journal.transitions("run-1").unwrap().into_iter().map(|t| t.to_state).collect();
        assert_eq!(
            states,
            vec![SagaState::Pending, SagaState::Disabling, SagaState::Notifying, SagaState::Failed]
        );
    }

    #[test]
    fn illegal_or_stale_transitions_are_rejected() {
        let journal = SagaJournal::open_in_memory().unwrap();
        started(journal.begin(&new_run("R7", "wf-R7", "run-1"), at(0)).unwrap());

        let skip = journal.transition("run-1", SagaState::Pending, SagaState::Notifying, None, at(1));
        assert!(skip.is_err());

        let stale =
            journal.transition("run-1", SagaState::Disabling, SagaState::Notifying, None, at(1));
        assert!(stale.is_err());
        assert_eq!(journal.run("run-1").unwrap().unwrap().state, SagaState::Pending);
        assert_eq!(journal.transitions("run-1").unwrap().len(), 1);
    }

    #[test]
    fn attempts_are_counted_per_step() {
        let journal = SagaJournal::open_in_memory().unwrap();
        started(journal.begin(&new_run("R7", "wf-R7", "run-1"), at(0)).unwrap());

        assert_eq!(journal.record_attempt("run-1", StepKind::Disable, at(1)).unwrap(), 1);
        assert_eq!(journal.record_attempt("run-1", StepKind::Notify, at(2)).unwrap(), 1);
        assert_eq!(journal.record_attempt("run-1", StepKind::Notify, at(3)).unwrap(), 2);

        let record = journal.run("run-1").unwrap().unwrap();
        assert_eq!(record.attempts(StepKind::Disable), 1);
        assert_eq!(record.attempts(StepKind::Notify), 2);
        assert!(journal.record_attempt("missing", StepKind::Notify, at(4)).is_err());
    }

    #[test]
    fn reopened_journal_keeps_active_runs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("sagas.db");

        {
            let journal = SagaJournal::open(&path).expect("journal should open");
            started(journal.begin(&new_run("R1", "wf-R1", "run-1"), at(0)).unwrap());
            started(journal.begin(&new_run("R2", "wf-R2", "run-2"), at(1)).unwrap());
            journal.transition("run-2", SagaState::Pending, SagaState::Disabling, None, at(2)).unwrap();
            journal
                .transition("run-2", SagaState::Disabling, SagaState::Failed, Some("x"), at(3))
                .unwrap();
        }

        let reopened = SagaJournal::open(&path).expect("journal should reopen");
        assert_eq!(reopened.schema_version().unwrap(), 1);
        let active: Vec<_> =
            reopened.active_runs().unwrap().into_iter().map(|r| r.run_id).collect();
        assert_eq!(active, vec!["run-1".to_string()]);
    }
}
