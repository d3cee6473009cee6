/// Sub-workflow linkage between a parent instance's phase and a nested child
/// workflow execution
///
/// Recorded independently of the active-run registry. There is deliberately
/// no uniqueness constraint per parent phase: a failed nested run is
/// recovered by explicitly starting a new execution, so retries accumulate
/// rows and "current" means most recently started.

use crate::error::{Result, WorkflowError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};
use uuid::Uuid;

/// Lifecycle of one nested execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubWorkflowStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl SubWorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubWorkflowStatus::Complete | SubWorkflowStatus::Failed)
    }

    fn as_str(self) -> &'static str {
        match self {
            SubWorkflowStatus::Pending => "pending",
            SubWorkflowStatus::InProgress => "in_progress",
            SubWorkflowStatus::Complete => "complete",
            SubWorkflowStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(SubWorkflowStatus::Pending),
            "in_progress" => Ok(SubWorkflowStatus::InProgress),
            "complete" => Ok(SubWorkflowStatus::Complete),
            "failed" => Ok(SubWorkflowStatus::Failed),
            other => Err(WorkflowError::Validation(format!(
                "unknown sub-workflow status '{}'",
                other
            ))),
        }
    }
}

/// One nested workflow execution record
#[derive(Debug, Clone, Serialize)]
pub struct SubWorkflowExecution {
    pub id: String,
    pub parent_instance_id: i64,
    pub parent_phase_number: i64,
    pub child_def_id: String,
    pub child_version: String,
    pub status: SubWorkflowStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Links parent phases to nested child executions
#[derive(Debug, Clone)]
pub struct SubWorkflowCoordinator {
    pool: SqlitePool,
}

impl SubWorkflowCoordinator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the sub-workflow schema. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sub_workflow_executions (
                id TEXT PRIMARY KEY,
                parent_instance_id INTEGER NOT NULL,
                parent_phase_number INTEGER NOT NULL,
                child_def_id TEXT NOT NULL,
                child_version TEXT NOT NULL,
                status TEXT NOT NULL,
                output JSON,
                error TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sub_workflow_parent ON sub_workflow_executions(parent_instance_id, parent_phase_number)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Begin a nested execution for a parent phase; returns the new id.
    /// Multiple executions per parent phase are permitted (retries).
    pub async fn start(
        &self,
        parent_instance_id: i64,
        parent_phase_number: i64,
        child_def_id: &str,
        child_version: &str,
    ) -> Result<SubWorkflowExecution> {
        if child_def_id.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "child definition id must not be empty".into(),
            ));
        }

        let execution = SubWorkflowExecution {
            id: Uuid::new_v4().to_string(),
            parent_instance_id,
            parent_phase_number,
            child_def_id: child_def_id.to_string(),
            child_version: child_version.to_string(),
            status: SubWorkflowStatus::InProgress,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO sub_workflow_executions
                (id, parent_instance_id, parent_phase_number, child_def_id, child_version, status, started_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&execution.id)
        .bind(parent_instance_id)
        .bind(parent_phase_number)
        .bind(child_def_id)
        .bind(child_version)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Started sub-workflow '{}' ({} v{}) for instance {} phase {}",
            execution.id,
            child_def_id,
            child_version,
            parent_instance_id,
            parent_phase_number
        );

        Ok(execution)
    }

    /// Terminal transition: `complete` when no error is given, `failed`
    /// otherwise. A second call fails `AlreadyTerminal`.
    pub async fn complete(
        &self,
        execution_id: &str,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<SubWorkflowExecution> {
        let current = self.get(execution_id).await?;
        if current.status.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(format!(
                "sub-workflow execution '{}' is already {}",
                execution_id,
                current.status.as_str()
            )));
        }

        let status = if error.is_some() {
            SubWorkflowStatus::Failed
        } else {
            SubWorkflowStatus::Complete
        };
        let output_json = output
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        // Guard on non-terminal status so two racing completers cannot both
        // apply.
        let result = sqlx::query(
            r#"
            UPDATE sub_workflow_executions
            SET status = ?, output = ?, error = ?, completed_at = ?
            WHERE id = ? AND status IN ('pending', 'in_progress')
            "#,
        )
        .bind(status.as_str())
        .bind(output_json)
        .bind(&error)
        .bind(Utc::now())
        .bind(execution_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WorkflowError::AlreadyTerminal(format!(
                "sub-workflow execution '{}' completed concurrently",
                execution_id
            )));
        }

        tracing::info!(
            "Sub-workflow '{}' finished as {}",
            execution_id,
            status.as_str()
        );

        self.get(execution_id).await
    }

    /// Exact record by execution id.
    pub async fn get(&self, execution_id: &str) -> Result<SubWorkflowExecution> {
        let row = sqlx::query(
            r#"
            SELECT id, parent_instance_id, parent_phase_number, child_def_id, child_version,
                   status, output, error, started_at, completed_at
            FROM sub_workflow_executions
            WHERE id = ?
            "#,
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            WorkflowError::NotFound(format!("sub-workflow execution '{}'", execution_id))
        })?;

        execution_from_row(row)
    }

    /// Executions for a parent instance, most recently started first; the
    /// head of the list is "the current execution". Optional phase filter.
    pub async fn latest_for_parent(
        &self,
        parent_instance_id: i64,
        parent_phase_number: Option<i64>,
    ) -> Result<Vec<SubWorkflowExecution>> {
        let rows = match parent_phase_number {
            Some(phase) => {
                sqlx::query(
                    r#"
                    SELECT id, parent_instance_id, parent_phase_number, child_def_id, child_version,
                           status, output, error, started_at, completed_at
                    FROM sub_workflow_executions
                    WHERE parent_instance_id = ? AND parent_phase_number = ?
                    ORDER BY started_at DESC, rowid DESC
                    "#,
                )
                .bind(parent_instance_id)
                .bind(phase)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, parent_instance_id, parent_phase_number, child_def_id, child_version,
                           status, output, error, started_at, completed_at
                    FROM sub_workflow_executions
                    WHERE parent_instance_id = ?
                    ORDER BY started_at DESC, rowid DESC
                    "#,
                )
                .bind(parent_instance_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(execution_from_row).collect()
    }
}

fn execution_from_row(row: sqlx::sqlite::SqliteRow) -> Result<SubWorkflowExecution> {
    let status: String = row.get("status");
    let output: Option<String> = row.get("output");
    Ok(SubWorkflowExecution {
        id: row.get("id"),
        parent_instance_id: row.get("parent_instance_id"),
        parent_phase_number: row.get("parent_phase_number"),
        child_def_id: row.get("child_def_id"),
        child_version: row.get("child_version"),
        status: SubWorkflowStatus::parse(&status)?,
        output: output.as_deref().map(serde_json::from_str).transpose()?,
        error: row.get("error"),
        started_at: row.get::<DateTime<Utc>, _>("started_at"),
        completed_at: row.get::<Option<DateTime<Utc>>, _>("completed_at"),
    })
}
