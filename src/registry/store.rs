/// The active workflow registry: a passive, externally-driven ledger of every
/// in-flight instance across calling sources
///
/// No scheduler or background loop lives here; callers from the UI, the agent
/// runtime, and the chat client push state in and read state out. Because
/// several sources may write the same entry, every write is guarded by the
/// entry's revision counter — a lost race surfaces as `Conflict` instead of
/// silently clobbering another writer.

use crate::error::{Result, WorkflowError};
use crate::registry::types::{
    clamp_progress, merge_metadata, CallerSource, ProgressUpdate, RegisterRun, RunEntry, RunStatus,
};
use crate::workflow::cache::DefinitionCache;
use chrono::{DateTime, Duration, Utc};
use serde_json::Map;
use sqlx::{sqlite::SqlitePool, Row};
use std::sync::Arc;
use uuid::Uuid;

/// SQLite-backed run ledger
#[derive(Debug, Clone)]
pub struct ActiveWorkflowRegistry {
    pool: SqlitePool,
    definitions: Arc<DefinitionCache>,
}

impl ActiveWorkflowRegistry {
    pub fn new(pool: SqlitePool, definitions: Arc<DefinitionCache>) -> Self {
        Self { pool, definitions }
    }

    /// Initialize the registry schema. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS active_workflows (
                id TEXT PRIMARY KEY,
                workflow_def_id TEXT NOT NULL,
                workflow_name TEXT NOT NULL,
                source TEXT NOT NULL,
                project_folder TEXT,
                project_name TEXT,
                current_node_id TEXT,
                current_node_name TEXT,
                status TEXT NOT NULL,
                progress_percent REAL NOT NULL DEFAULT 0,
                total_nodes INTEGER NOT NULL DEFAULT 0,
                completed_nodes INTEGER NOT NULL DEFAULT 0,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                error_message TEXT,
                metadata JSON NOT NULL DEFAULT '{}',
                revision INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_active_workflows_status ON active_workflows(status, started_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Register a newly-started instance. Status is always `running` and
    /// progress 0. `workflow_name` and `total_nodes` fall back to the
    /// definition when the caller omits them.
    pub async fn register(&self, req: RegisterRun) -> Result<RunEntry> {
        if req.workflow_def_id.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "workflow definition id must not be empty".into(),
            ));
        }

        let definition = self.definitions.get_or_load(&req.workflow_def_id).await;
        let workflow_name = match req.workflow_name {
            Some(name) => name,
            None => definition
                .as_ref()
                .map(|d| d.name.clone())
                .ok_or_else(|| {
                    WorkflowError::NotFound(format!(
                        "definition '{}' (needed to resolve workflow name)",
                        req.workflow_def_id
                    ))
                })?,
        };
        let total_nodes = req.total_nodes.unwrap_or_else(|| {
            definition
                .as_ref()
                .map(|d| d.graph.nodes.len() as i64)
                .unwrap_or(0)
        });

        let entry = RunEntry {
            id: Uuid::new_v4().to_string(),
            workflow_def_id: req.workflow_def_id,
            workflow_name,
            source: req.source,
            project_folder: req.project_folder,
            project_name: req.project_name,
            current_node_id: None,
            current_node_name: None,
            status: RunStatus::Running,
            progress_percent: 0.0,
            total_nodes,
            completed_nodes: 0,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            metadata: req.metadata.unwrap_or_default(),
            revision: 0,
        };

        sqlx::query(
            r#"
            INSERT INTO active_workflows
                (id, workflow_def_id, workflow_name, source, project_folder, project_name,
                 status, progress_percent, total_nodes, completed_nodes, started_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.workflow_def_id)
        .bind(&entry.workflow_name)
        .bind(entry.source.as_str())
        .bind(&entry.project_folder)
        .bind(&entry.project_name)
        .bind(entry.status.as_str())
        .bind(entry.progress_percent)
        .bind(entry.total_nodes)
        .bind(entry.completed_nodes)
        .bind(entry.started_at)
        .bind(serde_json::to_string(&entry.metadata)?)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Registered run '{}' of '{}' from {}",
            entry.id,
            entry.workflow_def_id,
            entry.source.as_str()
        );

        Ok(entry)
    }

    /// Fetch one run by registry id.
    pub async fn get_run(&self, id: &str) -> Result<RunEntry> {
        let row = sqlx::query("SELECT * FROM active_workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(format!("run '{}'", id)))?;
        entry_from_row(row)
    }

    /// Runs ordered newest-first, optionally filtered by status and source.
    pub async fn list_runs(
        &self,
        status: Option<RunStatus>,
        source: Option<CallerSource>,
    ) -> Result<Vec<RunEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM active_workflows
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR source = ?2)
            ORDER BY started_at DESC, rowid DESC
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(source.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }

    /// Progress/position update. Permitted only while non-terminal; progress
    /// is clamped into [0, 100] and metadata is shallow-merged per key.
    pub async fn update_progress(&self, id: &str, update: ProgressUpdate) -> Result<RunEntry> {
        let mut entry = self.get_run(id).await?;
        if entry.status.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(format!(
                "run '{}' is {}",
                id,
                entry.status.as_str()
            )));
        }

        if let Some(node_id) = update.current_node_id {
            entry.current_node_id = Some(node_id);
        }
        if let Some(node_name) = update.current_node_name {
            entry.current_node_name = Some(node_name);
        }
        if let Some(progress) = update.progress_percent {
            entry.progress_percent = clamp_progress(progress);
        }
        if let Some(completed) = update.completed_nodes {
            entry.completed_nodes = completed;
        }
        if let Some(metadata) = update.metadata {
            merge_metadata(&mut entry.metadata, metadata);
        }

        self.write_entry(&mut entry).await?;
        Ok(entry)
    }

    /// Move the current position without executing anything. When the
    /// referenced definition's graph is resolvable the target node must exist
    /// in it; otherwise the value is accepted unvalidated.
    pub async fn jump_to_node(
        &self,
        id: &str,
        node_id: &str,
        node_name: Option<String>,
    ) -> Result<RunEntry> {
        let mut entry = self.get_run(id).await?;
        if entry.status.is_terminal() {
            return Err(WorkflowError::AlreadyTerminal(format!(
                "run '{}' is {}",
                id,
                entry.status.as_str()
            )));
        }

        let resolved_name = match self.definitions.get_or_load(&entry.workflow_def_id).await {
            Some(definition) => {
                let node = definition.graph.node(node_id).ok_or_else(|| {
                    WorkflowError::NotFound(format!(
                        "node '{}' in definition '{}'",
                        node_id, entry.workflow_def_id
                    ))
                })?;
                node.display_name().to_string()
            }
            None => node_id.to_string(),
        };

        entry.current_node_id = Some(node_id.to_string());
        entry.current_node_name = Some(node_name.unwrap_or(resolved_name));
        self.write_entry(&mut entry).await?;

        tracing::debug!("Run '{}' jumped to node '{}'", id, node_id);
        Ok(entry)
    }

    pub async fn pause(&self, id: &str) -> Result<RunEntry> {
        self.transition(id, RunStatus::Paused, |_| {}).await
    }

    pub async fn resume(&self, id: &str) -> Result<RunEntry> {
        self.transition(id, RunStatus::Running, |_| {}).await
    }

    /// Terminal success: progress forced to 100, completed node count pinned
    /// to the total, `completed_at` set.
    pub async fn complete(
        &self,
        id: &str,
        final_metadata: Option<Map<String, serde_json::Value>>,
    ) -> Result<RunEntry> {
        self.transition(id, RunStatus::Completed, move |entry| {
            entry.progress_percent = 100.0;
            entry.completed_nodes = entry.total_nodes;
            if let Some(metadata) = final_metadata {
                merge_metadata(&mut entry.metadata, metadata);
            }
        })
        .await
    }

    /// Terminal failure: records the message; the entry keeps the node it was
    /// at, and optional details land in metadata under `error_details`.
    pub async fn fail(
        &self,
        id: &str,
        error_message: &str,
        error_details: Option<serde_json::Value>,
    ) -> Result<RunEntry> {
        let error_message = error_message.to_string();
        self.transition(id, RunStatus::Failed, move |entry| {
            entry.error_message = Some(error_message);
            if let Some(details) = error_details {
                entry
                    .metadata
                    .insert("error_details".to_string(), details);
            }
        })
        .await
    }

    pub async fn cancel(&self, id: &str, reason: Option<String>) -> Result<RunEntry> {
        self.transition(id, RunStatus::Cancelled, move |entry| {
            entry.error_message = reason;
        })
        .await
    }

    /// Irreversibly delete terminal entries whose completion is older than
    /// the cutoff. Returns the number of deleted rows.
    pub async fn cleanup_old_runs(&self, older_than_days: i64) -> Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - Duration::days(older_than_days);
        let result = sqlx::query(
            r#"
            DELETE FROM active_workflows
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND completed_at IS NOT NULL
              AND completed_at < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(
                "Cleaned up {} terminal runs older than {} days",
                result.rows_affected(),
                older_than_days
            );
        }
        Ok(result.rows_affected())
    }

    /// Shared read-validate-write cycle for every status transition.
    async fn transition<F>(&self, id: &str, to: RunStatus, apply: F) -> Result<RunEntry>
    where
        F: FnOnce(&mut RunEntry),
    {
        let mut entry = self.get_run(id).await?;
        entry.status.check_transition(to)?;

        entry.status = to;
        if to.is_terminal() {
            entry.completed_at = Some(Utc::now());
        }
        apply(&mut entry);
        self.write_entry(&mut entry).await?;

        tracing::info!("Run '{}' transitioned to {}", id, to.as_str());
        Ok(entry)
    }

    /// Persist an entry guarded by its revision counter; bumps the counter on
    /// success. Zero rows affected means another source wrote first.
    async fn write_entry(&self, entry: &mut RunEntry) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE active_workflows
            SET workflow_name = ?,
                current_node_id = ?,
                current_node_name = ?,
                status = ?,
                progress_percent = ?,
                total_nodes = ?,
                completed_nodes = ?,
                completed_at = ?,
                error_message = ?,
                metadata = ?,
                revision = revision + 1
            WHERE id = ? AND revision = ?
            "#,
        )
        .bind(&entry.workflow_name)
        .bind(&entry.current_node_id)
        .bind(&entry.current_node_name)
        .bind(entry.status.as_str())
        .bind(entry.progress_percent)
        .bind(entry.total_nodes)
        .bind(entry.completed_nodes)
        .bind(entry.completed_at)
        .bind(&entry.error_message)
        .bind(serde_json::to_string(&entry.metadata)?)
        .bind(&entry.id)
        .bind(entry.revision)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WorkflowError::Conflict(format!(
                "run '{}' was modified concurrently",
                entry.id
            )));
        }
        entry.revision += 1;
        Ok(())
    }
}

fn entry_from_row(row: sqlx::sqlite::SqliteRow) -> Result<RunEntry> {
    let status: String = row.get("status");
    let source: String = row.get("source");
    let metadata: String = row.get("metadata");
    Ok(RunEntry {
        id: row.get("id"),
        workflow_def_id: row.get("workflow_def_id"),
        workflow_name: row.get("workflow_name"),
        source: CallerSource::parse(&source)?,
        project_folder: row.get("project_folder"),
        project_name: row.get("project_name"),
        current_node_id: row.get("current_node_id"),
        current_node_name: row.get("current_node_name"),
        status: RunStatus::parse(&status)?,
        progress_percent: row.get("progress_percent"),
        total_nodes: row.get("total_nodes"),
        completed_nodes: row.get("completed_nodes"),
        started_at: row.get::<DateTime<Utc>, _>("started_at"),
        completed_at: row.get::<Option<DateTime<Utc>>, _>("completed_at"),
        error_message: row.get("error_message"),
        metadata: serde_json::from_str(&metadata)?,
        revision: row.get("revision"),
    })
}
