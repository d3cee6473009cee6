/// Version snapshots and exclusive version locks
///
/// Snapshots are immutable, explicitly-created records of a (definition id,
/// version) payload — deliberately separate from the mutable current row the
/// editor works on. Mutating the graph never snapshots implicitly.
///
/// Locks are the one mutual-exclusion primitive in this core. Acquisition is
/// a single unique-constraint-backed insert, never read-then-write.

use crate::error::{Result, WorkflowError};
use crate::workflow::types::{VersionLock, VersionSnapshot};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};

/// Immutable version history plus the lock table
#[derive(Debug, Clone)]
pub struct VersionController {
    pool: SqlitePool,
}

impl VersionController {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize snapshot and lock schemas. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_versions (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                workflow_def_id TEXT NOT NULL,
                version TEXT NOT NULL,
                definition JSON NOT NULL,
                changelog TEXT,
                parent_version TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (workflow_def_id, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS version_locks (
                workflow_def_id TEXT NOT NULL,
                version TEXT NOT NULL,
                instance_id TEXT NOT NULL,
                locked_at TEXT NOT NULL,
                PRIMARY KEY (workflow_def_id, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record an immutable snapshot of a definition payload under a version.
    /// Re-snapshotting an existing (id, version) key fails `Conflict`; the
    /// version table is the audit trail.
    pub async fn create_version(
        &self,
        workflow_def_id: &str,
        version: &str,
        definition: Value,
        changelog: Option<String>,
        parent_version: Option<String>,
        created_by: Option<String>,
    ) -> Result<VersionSnapshot> {
        if workflow_def_id.trim().is_empty() || version.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "definition id and version must not be empty".into(),
            ));
        }

        let created_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_versions
                (workflow_def_id, version, definition, changelog, parent_version, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (workflow_def_id, version) DO NOTHING
            "#,
        )
        .bind(workflow_def_id)
        .bind(version)
        .bind(serde_json::to_string(&definition)?)
        .bind(&changelog)
        .bind(&parent_version)
        .bind(&created_by)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WorkflowError::Conflict(format!(
                "version '{}' of definition '{}' already exists",
                version, workflow_def_id
            )));
        }

        tracing::info!(
            "Created version snapshot '{}' for definition '{}'",
            version,
            workflow_def_id
        );

        Ok(VersionSnapshot {
            workflow_def_id: workflow_def_id.to_string(),
            version: version.to_string(),
            definition,
            changelog,
            parent_version,
            created_by,
            created_at,
        })
    }

    /// Version history for a definition id, ordered by creation.
    pub async fn list_versions(&self, workflow_def_id: &str) -> Result<Vec<VersionSnapshot>> {
        let rows = sqlx::query(
            r#"
            SELECT workflow_def_id, version, definition, changelog, parent_version, created_by, created_at
            FROM workflow_versions
            WHERE workflow_def_id = ?
            ORDER BY row_id ASC
            "#,
        )
        .bind(workflow_def_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(snapshot_from_row).collect()
    }

    /// Exact pinned-version lookup.
    pub async fn get_version(
        &self,
        workflow_def_id: &str,
        version: &str,
    ) -> Result<VersionSnapshot> {
        let row = sqlx::query(
            r#"
            SELECT workflow_def_id, version, definition, changelog, parent_version, created_by, created_at
            FROM workflow_versions
            WHERE workflow_def_id = ? AND version = ?
            "#,
        )
        .bind(workflow_def_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            WorkflowError::NotFound(format!(
                "version '{}' of definition '{}'",
                version, workflow_def_id
            ))
        })?;

        snapshot_from_row(row)
    }

    /// Acquire the exclusive lock on (id, version) for an instance.
    ///
    /// Atomic: the insert either takes the row or touches nothing. Re-locking
    /// by the current holder succeeds idempotently; any other holder fails
    /// `Conflict`.
    pub async fn lock_version(
        &self,
        workflow_def_id: &str,
        version: &str,
        instance_id: &str,
    ) -> Result<VersionLock> {
        let locked_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO version_locks (workflow_def_id, version, instance_id, locked_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (workflow_def_id, version) DO NOTHING
            "#,
        )
        .bind(workflow_def_id)
        .bind(version)
        .bind(instance_id)
        .bind(locked_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let holder = self.lock_holder(workflow_def_id, version).await?;
            return match holder {
                Some(lock) if lock.instance_id == instance_id => Ok(lock),
                Some(lock) => Err(WorkflowError::Conflict(format!(
                    "version '{}' of definition '{}' is locked by instance '{}'",
                    version, workflow_def_id, lock.instance_id
                ))),
                None => Err(WorkflowError::Conflict(format!(
                    "lock on version '{}' of definition '{}' changed concurrently",
                    version, workflow_def_id
                ))),
            };
        }

        tracing::info!(
            "Instance '{}' locked version '{}' of definition '{}'",
            instance_id,
            version,
            workflow_def_id
        );

        Ok(VersionLock {
            workflow_def_id: workflow_def_id.to_string(),
            version: version.to_string(),
            instance_id: instance_id.to_string(),
            locked_at,
        })
    }

    /// Release the lock. Fails `LockNotHeld` unless `instance_id` is the
    /// current holder (including when no lock exists at all).
    pub async fn unlock_version(
        &self,
        workflow_def_id: &str,
        version: &str,
        instance_id: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM version_locks WHERE workflow_def_id = ? AND version = ? AND instance_id = ?",
        )
        .bind(workflow_def_id)
        .bind(version)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WorkflowError::LockNotHeld(format!(
                "instance '{}' does not hold the lock on version '{}' of definition '{}'",
                instance_id, version, workflow_def_id
            )));
        }

        tracing::info!(
            "Instance '{}' unlocked version '{}' of definition '{}'",
            instance_id,
            version,
            workflow_def_id
        );
        Ok(())
    }

    /// Current lock on (id, version), if any. Used by the editor's
    /// lock-enforcement path.
    pub async fn lock_holder(
        &self,
        workflow_def_id: &str,
        version: &str,
    ) -> Result<Option<VersionLock>> {
        let row = sqlx::query(
            r#"
            SELECT workflow_def_id, version, instance_id, locked_at
            FROM version_locks
            WHERE workflow_def_id = ? AND version = ?
            "#,
        )
        .bind(workflow_def_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| VersionLock {
            workflow_def_id: row.get("workflow_def_id"),
            version: row.get("version"),
            instance_id: row.get("instance_id"),
            locked_at: row.get::<DateTime<Utc>, _>("locked_at"),
        }))
    }
}

fn snapshot_from_row(row: sqlx::sqlite::SqliteRow) -> Result<VersionSnapshot> {
    let definition: String = row.get("definition");
    Ok(VersionSnapshot {
        workflow_def_id: row.get("workflow_def_id"),
        version: row.get("version"),
        definition: serde_json::from_str(&definition)?,
        changelog: row.get("changelog"),
        parent_version: row.get("parent_version"),
        created_by: row.get("created_by"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}
