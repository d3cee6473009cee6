/// SQLite persistence for workflow definitions
///
/// Definitions are stored whole-document: one JSON column per row, with a few
/// indexed columns (id, name, version) for lookups. Importing is append-only
/// by design — repeated imports of the same id add rows to support iterative
/// authoring, and the current definition for an id is the newest row by
/// creation time. Version strings are never compared for ordering.

use crate::error::{Result, WorkflowError};
use crate::workflow::types::{DefinitionSummary, NewDefinition, Phase, WorkflowDefinition};
use chrono::Utc;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

/// One persisted definition row, with the bookkeeping the editor needs for
/// optimistic writes.
#[derive(Debug, Clone)]
pub(crate) struct DefinitionRow {
    pub row_id: i64,
    /// Optimistic token bumped on every whole-document write
    pub revision: i64,
    pub definition: WorkflowDefinition,
}

/// SQLite-backed store of versioned definition rows
#[derive(Debug, Clone)]
pub struct DefinitionStore {
    pool: SqlitePool,
}

impl DefinitionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Initialize the definition schema. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_definitions (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                is_system INTEGER NOT NULL DEFAULT 0,
                document JSON NOT NULL,
                revision INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_workflow_definitions_id ON workflow_definitions(id, row_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Import a definition as a new row.
    ///
    /// Never create-or-fail: the same id may be imported again and again, and
    /// each import becomes the new current row. Version defaults to "1.0.0";
    /// an omitted phase list is derived from the graph in topological order.
    pub async fn import_definition(&self, new: NewDefinition) -> Result<WorkflowDefinition> {
        if new.id.trim().is_empty() || new.name.trim().is_empty() {
            return Err(WorkflowError::Validation(
                "definition id and name must not be empty".into(),
            ));
        }

        let now = Utc::now();
        let phases = match new.phases {
            Some(phases) => phases,
            None => derive_phases(&new),
        };
        let definition = WorkflowDefinition {
            id: new.id,
            name: new.name,
            description: new.description,
            version: new.version.unwrap_or_else(|| "1.0.0".to_string()),
            graph: new.graph,
            dependencies: new.dependencies,
            phases,
            tags: new.tags,
            marketplace: new.marketplace,
            source_type: new.source_type,
            source_path: new.source_path,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };

        let document = serde_json::to_string(&definition)?;
        sqlx::query(
            r#"
            INSERT INTO workflow_definitions (id, name, version, is_system, document, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.name)
        .bind(&definition.version)
        .bind(definition.is_system() as i64)
        .bind(&document)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::info!(
            "Imported definition '{}' version '{}'",
            definition.id,
            definition.version
        );

        Ok(definition)
    }

    /// The current row for an id: newest by creation, row id as tiebreak.
    pub(crate) async fn current_row(&self, id: &str) -> Result<DefinitionRow> {
        let row = sqlx::query(
            r#"
            SELECT row_id, revision, document FROM workflow_definitions
            WHERE id = ?
            ORDER BY created_at DESC, row_id DESC
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| WorkflowError::NotFound(format!("definition '{}'", id)))?;

        let document: String = row.get("document");
        Ok(DefinitionRow {
            row_id: row.get("row_id"),
            revision: row.get("revision"),
            definition: serde_json::from_str(&document)?,
        })
    }

    /// Resolve a definition. Without a version this returns the current row
    /// (creation-time resolution, preserved deliberately); with a version it
    /// returns the newest row carrying that exact version string.
    pub async fn get_definition(
        &self,
        id: &str,
        version: Option<&str>,
    ) -> Result<WorkflowDefinition> {
        let row = match version {
            None => {
                return Ok(self.current_row(id).await?.definition);
            }
            Some(version) => sqlx::query(
                r#"
                SELECT document FROM workflow_definitions
                WHERE id = ? AND version = ?
                ORDER BY created_at DESC, row_id DESC
                LIMIT 1
                "#,
            )
            .bind(id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                WorkflowError::NotFound(format!("definition '{}' version '{}'", id, version))
            })?,
        };

        let document: String = row.get("document");
        Ok(serde_json::from_str(&document)?)
    }

    /// Summaries of the current row of every definition id, ordered by name.
    /// Tag filter matches any overlap.
    pub async fn list_definitions(
        &self,
        tags: Option<&[String]>,
        is_system: Option<bool>,
    ) -> Result<Vec<DefinitionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM workflow_definitions
            WHERE row_id IN (SELECT MAX(row_id) FROM workflow_definitions GROUP BY id)
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::new();
        for row in rows {
            let document: String = row.get("document");
            let definition: WorkflowDefinition = serde_json::from_str(&document)?;
            if let Some(want_system) = is_system {
                if definition.is_system() != want_system {
                    continue;
                }
            }
            if let Some(tags) = tags {
                if !tags.is_empty() && !tags.iter().any(|t| definition.tags.contains(t)) {
                    continue;
                }
            }
            summaries.push(DefinitionSummary {
                id: definition.id,
                name: definition.name,
                description: definition.description,
                version: definition.version,
                tags: definition.tags,
                is_system: definition.source_type == crate::workflow::types::SourceType::System,
                created_at: definition.created_at,
                updated_at: definition.updated_at,
            });
        }

        Ok(summaries)
    }

    /// Current rows keyed by id, for cache initialization.
    pub async fn load_current(&self) -> Result<HashMap<String, WorkflowDefinition>> {
        let rows = sqlx::query(
            r#"
            SELECT document FROM workflow_definitions
            WHERE row_id IN (SELECT MAX(row_id) FROM workflow_definitions GROUP BY id)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut current = HashMap::new();
        for row in rows {
            let document: String = row.get("document");
            let definition: WorkflowDefinition = serde_json::from_str(&document)?;
            current.insert(definition.id.clone(), definition);
        }
        Ok(current)
    }

    /// Delete every row of a definition id. Refused while any version of the
    /// id is locked by an executing instance.
    pub async fn delete_definition(&self, id: &str) -> Result<u64> {
        let locked: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM version_locks WHERE workflow_def_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        if locked > 0 {
            return Err(WorkflowError::Conflict(format!(
                "definition '{}' has locked versions",
                id
            )));
        }

        let result = sqlx::query("DELETE FROM workflow_definitions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WorkflowError::NotFound(format!("definition '{}'", id)));
        }

        tracing::info!("Deleted definition '{}' ({} rows)", id, result.rows_affected());
        Ok(result.rows_affected())
    }

    /// Write back a mutated current document, guarded by the revision token.
    /// Zero rows affected means another editor won the race.
    pub(crate) async fn write_current(
        &self,
        row_id: i64,
        expected_revision: i64,
        definition: &WorkflowDefinition,
    ) -> Result<()> {
        let document = serde_json::to_string(definition)?;
        let result = sqlx::query(
            r#"
            UPDATE workflow_definitions
            SET document = ?,
                name = ?,
                version = ?,
                revision = revision + 1,
                updated_at = ?
            WHERE row_id = ? AND revision = ?
            "#,
        )
        .bind(&document)
        .bind(&definition.name)
        .bind(&definition.version)
        .bind(definition.updated_at.to_rfc3339())
        .bind(row_id)
        .bind(expected_revision)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WorkflowError::Conflict(format!(
                "definition '{}' was modified concurrently",
                definition.id
            )));
        }
        Ok(())
    }
}

/// Derive the linear phase list from the graph when an import omits it.
fn derive_phases(new: &NewDefinition) -> Vec<Phase> {
    new.graph
        .linear_order()
        .into_iter()
        .enumerate()
        .map(|(i, node_id)| {
            let name = new
                .graph
                .node(&node_id)
                .map(|n| n.display_name().to_string())
                .unwrap_or_else(|| node_id.clone());
            Phase {
                number: (i + 1) as u32,
                node_id,
                name,
            }
        })
        .collect()
}
