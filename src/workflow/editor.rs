/// Structural mutation of a definition's current graph
///
/// Every operation is a whole-document read-modify-write: load the current
/// row, apply the change in memory through the `Graph` methods, write the
/// document back guarded by the row's revision token. A write that loses the
/// race fails `Conflict` instead of silently overwriting another editor.
///
/// When lock enforcement is on, a held version lock on the current row's
/// version blocks mutation, so a definition an active instance pinned cannot
/// be restructured underneath it.

use crate::error::{Result, WorkflowError};
use crate::workflow::{
    cache::DefinitionCache,
    graph::{Edge, EdgeUpdate, Node, NodeUpdate},
    store::DefinitionStore,
    types::WorkflowDefinition,
    versions::VersionController,
};
use chrono::Utc;
use std::sync::Arc;

/// Whole-document graph editor over the definition store
#[derive(Debug, Clone)]
pub struct GraphEditor {
    store: DefinitionStore,
    versions: VersionController,
    cache: Arc<DefinitionCache>,
    enforce_locks: bool,
}

impl GraphEditor {
    pub fn new(
        store: DefinitionStore,
        versions: VersionController,
        cache: Arc<DefinitionCache>,
        enforce_locks: bool,
    ) -> Self {
        Self {
            store,
            versions,
            cache,
            enforce_locks,
        }
    }

    pub async fn add_node(&self, def_id: &str, node: Node) -> Result<WorkflowDefinition> {
        let node_id = node.id.clone();
        let definition = self
            .mutate(def_id, |def| def.graph.add_node(node))
            .await?;
        tracing::debug!("Added node '{}' to definition '{}'", node_id, def_id);
        Ok(definition)
    }

    pub async fn update_node(
        &self,
        def_id: &str,
        node_id: &str,
        update: NodeUpdate,
    ) -> Result<WorkflowDefinition> {
        self.mutate(def_id, |def| def.graph.update_node(node_id, update))
            .await
    }

    pub async fn delete_node(&self, def_id: &str, node_id: &str) -> Result<WorkflowDefinition> {
        let definition = self
            .mutate(def_id, |def| def.graph.delete_node(node_id))
            .await?;
        tracing::debug!("Deleted node '{}' from definition '{}'", node_id, def_id);
        Ok(definition)
    }

    pub async fn create_edge(&self, def_id: &str, edge: Edge) -> Result<WorkflowDefinition> {
        self.mutate(def_id, |def| def.graph.create_edge(edge)).await
    }

    pub async fn update_edge(
        &self,
        def_id: &str,
        edge_id: &str,
        update: EdgeUpdate,
    ) -> Result<WorkflowDefinition> {
        self.mutate(def_id, |def| def.graph.update_edge(edge_id, update))
            .await
    }

    pub async fn delete_edge(&self, def_id: &str, edge_id: &str) -> Result<WorkflowDefinition> {
        self.mutate(def_id, |def| def.graph.delete_edge(edge_id))
            .await
    }

    /// The read-modify-write cycle shared by every edit.
    async fn mutate<F>(&self, def_id: &str, apply: F) -> Result<WorkflowDefinition>
    where
        F: FnOnce(&mut WorkflowDefinition) -> Result<()>,
    {
        let row = self.store.current_row(def_id).await?;

        if self.enforce_locks {
            if let Some(lock) = self
                .versions
                .lock_holder(def_id, &row.definition.version)
                .await?
            {
                return Err(WorkflowError::Conflict(format!(
                    "definition '{}' version '{}' is locked by instance '{}'",
                    def_id, row.definition.version, lock.instance_id
                )));
            }
        }

        let mut definition = row.definition;
        apply(&mut definition)?;
        definition.updated_at = Utc::now();

        self.store
            .write_current(row.row_id, row.revision, &definition)
            .await?;
        self.cache.refresh(def_id).await?;

        Ok(definition)
    }
}
