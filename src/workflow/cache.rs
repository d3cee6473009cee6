/// Lock-free cache of current definitions using ArcSwap
///
/// Readers (the active-run registry resolving names and node counts, jump
/// validation) take a lock-free snapshot of the map; writers swap the whole
/// pointer after imports, graph edits, and deletes. Storage stays the source
/// of truth — a cache miss falls through to the store.

use crate::error::Result;
use crate::workflow::{store::DefinitionStore, types::WorkflowDefinition};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Atomic pointer to the id → current-definition map
#[derive(Debug)]
pub struct DefinitionCache {
    definitions: ArcSwap<HashMap<String, Arc<WorkflowDefinition>>>,
    store: DefinitionStore,
}

impl DefinitionCache {
    pub fn new(store: DefinitionStore) -> Self {
        Self {
            definitions: ArcSwap::new(Arc::new(HashMap::new())),
            store,
        }
    }

    /// Populate the cache from storage. Called once during startup.
    pub async fn init_from_store(&self) -> Result<()> {
        let current = self.store.load_current().await?;
        let map: HashMap<String, Arc<WorkflowDefinition>> = current
            .into_iter()
            .map(|(id, def)| (id, Arc::new(def)))
            .collect();
        let count = map.len();
        self.definitions.store(Arc::new(map));
        tracing::info!("Initialized definition cache with {} definitions", count);
        Ok(())
    }

    /// Reload one id's current row from storage and swap it in.
    pub async fn refresh(&self, id: &str) -> Result<()> {
        let definition = self.store.get_definition(id, None).await?;
        let current = self.definitions.load();
        let mut updated = (**current).clone();
        updated.insert(id.to_string(), Arc::new(definition));
        self.definitions.store(Arc::new(updated));
        tracing::debug!("Refreshed cached definition '{}'", id);
        Ok(())
    }

    /// Drop an id from the cache (after delete).
    pub fn remove(&self, id: &str) {
        let current = self.definitions.load();
        if current.contains_key(id) {
            let mut updated = (**current).clone();
            updated.remove(id);
            self.definitions.store(Arc::new(updated));
        }
    }

    /// Lock-free read of an id's current definition.
    pub fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.load().get(id).cloned()
    }

    /// Cached definition, falling back to storage on a miss.
    pub async fn get_or_load(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        if let Some(definition) = self.get(id) {
            return Some(definition);
        }
        match self.store.get_definition(id, None).await {
            Ok(definition) => {
                let definition = Arc::new(definition);
                let current = self.definitions.load();
                let mut updated = (**current).clone();
                updated.insert(id.to_string(), Arc::clone(&definition));
                self.definitions.store(Arc::new(updated));
                Some(definition)
            }
            Err(_) => None,
        }
    }
}
