/// Workflow definition types
///
/// A definition is a named, versioned template describing a directed graph of
/// content-production phases. Definitions are serialized to JSON and stored
/// whole-document; successive imports for one id append rows rather than
/// replacing them, and "the current definition" is the most recently created
/// row (never the highest version string).

use crate::workflow::graph::Graph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a definition came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    /// Shipped with the platform
    System,
    /// Authored by a user in the builder UI
    #[default]
    User,
    /// Imported from a definition file
    File,
    /// Installed from the marketplace
    Marketplace,
}

/// Structured references to the external capabilities a definition requires
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub integrations: Vec<String>,
    /// Ids of definitions invoked as nested workflows
    #[serde(default)]
    pub sub_workflows: Vec<String>,
}

/// One entry of the ordered phase list kept alongside the graph for linear
/// consumers (progress bars, chat summaries)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// 1-based position
    pub number: u32,
    /// Graph node this phase mirrors
    pub node_id: String,
    /// Display name
    pub name: String,
}

/// A complete workflow definition document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Stable slug shared by every import of this workflow (e.g., "novel-chapter")
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Free-form version string; not guaranteed to order as semver
    pub version: String,
    pub graph: Graph,
    #[serde(default)]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Marketplace listing payload, opaque to this core
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace: Option<Value>,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn is_system(&self) -> bool {
        self.source_type == SourceType::System
    }
}

/// Caller-supplied payload for importing a definition
#[derive(Debug, Clone, Deserialize)]
pub struct NewDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Defaults to "1.0.0" when omitted
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub graph: Graph,
    #[serde(default)]
    pub dependencies: Dependencies,
    /// When omitted, derived from the graph by topological order
    #[serde(default)]
    pub phases: Option<Vec<Phase>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub marketplace: Option<Value>,
    #[serde(default)]
    pub source_type: SourceType,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// Listing row for `list_definitions`
#[derive(Debug, Clone, Serialize)]
pub struct DefinitionSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub tags: Vec<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable snapshot of a (definition id, version) pair
#[derive(Debug, Clone, Serialize)]
pub struct VersionSnapshot {
    pub workflow_def_id: String,
    pub version: String,
    /// Full definition payload at snapshot time
    pub definition: Value,
    pub changelog: Option<String>,
    pub parent_version: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An exclusive claim on one (definition id, version) pair
#[derive(Debug, Clone, Serialize)]
pub struct VersionLock {
    pub workflow_def_id: String,
    pub version: String,
    /// Executing instance holding the claim
    pub instance_id: String,
    pub locked_at: DateTime<Utc>,
}
