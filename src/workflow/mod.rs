/// Workflow definition layer
///
/// Graph model, versioned definition storage, the lock-free current-definition
/// cache, version snapshots and locks, the whole-document graph editor, and
/// sub-workflow linkage.

pub mod cache;
pub mod editor;
pub mod graph;
pub mod store;
pub mod subworkflow;
pub mod types;
pub mod versions;

pub use cache::DefinitionCache;
pub use editor::GraphEditor;
pub use graph::{Edge, EdgeType, EdgeUpdate, Graph, Node, NodeType, NodeUpdate};
pub use store::DefinitionStore;
pub use subworkflow::{SubWorkflowCoordinator, SubWorkflowExecution, SubWorkflowStatus};
pub use types::{
    Dependencies, DefinitionSummary, NewDefinition, Phase, SourceType, VersionLock,
    VersionSnapshot, WorkflowDefinition,
};
pub use versions::VersionController;
