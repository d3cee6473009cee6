/// Storyloom workflow core
///
/// Defines, versions, and tracks execution of the multi-phase workflows that
/// drive the content-production pipeline. Callers from the interactive UI,
/// the agent runtime, and the chat client import definitions, edit their
/// graphs, pin and lock versions, nest sub-workflows, and report run progress
/// through the active workflow registry. How a phase's work is actually
/// performed is owned by external executors; this crate owns the state.

// Core configuration and setup
pub mod config;

// Crate-wide error taxonomy
pub mod error;

// Workflow definition layer - graph model, versioned storage, editor, locks
pub mod workflow;

// Active run registry - the runtime state machine across calling sources
pub mod registry;

// HTTP API layer - one structured call per core operation
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{Result, WorkflowError};
pub use registry::{ActiveWorkflowRegistry, CallerSource, RunEntry, RunStatus};
pub use server::start_server;
pub use workflow::{
    DefinitionCache, DefinitionStore, Edge, EdgeType, Graph, GraphEditor, Node, NodeType,
    SubWorkflowCoordinator, VersionController, WorkflowDefinition,
};
