/// Active workflow registry layer
///
/// The runtime state machine tracking every in-flight instance across calling
/// sources, plus the pure transition/merge logic it is built on.

pub mod store;
pub mod types;

pub use store::ActiveWorkflowRegistry;
pub use types::{CallerSource, ProgressUpdate, RegisterRun, RunEntry, RunStatus};
