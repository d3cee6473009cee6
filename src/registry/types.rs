/// Active-run types: the registry entry shape, the caller-source vocabulary,
/// and the run status state machine
///
/// The state machine is the one place transition legality is decided; the
/// storage layer only persists what it approves.

use crate::error::{Result, WorkflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which runtime is driving a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallerSource {
    Ui,
    AgentRuntime,
    ChatClient,
}

impl CallerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            CallerSource::Ui => "ui",
            CallerSource::AgentRuntime => "agent-runtime",
            CallerSource::ChatClient => "chat-client",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ui" => Ok(CallerSource::Ui),
            "agent-runtime" => Ok(CallerSource::AgentRuntime),
            "chat-client" => Ok(CallerSource::ChatClient),
            other => Err(WorkflowError::Validation(format!(
                "unknown caller source '{}'",
                other
            ))),
        }
    }
}

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(RunStatus::Running),
            "paused" => Ok(RunStatus::Paused),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(WorkflowError::Validation(format!(
                "unknown run status '{}'",
                other
            ))),
        }
    }

    /// Transition table:
    /// running → paused (pause), paused → running (resume),
    /// {running, paused} → completed | failed | cancelled.
    /// Anything else is refused: from a terminal state as `AlreadyTerminal`,
    /// otherwise as `InvalidTransition`.
    pub fn check_transition(self, to: RunStatus) -> Result<()> {
        let allowed = matches!(
            (self, to),
            (RunStatus::Running, RunStatus::Paused)
                | (RunStatus::Paused, RunStatus::Running)
                | (
                    RunStatus::Running | RunStatus::Paused,
                    RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
                )
        );
        if allowed {
            return Ok(());
        }
        if self.is_terminal() {
            Err(WorkflowError::AlreadyTerminal(format!(
                "run is already {}",
                self.as_str()
            )))
        } else {
            Err(WorkflowError::InvalidTransition(format!(
                "cannot go from {} to {}",
                self.as_str(),
                to.as_str()
            )))
        }
    }
}

/// One entry of the active workflow registry: the runtime ledger row for a
/// single in-flight (or finished) workflow instance.
#[derive(Debug, Clone, Serialize)]
pub struct RunEntry {
    pub id: String,
    pub workflow_def_id: String,
    /// Denormalized from the definition at registration
    pub workflow_name: String,
    pub source: CallerSource,
    pub project_folder: Option<String>,
    pub project_name: Option<String>,
    pub current_node_id: Option<String>,
    pub current_node_name: Option<String>,
    pub status: RunStatus,
    /// Always within [0, 100]
    pub progress_percent: f64,
    pub total_nodes: i64,
    pub completed_nodes: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Open key-value bag, shallow-merged on update
    pub metadata: Map<String, Value>,
    /// Per-entry optimistic counter, bumped on every write
    pub revision: i64,
}

/// Registration payload. `workflow_name` and `total_nodes` are resolved from
/// the definition when omitted.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRun {
    pub workflow_def_id: String,
    #[serde(default)]
    pub workflow_name: Option<String>,
    pub source: CallerSource,
    #[serde(default)]
    pub project_folder: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub total_nodes: Option<i64>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Progress/position update payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub current_node_name: Option<String>,
    #[serde(default)]
    pub progress_percent: Option<f64>,
    #[serde(default)]
    pub completed_nodes: Option<i64>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

/// Clamp a reported progress value into [0, 100]. Non-finite input collapses
/// to 0.
pub fn clamp_progress(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Shallow per-key merge: keys present in `updates` overwrite, everything
/// else is preserved. Last write wins per key; no conflict detection.
pub fn merge_metadata(existing: &mut Map<String, Value>, updates: Map<String, Value>) {
    for (key, value) in updates {
        existing.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_starts_running() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_pause_only_from_running() {
        assert!(RunStatus::Running.check_transition(RunStatus::Paused).is_ok());
        let err = RunStatus::Paused
            .check_transition(RunStatus::Paused)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition(_)));
    }

    #[test]
    fn test_resume_only_from_paused() {
        assert!(RunStatus::Paused.check_transition(RunStatus::Running).is_ok());
        let err = RunStatus::Running
            .check_transition(RunStatus::Running)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition(_)));
    }

    #[test]
    fn test_terminal_from_running_or_paused() {
        for to in [RunStatus::Completed, RunStatus::Failed, RunStatus::Cancelled] {
            assert!(RunStatus::Running.check_transition(to).is_ok());
            assert!(RunStatus::Paused.check_transition(to).is_ok());
        }
    }

    #[test]
    fn test_repeat_terminal_is_already_terminal() {
        for from in [RunStatus::Completed, RunStatus::Failed, RunStatus::Cancelled] {
            let err = from.check_transition(RunStatus::Completed).unwrap_err();
            assert!(matches!(err, WorkflowError::AlreadyTerminal(_)));
            let err = from.check_transition(RunStatus::Paused).unwrap_err();
            assert!(matches!(err, WorkflowError::AlreadyTerminal(_)));
        }
    }

    #[test]
    fn test_clamp_progress_bounds() {
        assert_eq!(clamp_progress(150.0), 100.0);
        assert_eq!(clamp_progress(-5.0), 0.0);
        assert_eq!(clamp_progress(42.5), 42.5);
        assert_eq!(clamp_progress(f64::NAN), 0.0);
    }

    #[test]
    fn test_metadata_merge_preserves_and_overwrites() {
        let mut meta = Map::new();
        meta.insert("a".to_string(), json!(1));

        let mut update = Map::new();
        update.insert("b".to_string(), json!(2));
        merge_metadata(&mut meta, update);
        assert_eq!(meta.get("a"), Some(&json!(1)));
        assert_eq!(meta.get("b"), Some(&json!(2)));

        let mut update = Map::new();
        update.insert("a".to_string(), json!(3));
        merge_metadata(&mut meta, update);
        assert_eq!(meta.get("a"), Some(&json!(3)));
        assert_eq!(meta.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_source_wire_names() {
        assert_eq!(
            serde_json::to_value(CallerSource::AgentRuntime).unwrap(),
            json!("agent-runtime")
        );
        assert_eq!(CallerSource::parse("chat-client").unwrap(), CallerSource::ChatClient);
        assert!(CallerSource::parse("cron").is_err());
    }
}
