/// End-to-end tests for the workflow core against an in-memory SQLite
/// database. A single-connection pool is used so every query sees the same
/// memory database.

use serde_json::{json, Map};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;
use storyloom::registry::types::{ProgressUpdate, RegisterRun};
use storyloom::registry::{ActiveWorkflowRegistry, CallerSource, RunStatus};
use storyloom::workflow::graph::{Edge, EdgeType, Node, NodeType, NodeUpdate};
use storyloom::workflow::types::NewDefinition;
use storyloom::workflow::{
    DefinitionCache, DefinitionStore, GraphEditor, SubWorkflowCoordinator, SubWorkflowStatus,
    VersionController,
};
use storyloom::WorkflowError;

struct Core {
    pool: SqlitePool,
    store: DefinitionStore,
    versions: VersionController,
    editor: GraphEditor,
    subworkflows: SubWorkflowCoordinator,
    registry: ActiveWorkflowRegistry,
}

async fn core() -> Core {
    core_with_locks(true).await
}

async fn core_with_locks(enforce_locks: bool) -> Core {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    let store = DefinitionStore::new(pool.clone());
    let versions = VersionController::new(pool.clone());
    let subworkflows = SubWorkflowCoordinator::new(pool.clone());
    store.init_schema().await.unwrap();
    versions.init_schema().await.unwrap();
    subworkflows.init_schema().await.unwrap();

    let cache = Arc::new(DefinitionCache::new(store.clone()));
    cache.init_from_store().await.unwrap();

    let registry = ActiveWorkflowRegistry::new(pool.clone(), Arc::clone(&cache));
    registry.init_schema().await.unwrap();

    let editor = GraphEditor::new(
        store.clone(),
        versions.clone(),
        Arc::clone(&cache),
        enforce_locks,
    );

    Core {
        pool,
        store,
        versions,
        editor,
        subworkflows,
        registry,
    }
}

fn node(id: &str, node_type: NodeType, name: &str) -> Node {
    Node {
        id: id.to_string(),
        node_type,
        data: json!({ "name": name }),
    }
}

fn edge(id: &str, source: &str, target: &str) -> Edge {
    Edge {
        id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        edge_type: EdgeType::Default,
        label: None,
        condition: None,
    }
}

fn pipeline_x() -> NewDefinition {
    let mut definition: NewDefinition = serde_json::from_value(json!({
        "id": "pipeline-x",
        "name": "Pipeline X",
        "description": "Three-phase drafting pipeline",
        "tags": ["drafting"]
    }))
    .unwrap();
    definition.graph.add_node(node("n1", NodeType::Planning, "Outline")).unwrap();
    definition.graph.add_node(node("n2", NodeType::Writing, "Draft")).unwrap();
    definition.graph.add_node(node("n3", NodeType::Gate, "Review")).unwrap();
    definition.graph.create_edge(edge("e1", "n1", "n2")).unwrap();
    definition.graph.create_edge(edge("e2", "n2", "n3")).unwrap();
    definition
}

#[tokio::test]
async fn test_import_defaults_version_and_derives_phases() {
    let core = core().await;
    let imported = core.store.import_definition(pipeline_x()).await.unwrap();

    assert_eq!(imported.version, "1.0.0");
    let phase_nodes: Vec<&str> = imported.phases.iter().map(|p| p.node_id.as_str()).collect();
    assert_eq!(phase_nodes, vec!["n1", "n2", "n3"]);
    assert_eq!(imported.phases[0].number, 1);
    assert_eq!(imported.phases[0].name, "Outline");
}

#[tokio::test]
async fn test_import_rejects_empty_id() {
    let core = core().await;
    let mut bad = pipeline_x();
    bad.id = "".to_string();
    let err = core.store.import_definition(bad).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));
}

#[tokio::test]
async fn test_latest_resolution_is_by_creation_not_version() {
    let core = core().await;
    let mut first = pipeline_x();
    first.version = Some("9.0.0".to_string());
    core.store.import_definition(first).await.unwrap();

    let mut second = pipeline_x();
    second.version = Some("2.0.0".to_string());
    second.name = "Pipeline X (rework)".to_string();
    core.store.import_definition(second).await.unwrap();

    // Newest row wins even though its version string compares lower.
    let current = core.store.get_definition("pipeline-x", None).await.unwrap();
    assert_eq!(current.version, "2.0.0");
    assert_eq!(current.name, "Pipeline X (rework)");

    // Pinned lookup still reaches the older row.
    let pinned = core
        .store
        .get_definition("pipeline-x", Some("9.0.0"))
        .await
        .unwrap();
    assert_eq!(pinned.version, "9.0.0");

    let err = core
        .store
        .get_definition("pipeline-x", Some("3.3.3"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

#[tokio::test]
async fn test_list_definitions_latest_per_id_ordered_by_name() {
    let core = core().await;
    let mut zeta = pipeline_x();
    zeta.id = "zeta".to_string();
    zeta.name = "Zeta".to_string();
    zeta.tags = vec!["reporting".to_string()];
    core.store.import_definition(zeta).await.unwrap();
    core.store.import_definition(pipeline_x()).await.unwrap();
    let mut again = pipeline_x();
    again.version = Some("1.1.0".to_string());
    core.store.import_definition(again).await.unwrap();

    let all = core.store.list_definitions(None, None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].name, "Pipeline X");
    assert_eq!(all[0].version, "1.1.0");
    assert_eq!(all[1].name, "Zeta");

    let tagged = core
        .store
        .list_definitions(Some(&["reporting".to_string()]), None)
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].id, "zeta");

    let system_only = core.store.list_definitions(None, Some(true)).await.unwrap();
    assert!(system_only.is_empty());
}

#[tokio::test]
async fn test_graph_edit_scenario_with_cascade() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();

    core.editor
        .add_node("pipeline-x", node("n4", NodeType::Writing, "Epilogue"))
        .await
        .unwrap();
    core.editor
        .create_edge("pipeline-x", edge("e3", "n3", "n4"))
        .await
        .unwrap();
    let after = core.editor.delete_node("pipeline-x", "n3").await.unwrap();

    let ids: Vec<&str> = after.graph.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["n1", "n2", "n4"]);
    assert!(after
        .graph
        .edges
        .iter()
        .all(|e| e.source != "n3" && e.target != "n3"));

    // The persisted document matches what the editor returned.
    let stored = core.store.get_definition("pipeline-x", None).await.unwrap();
    assert_eq!(stored.graph.nodes.len(), 3);
    assert_eq!(stored.graph.edges.len(), 1);
}

#[tokio::test]
async fn test_editor_rejects_duplicates_and_missing_endpoints() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();

    let err = core
        .editor
        .add_node("pipeline-x", node("n1", NodeType::Code, "Dup"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    let err = core
        .editor
        .create_edge("pipeline-x", edge("e9", "n1", "ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::EndpointNotFound(_)));

    let err = core
        .editor
        .update_node("pipeline-x", "ghost", NodeUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));

    let err = core
        .editor
        .add_node("missing-def", node("n1", NodeType::Code, "X"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

#[tokio::test]
async fn test_version_snapshots_are_separate_from_current_row() {
    let core = core().await;
    let imported = core.store.import_definition(pipeline_x()).await.unwrap();
    let payload = serde_json::to_value(&imported).unwrap();

    core.versions
        .create_version(
            "pipeline-x",
            "1.0.0",
            payload,
            Some("initial".to_string()),
            None,
            Some("astrid".to_string()),
        )
        .await
        .unwrap();

    // Snapshotting the same key again is refused.
    let err = core
        .versions
        .create_version("pipeline-x", "1.0.0", json!({}), None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    // Graph mutation does not touch the snapshot.
    core.editor
        .add_node("pipeline-x", node("n4", NodeType::Code, "Extra"))
        .await
        .unwrap();
    let snapshot = core.versions.get_version("pipeline-x", "1.0.0").await.unwrap();
    let snapshot_nodes = snapshot.definition["graph"]["nodes"].as_array().unwrap();
    assert_eq!(snapshot_nodes.len(), 3);

    let history = core.versions.list_versions("pipeline-x").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].changelog.as_deref(), Some("initial"));
}

#[tokio::test]
async fn test_lock_exclusivity_and_idempotent_relock() {
    let core = core().await;

    core.versions
        .lock_version("pipeline-x", "1.0.0", "instance-a")
        .await
        .unwrap();
    // Re-lock by the same holder succeeds idempotently.
    core.versions
        .lock_version("pipeline-x", "1.0.0", "instance-a")
        .await
        .unwrap();

    let err = core
        .versions
        .lock_version("pipeline-x", "1.0.0", "instance-b")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    let err = core
        .versions
        .unlock_version("pipeline-x", "1.0.0", "instance-b")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::LockNotHeld(_)));

    core.versions
        .unlock_version("pipeline-x", "1.0.0", "instance-a")
        .await
        .unwrap();
    // Unlocking twice fails: no lock is held anymore.
    let err = core
        .versions
        .unlock_version("pipeline-x", "1.0.0", "instance-a")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::LockNotHeld(_)));

    // Freed lock is acquirable by the other instance.
    core.versions
        .lock_version("pipeline-x", "1.0.0", "instance-b")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_lock_blocks_graph_mutation_when_enforced() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();

    core.versions
        .lock_version("pipeline-x", "1.0.0", "instance-a")
        .await
        .unwrap();

    let err = core
        .editor
        .add_node("pipeline-x", node("n4", NodeType::Code, "Blocked"))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    core.versions
        .unlock_version("pipeline-x", "1.0.0", "instance-a")
        .await
        .unwrap();
    core.editor
        .add_node("pipeline-x", node("n4", NodeType::Code, "Unblocked"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_lock_does_not_block_mutation_when_enforcement_off() {
    let core = core_with_locks(false).await;
    core.store.import_definition(pipeline_x()).await.unwrap();
    core.versions
        .lock_version("pipeline-x", "1.0.0", "instance-a")
        .await
        .unwrap();

    core.editor
        .add_node("pipeline-x", node("n4", NodeType::Code, "Legacy"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_delete_definition_refused_while_locked() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();
    core.versions
        .lock_version("pipeline-x", "1.0.0", "instance-a")
        .await
        .unwrap();

    let err = core.store.delete_definition("pipeline-x").await.unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    core.versions
        .unlock_version("pipeline-x", "1.0.0", "instance-a")
        .await
        .unwrap();
    core.store.delete_definition("pipeline-x").await.unwrap();
    let err = core.store.get_definition("pipeline-x", None).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

fn register_pipeline_x() -> RegisterRun {
    RegisterRun {
        workflow_def_id: "pipeline-x".to_string(),
        workflow_name: None,
        source: CallerSource::AgentRuntime,
        project_folder: None,
        project_name: None,
        total_nodes: None,
        metadata: None,
    }
}

#[tokio::test]
async fn test_register_resolves_name_and_total_from_definition() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();

    let run = core.registry.register(register_pipeline_x()).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.progress_percent, 0.0);
    assert_eq!(run.workflow_name, "Pipeline X");
    assert_eq!(run.total_nodes, 3);
    assert!(run.completed_at.is_none());
}

#[tokio::test]
async fn test_register_unknown_definition_needs_explicit_name() {
    let core = core().await;

    let err = core.registry.register(register_pipeline_x()).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));

    let run = core
        .registry
        .register(RegisterRun {
            workflow_def_id: "external-def".to_string(),
            workflow_name: Some("External".to_string()),
            source: CallerSource::ChatClient,
            project_folder: None,
            project_name: None,
            total_nodes: Some(7),
            metadata: None,
        })
        .await
        .unwrap();
    assert_eq!(run.total_nodes, 7);
}

#[tokio::test]
async fn test_run_lifecycle_transitions() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();
    let run = core.registry.register(register_pipeline_x()).await.unwrap();

    core.registry.pause(&run.id).await.unwrap();
    let err = core.registry.pause(&run.id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition(_)));

    core.registry.resume(&run.id).await.unwrap();
    let err = core.registry.resume(&run.id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidTransition(_)));

    let completed = core.registry.complete(&run.id, None).await.unwrap();
    assert_eq!(completed.status, RunStatus::Completed);
    assert_eq!(completed.progress_percent, 100.0);
    assert_eq!(completed.completed_nodes, completed.total_nodes);
    assert!(completed.completed_at.is_some());

    let err = core.registry.complete(&run.id, None).await.unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyTerminal(_)));
    let err = core.registry.pause(&run.id).await.unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyTerminal(_)));
    let err = core
        .registry
        .update_progress(&run.id, ProgressUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyTerminal(_)));
}

#[tokio::test]
async fn test_terminal_transitions_allowed_from_paused() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();
    let run = core.registry.register(register_pipeline_x()).await.unwrap();
    core.registry.pause(&run.id).await.unwrap();

    let cancelled = core
        .registry
        .cancel(&run.id, Some("editor walked away".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert_eq!(cancelled.error_message.as_deref(), Some("editor walked away"));
}

#[tokio::test]
async fn test_progress_clamped_and_metadata_merged() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();
    let mut initial = Map::new();
    initial.insert("a".to_string(), json!(1));
    let mut req = register_pipeline_x();
    req.metadata = Some(initial);
    let run = core.registry.register(req).await.unwrap();

    let updated = core
        .registry
        .update_progress(
            &run.id,
            ProgressUpdate {
                progress_percent: Some(150.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.progress_percent, 100.0);

    let updated = core
        .registry
        .update_progress(
            &run.id,
            ProgressUpdate {
                progress_percent: Some(-5.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.progress_percent, 0.0);

    let mut b = Map::new();
    b.insert("b".to_string(), json!(2));
    let updated = core
        .registry
        .update_progress(
            &run.id,
            ProgressUpdate {
                metadata: Some(b),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.metadata.get("a"), Some(&json!(1)));
    assert_eq!(updated.metadata.get("b"), Some(&json!(2)));

    let mut a3 = Map::new();
    a3.insert("a".to_string(), json!(3));
    let updated = core
        .registry
        .update_progress(
            &run.id,
            ProgressUpdate {
                metadata: Some(a3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.metadata.get("a"), Some(&json!(3)));
    assert_eq!(updated.metadata.get("b"), Some(&json!(2)));
}

#[tokio::test]
async fn test_jump_validates_against_resolvable_graph() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();
    let run = core.registry.register(register_pipeline_x()).await.unwrap();

    let jumped = core.registry.jump_to_node(&run.id, "n2", None).await.unwrap();
    assert_eq!(jumped.current_node_id.as_deref(), Some("n2"));
    assert_eq!(jumped.current_node_name.as_deref(), Some("Draft"));

    let err = core
        .registry
        .jump_to_node(&run.id, "ghost", None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));

    // Unresolvable definition: position accepted unvalidated.
    let external = core
        .registry
        .register(RegisterRun {
            workflow_def_id: "external-def".to_string(),
            workflow_name: Some("External".to_string()),
            source: CallerSource::Ui,
            project_folder: None,
            project_name: None,
            total_nodes: Some(2),
            metadata: None,
        })
        .await
        .unwrap();
    let jumped = core
        .registry
        .jump_to_node(&external.id, "anything", None)
        .await
        .unwrap();
    assert_eq!(jumped.current_node_id.as_deref(), Some("anything"));
}

#[tokio::test]
async fn test_fail_records_message_details_and_position() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();
    let run = core.registry.register(register_pipeline_x()).await.unwrap();
    core.registry.jump_to_node(&run.id, "n2", None).await.unwrap();

    let failed = core
        .registry
        .fail(&run.id, "draft agent crashed", Some(json!({"exit": 2})))
        .await
        .unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("draft agent crashed"));
    assert_eq!(failed.current_node_id.as_deref(), Some("n2"));
    assert_eq!(failed.metadata.get("error_details"), Some(&json!({"exit": 2})));
}

#[tokio::test]
async fn test_list_runs_filters() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();
    let a = core.registry.register(register_pipeline_x()).await.unwrap();
    let mut req = register_pipeline_x();
    req.source = CallerSource::Ui;
    let b = core.registry.register(req).await.unwrap();
    core.registry.complete(&b.id, None).await.unwrap();

    let running = core
        .registry
        .list_runs(Some(RunStatus::Running), None)
        .await
        .unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, a.id);

    let from_ui = core
        .registry
        .list_runs(None, Some(CallerSource::Ui))
        .await
        .unwrap();
    assert_eq!(from_ui.len(), 1);
    assert_eq!(from_ui[0].id, b.id);

    let all = core.registry.list_runs(None, None).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_cleanup_removes_only_old_terminal_runs() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();
    let old = core.registry.register(register_pipeline_x()).await.unwrap();
    core.registry.complete(&old.id, None).await.unwrap();
    let fresh = core.registry.register(register_pipeline_x()).await.unwrap();
    core.registry.complete(&fresh.id, None).await.unwrap();
    let active = core.registry.register(register_pipeline_x()).await.unwrap();

    // Age the first terminal entry past the cutoff.
    sqlx::query("UPDATE active_workflows SET completed_at = ? WHERE id = ?")
        .bind(chrono::Utc::now() - chrono::Duration::days(60))
        .bind(&old.id)
        .execute(&core.pool)
        .await
        .unwrap();

    let deleted = core.registry.cleanup_old_runs(30).await.unwrap();
    assert_eq!(deleted, 1);

    assert!(matches!(
        core.registry.get_run(&old.id).await.unwrap_err(),
        WorkflowError::NotFound(_)
    ));
    core.registry.get_run(&fresh.id).await.unwrap();
    core.registry.get_run(&active.id).await.unwrap();
}

#[tokio::test]
async fn test_sub_workflow_failure_scenario() {
    let core = core().await;

    let execution = core
        .subworkflows
        .start(5, 2, "sub-a", "1.0.0")
        .await
        .unwrap();
    assert_eq!(execution.status, SubWorkflowStatus::InProgress);

    let failed = core
        .subworkflows
        .complete(&execution.id, None, Some("boom".to_string()))
        .await
        .unwrap();
    assert_eq!(failed.status, SubWorkflowStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("boom"));
    assert!(failed.completed_at.is_some());

    let fetched = core.subworkflows.get(&execution.id).await.unwrap();
    assert_eq!(fetched.status, SubWorkflowStatus::Failed);

    let err = core
        .subworkflows
        .complete(&execution.id, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::AlreadyTerminal(_)));
}

#[tokio::test]
async fn test_sub_workflow_retries_and_latest_resolution() {
    let core = core().await;

    let first = core.subworkflows.start(5, 2, "sub-a", "1.0.0").await.unwrap();
    core.subworkflows
        .complete(&first.id, None, Some("boom".to_string()))
        .await
        .unwrap();

    // Recovery is an explicit new execution for the same parent phase.
    let retry = core.subworkflows.start(5, 2, "sub-a", "1.0.0").await.unwrap();
    let done = core
        .subworkflows
        .complete(&retry.id, Some(json!({"chapters": 4})), None)
        .await
        .unwrap();
    assert_eq!(done.status, SubWorkflowStatus::Complete);
    assert_eq!(done.output, Some(json!({"chapters": 4})));

    let history = core.subworkflows.latest_for_parent(5, Some(2)).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, retry.id);

    let other_phase = core.subworkflows.start(5, 3, "sub-b", "1.0.0").await.unwrap();
    let all = core.subworkflows.latest_for_parent(5, None).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].id, other_phase.id);

    let err = core.subworkflows.get("missing").await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));
}

#[tokio::test]
async fn test_editor_update_node_replaces_top_level_fields() {
    let core = core().await;
    core.store.import_definition(pipeline_x()).await.unwrap();

    let updated = core
        .editor
        .update_node(
            "pipeline-x",
            "n2",
            NodeUpdate {
                node_type: Some(NodeType::Code),
                data: Some(json!({"name": "Compile", "timeout": 30})),
            },
        )
        .await
        .unwrap();

    let n2 = updated.graph.node("n2").unwrap();
    assert_eq!(n2.node_type, NodeType::Code);
    assert_eq!(n2.data, json!({"name": "Compile", "timeout": 30}));
}
