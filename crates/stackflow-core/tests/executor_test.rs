mod common;

use common::{MockBackend, TEMPLATE, TestProject};
use stackflow_cloud::{ActionType, RemoteStatus};
use stackflow_core::{
    ActionOutput, Command, ErrorKind, ParamValue, PlanResult, ResolverRef, SkipReason,
    StackConfig, StackGraph, StackId, StackOutcome, build_graph, compile_plan, execute,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// net <- app <- cache
fn chain() -> Arc<StackGraph> {
    Arc::new(
        build_graph(vec![
            StackConfig::new("net", TEMPLATE),
            StackConfig::new("app", TEMPLATE).with_dependency("net"),
            StackConfig::new("cache", TEMPLATE).with_dependency("app"),
        ])
        .unwrap(),
    )
}

fn independent(names: &[&str]) -> Arc<StackGraph> {
    Arc::new(
        build_graph(
            names
                .iter()
                .map(|name| StackConfig::new(*name, TEMPLATE))
                .collect(),
        )
        .unwrap(),
    )
}

fn batch_ids(result: &PlanResult) -> Vec<Vec<String>> {
    result
        .batches
        .iter()
        .map(|b| b.stacks.iter().map(|id| id.to_string()).collect())
        .collect()
}

fn failure_kind(result: &PlanResult, id: &str) -> ErrorKind {
    match result.get(id) {
        Some(StackOutcome::Failed { kind, .. }) => *kind,
        other => panic!("expected {id} to fail, got {other:?}"),
    }
}

fn applied_actions(result: &PlanResult, id: &str) -> Vec<ActionType> {
    match result.get(id) {
        Some(StackOutcome::Succeeded {
            value: ActionOutput::Applied(outcome),
        }) => outcome.actions.clone(),
        other => panic!("expected {id} to be applied, got {other:?}"),
    }
}

#[tokio::test]
async fn test_launch_chain_runs_in_dependency_order() {
    let project = TestProject::new();
    let backend = Arc::new(MockBackend::new());
    let plan = compile_plan(chain(), Command::Launch, ".", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert!(result.is_success());
    assert_eq!(
        batch_ids(&result),
        vec![vec!["net"], vec!["app"], vec!["cache"]]
    );
    assert_eq!(
        backend.calls(),
        vec!["create:net", "create:app", "create:cache"]
    );
}

#[tokio::test]
async fn test_failure_skips_transitive_dependents() {
    let project = TestProject::new();
    let backend = Arc::new(MockBackend::new().failing("create:net"));
    let plan = compile_plan(chain(), Command::Launch, ".", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert!(!result.is_success());
    assert_eq!(failure_kind(&result, "net"), ErrorKind::Provider);
    assert_eq!(
        result.get("app"),
        Some(&StackOutcome::Skipped {
            reason: SkipReason::UpstreamFailed("net".into())
        })
    );
    assert_eq!(
        result.get("cache"),
        Some(&StackOutcome::Skipped {
            reason: SkipReason::UpstreamFailed("app".into())
        })
    );
    // Skipped stacks are never dispatched
    assert_eq!(backend.calls(), vec!["create:net"]);
    assert_eq!(result.summary().skipped, 2);
}

#[tokio::test]
async fn test_failure_does_not_stop_unrelated_branches() {
    let project = TestProject::new();
    let graph = Arc::new(
        build_graph(vec![
            StackConfig::new("net", TEMPLATE),
            StackConfig::new("app", TEMPLATE).with_dependency("net"),
            StackConfig::new("dns", TEMPLATE),
            StackConfig::new("cdn", TEMPLATE).with_dependency("dns"),
        ])
        .unwrap(),
    );
    let backend = Arc::new(MockBackend::new().failing("create:net"));
    let plan = compile_plan(graph, Command::Create, ".", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert_eq!(failure_kind(&result, "net"), ErrorKind::Provider);
    assert!(matches!(result.get("app"), Some(StackOutcome::Skipped { .. })));
    assert!(result.get("dns").unwrap().is_success());
    assert!(result.get("cdn").unwrap().is_success());
}

#[tokio::test]
async fn test_independent_stacks_share_a_batch_and_run_concurrently() {
    let project = TestProject::new();
    let backend = Arc::new(MockBackend::new());
    let plan = compile_plan(independent(&["db", "queue"]), Command::Launch, ".", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert!(result.is_success());
    assert_eq!(batch_ids(&result), vec![vec!["db", "queue"]]);
    assert_eq!(backend.max_in_flight(), 2);
}

#[tokio::test]
async fn test_concurrency_cap_is_respected() {
    let project = TestProject::new();
    let backend = Arc::new(MockBackend::new());
    let plan = compile_plan(
        independent(&["a", "b", "c", "d", "e"]),
        Command::Create,
        ".",
        false,
    )
    .unwrap();
    let ctx = project.context().with_max_concurrency(Some(2));

    let result = execute(&plan, backend.clone(), &ctx).await;

    assert!(result.is_success());
    assert_eq!(result.summary().succeeded, 5);
    assert!(backend.max_in_flight() <= 2);
}

#[tokio::test]
async fn test_failed_stack_is_deleted_then_created() {
    let project = TestProject::new();
    let backend = Arc::new(MockBackend::new().with_status("app", RemoteStatus::CreateFailed));
    let plan = compile_plan(independent(&["app"]), Command::Launch, "app", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert_eq!(
        applied_actions(&result, "app"),
        vec![ActionType::Delete, ActionType::Create]
    );
    assert_eq!(backend.calls(), vec!["delete:app", "create:app"]);
}

#[tokio::test]
async fn test_relaunch_stops_when_delete_fails() {
    let project = TestProject::new();
    let backend = Arc::new(
        MockBackend::new()
            .with_status("app", RemoteStatus::RollbackComplete)
            .failing("delete:app"),
    );
    let plan = compile_plan(independent(&["app"]), Command::Launch, "app", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert_eq!(failure_kind(&result, "app"), ErrorKind::Provider);
    assert_eq!(backend.calls(), vec!["delete:app"]);
}

#[tokio::test]
async fn test_launch_updates_complete_stack() {
    let project = TestProject::new();
    let backend = Arc::new(MockBackend::new().with_status("app", RemoteStatus::CreateComplete));
    let plan = compile_plan(independent(&["app"]), Command::Launch, "app", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert_eq!(applied_actions(&result, "app"), vec![ActionType::Update]);
}

#[tokio::test]
async fn test_unknown_status_is_a_config_error() {
    let project = TestProject::new();
    let backend = Arc::new(MockBackend::new().with_status(
        "app",
        RemoteStatus::from_code("IMPORT_ROLLBACK_FROZEN"),
    ));
    let plan = compile_plan(independent(&["app"]), Command::Launch, "app", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert_eq!(failure_kind(&result, "app"), ErrorKind::Config);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_in_progress_stack_times_out() {
    let project = TestProject::new();
    let backend = Arc::new(MockBackend::new().with_status("app", RemoteStatus::InProgress));
    let plan = compile_plan(independent(&["app"]), Command::Launch, "app", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert_eq!(failure_kind(&result, "app"), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_resolver_reads_outputs_of_completed_upstream() {
    let project = TestProject::new();
    let graph = Arc::new(
        build_graph(vec![
            StackConfig::new("net", TEMPLATE),
            StackConfig::new("app", TEMPLATE).with_parameter(
                "VpcId",
                ParamValue::Resolver(ResolverRef::output("net", "VpcId")),
            ),
        ])
        .unwrap(),
    );
    let backend = Arc::new(MockBackend::new().with_outputs("net", &[("VpcId", "vpc-123")]));
    let plan = compile_plan(graph, Command::Launch, "app", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert!(result.is_success());
    assert_eq!(batch_ids(&result), vec![vec!["net"], vec!["app"]]);
    let deployed = backend.deployed("app").unwrap();
    assert_eq!(deployed.parameters["VpcId"], "vpc-123");
}

#[tokio::test]
async fn test_ignoring_dependencies_reads_live_outputs() {
    let project = TestProject::new();
    let graph = Arc::new(
        build_graph(vec![
            StackConfig::new("net", TEMPLATE),
            StackConfig::new("app", TEMPLATE).with_parameter(
                "VpcId",
                ParamValue::Resolver(ResolverRef::output("net", "VpcId")),
            ),
        ])
        .unwrap(),
    );
    let backend = Arc::new(
        MockBackend::new()
            .with_status("net", RemoteStatus::CreateComplete)
            .with_outputs("net", &[("VpcId", "vpc-1")]),
    );
    let plan = compile_plan(graph, Command::Launch, ".", true).unwrap();

    // Repeat so the outcome cannot hinge on which task finishes first
    for _ in 0..3 {
        let result = execute(&plan, backend.clone(), &project.context()).await;

        assert_eq!(result.batches.len(), 1);
        assert!(result.is_success(), "{:?}", result.stacks);
        assert_eq!(backend.deployed("app").unwrap().parameters["VpcId"], "vpc-1");
    }
}

#[tokio::test]
async fn test_resolver_against_missing_source_fails_only_that_stack() {
    let project = TestProject::new();
    let graph = Arc::new(
        build_graph(vec![
            StackConfig::new("net", TEMPLATE),
            StackConfig::new("app", TEMPLATE).with_parameter(
                "VpcId",
                ParamValue::Resolver(ResolverRef::output("net", "SubnetId")),
            ),
            StackConfig::new("dns", TEMPLATE),
        ])
        .unwrap(),
    );
    let backend = Arc::new(MockBackend::new().with_outputs("net", &[("VpcId", "vpc-1")]));
    let plan = compile_plan(graph, Command::Launch, ".", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert_eq!(failure_kind(&result, "app"), ErrorKind::Resolution);
    assert!(result.get("net").unwrap().is_success());
    assert!(result.get("dns").unwrap().is_success());
    assert!(backend.deployed("app").is_none());
}

#[tokio::test]
async fn test_delete_runs_dependents_first() {
    let project = TestProject::new();
    let backend = Arc::new(
        MockBackend::new()
            .with_status("net", RemoteStatus::CreateComplete)
            .with_status("app", RemoteStatus::UpdateComplete)
            .with_status("cache", RemoteStatus::CreateComplete),
    );
    let plan = compile_plan(chain(), Command::Delete, "net", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert!(result.is_success());
    assert_eq!(
        batch_ids(&result),
        vec![vec!["cache"], vec!["app"], vec!["net"]]
    );
    assert_eq!(
        backend.calls(),
        vec!["delete:cache", "delete:app", "delete:net"]
    );
}

#[tokio::test]
async fn test_delete_of_absent_stack_is_noop() {
    let project = TestProject::new();
    let backend = Arc::new(MockBackend::new());
    let plan = compile_plan(independent(&["app"]), Command::Delete, "app", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert_eq!(applied_actions(&result, "app"), vec![ActionType::NoOp]);
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_protected_stack_is_refused() {
    let project = TestProject::new();
    let graph = Arc::new(
        build_graph(vec![
            StackConfig::new("net", TEMPLATE).protected(),
            StackConfig::new("app", TEMPLATE).with_dependency("net"),
        ])
        .unwrap(),
    );
    let backend = Arc::new(MockBackend::new());
    let plan = compile_plan(graph, Command::Launch, ".", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    assert_eq!(failure_kind(&result, "net"), ErrorKind::Protected);
    assert!(matches!(result.get("app"), Some(StackOutcome::Skipped { .. })));
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start_dispatches_nothing() {
    let project = TestProject::new();
    let backend = Arc::new(MockBackend::new());
    let plan = compile_plan(chain(), Command::Launch, ".", false).unwrap();
    let ctx = project.context();
    ctx.cancel.cancel();

    let result = execute(&plan, backend.clone(), &ctx).await;

    for id in ["net", "app", "cache"] {
        assert_eq!(
            result.get(id),
            Some(&StackOutcome::Skipped {
                reason: SkipReason::Cancelled
            })
        );
    }
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn test_cancellation_lets_in_flight_stack_finish() {
    let project = TestProject::new();
    let ctx = project.context();
    let backend = Arc::new(MockBackend::new().cancel_when_creating("net", ctx.cancel.clone()));
    let plan = compile_plan(chain(), Command::Launch, ".", false).unwrap();

    let result = execute(&plan, backend.clone(), &ctx).await;

    assert!(result.get("net").unwrap().is_success());
    assert_eq!(
        result.get("app"),
        Some(&StackOutcome::Skipped {
            reason: SkipReason::Cancelled
        })
    );
    assert_eq!(backend.calls(), vec!["create:net"]);
}

#[tokio::test]
async fn test_read_only_command_touches_only_targets() {
    let project = TestProject::new();
    let backend = Arc::new(MockBackend::new().with_status("app", RemoteStatus::CreateComplete));
    let plan = compile_plan(chain(), Command::Describe, "app", false).unwrap();

    let result = execute(&plan, backend.clone(), &project.context()).await;

    let ids: BTreeSet<&StackId> = result.stacks.keys().collect();
    assert_eq!(ids, BTreeSet::from([&StackId::from("app")]));
    assert_eq!(
        result.get("app"),
        Some(&StackOutcome::Succeeded {
            value: ActionOutput::Status(RemoteStatus::CreateComplete)
        })
    );
}
