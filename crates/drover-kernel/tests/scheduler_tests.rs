//! End-to-end tests for `CollectionScheduler::run_all`.
//!
//! Tests verify:
//! - aggregate summaries are the same in every execution mode
//! - sequential mode finishes a collection (tails included) before the next
//! - collections start in orderer order in every mode
//! - the concurrency cap holds across case bodies and tracked tails
//! - orderer failures produce one diagnostic each and never abort the run
//! - cancellation stops new work but never truncates a drain

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use drover_kernel::{
    CaseOrderer, CollectionOrderer, CollectionScheduler, ExecutionOptions, OrdererRegistry,
    RunConfiguration, RunSettings,
};
use drover_kernel::{CancellationToken, Case, Collection, CollectionPlan, RunSummary};
use drover_testutil::{CaseScript, Event, RecordingSink, ScriptedExecutor, TailScript, plans};

// ============================================================================
// Test Helpers
// ============================================================================

fn three_collections() -> ScriptedExecutor {
    ScriptedExecutor::new()
        .script("c1_pass", CaseScript::pass().after(Duration::from_millis(20)))
        .script("c2_fail", CaseScript::fail())
        .script("c3_skip", CaseScript::skip())
}

fn three_plans() -> Vec<CollectionPlan> {
    plans(&[("C1", &["c1_pass"]), ("C2", &["c2_fail"]), ("C3", &["c3_skip"])])
}

fn scheduler_for(executor: &ScriptedExecutor) -> CollectionScheduler {
    drover_testutil::init_tracing();
    CollectionScheduler::new(Arc::new(executor.clone()))
}

fn started(collection: &str) -> impl Fn(&Event) -> bool + '_ {
    move |event: &Event| {
        matches!(event, Event::CaseStarted { .. }) && event.collection().as_str() == collection
    }
}

fn finished(collection: &str) -> impl Fn(&Event) -> bool + '_ {
    move |event: &Event| {
        !matches!(event, Event::CaseStarted { .. }) && event.collection().as_str() == collection
    }
}

struct AlwaysFails;

impl CaseOrderer for AlwaysFails {
    fn name(&self) -> &str {
        "always-fails"
    }

    fn order_cases(&self, _cases: Vec<Case>) -> anyhow::Result<Vec<Case>> {
        anyhow::bail!("no order for you")
    }
}

impl CollectionOrderer for AlwaysFails {
    fn name(&self) -> &str {
        "always-fails"
    }

    fn order_collections(&self, _collections: Vec<Collection>) -> anyhow::Result<Vec<Collection>> {
        anyhow::bail!("no order for you")
    }
}

struct Reversed;

impl CollectionOrderer for Reversed {
    fn name(&self) -> &str {
        "reversed"
    }

    fn order_collections(&self, mut collections: Vec<Collection>) -> anyhow::Result<Vec<Collection>> {
        collections.reverse();
        Ok(collections)
    }
}

fn registry_with_failing_orderers() -> OrdererRegistry {
    let mut registry = OrdererRegistry::default();
    registry.register_case_orderer("always-fails", || Ok(Arc::new(AlwaysFails)));
    registry.register_collection_orderer("always-fails", || Ok(Arc::new(AlwaysFails)));
    registry
}

// ============================================================================
// Aggregation
// ============================================================================

#[rstest]
#[case::sequential(RunConfiguration::sequential())]
#[case::parallel_one(RunConfiguration::parallel(1))]
#[case::parallel_two(RunConfiguration::parallel(2))]
#[case::parallel_hardware(RunConfiguration::parallel(0))]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn aggregate_is_the_same_in_every_mode(#[case] configuration: RunConfiguration) {
    let executor = three_collections();
    let summary = scheduler_for(&executor)
        .run_all(three_plans(), configuration, CancellationToken::new())
        .await
        .expect("run completes");

    assert_eq!(summary, RunSummary::new(3, 1, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sequential_mode_finishes_each_collection_first() {
    let executor = three_collections().script(
        "c1_pass",
        CaseScript::pass()
            .after(Duration::from_millis(20))
            .with_tail(TailScript::ok(Duration::from_millis(30))),
    );
    let summary = scheduler_for(&executor)
        .run_all(three_plans(), RunConfiguration::sequential(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary, RunSummary::new(3, 1, 1));

    let events = executor.events();
    let c1_done = events.last_position(finished("C1")).expect("C1 finished");
    let c2_start = events.position(started("C2")).expect("C2 started");
    let c3_start = events.position(started("C3")).expect("C3 started");
    assert!(
        c1_done < c2_start,
        "C2 started before C1 (and its tail) finished: {:?}",
        events.snapshot()
    );
    assert!(c2_start < c3_start);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cases_in_a_collection_run_one_at_a_time() {
    let executor =
        ScriptedExecutor::new().default_script(CaseScript::pass().after(Duration::from_millis(5)));
    let summary = scheduler_for(&executor)
        .run_all(
            plans(&[("only", &["a", "b", "c", "d"])]),
            RunConfiguration::parallel(4),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::new(4, 0, 0));
    assert_eq!(executor.probe().max(), 1);
    assert_eq!(executor.events().started(), vec!["a", "b", "c", "d"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_cap_holds_for_bodies_and_tails() {
    let executor = ScriptedExecutor::new().default_script(
        CaseScript::pass()
            .after(Duration::from_millis(5))
            .with_tail(TailScript::ok(Duration::from_millis(5))),
    );
    let collections: Vec<(String, Vec<String>)> = (0..8)
        .map(|c| {
            let cases = (0..3).map(|i| format!("c{c}_case{i}")).collect();
            (format!("C{c}"), cases)
        })
        .collect();
    let plans = collections
        .iter()
        .map(|(collection, cases)| {
            let cases: Vec<&str> = cases.iter().map(String::as_str).collect();
            CollectionPlan::named(collection, &cases)
        })
        .collect();

    let summary = scheduler_for(&executor)
        .run_all(plans, RunConfiguration::parallel(2), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::new(24, 0, 0));
    assert!(executor.probe().max() <= 2, "cap exceeded: {}", executor.probe().max());
    // 24 case bodies and 24 tails.
    assert_eq!(executor.probe().entered(), 48);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tail_failure_counts_once_per_collection() {
    let executor = ScriptedExecutor::new()
        .script("a", CaseScript::pass().with_tail(TailScript::failing(Duration::from_millis(5))))
        .script("b", CaseScript::pass().with_tail(TailScript::failing(Duration::from_millis(10))))
        .script("c", CaseScript::pass());
    let summary = scheduler_for(&executor)
        .run_all(
            plans(&[("C1", &["a", "b"]), ("C2", &["c"])]),
            RunConfiguration::parallel(2),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    // Three passing cases plus one failure for C1's tails.
    assert_eq!(summary, RunSummary::new(4, 1, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_case_is_contained() {
    let executor = ScriptedExecutor::new().script("boom", CaseScript::panic());
    let summary = scheduler_for(&executor)
        .run_all(
            plans(&[("C1", &["boom", "after"]), ("C2", &["other"])]),
            RunConfiguration::parallel(2),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::new(3, 1, 0));
    assert_eq!(executor.events().started().len(), 3);
}

// ============================================================================
// Ordering
// ============================================================================

#[rstest]
#[case::sequential(RunConfiguration::sequential())]
#[case::parallel(RunConfiguration::parallel(2))]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_case_orderer_reports_once_per_call(#[case] configuration: RunConfiguration) {
    let executor = three_collections();
    let sink = Arc::new(RecordingSink::new());
    let summary = scheduler_for(&executor)
        .with_orderers(registry_with_failing_orderers())
        .with_sink(sink.clone())
        .run_all(
            three_plans(),
            configuration.with_case_orderer("always-fails"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::new(3, 1, 1));
    // One ordering call per collection.
    assert_eq!(sink.len(), 3, "{:?}", sink.messages());
    assert!(sink.messages().iter().all(|m| m.message.contains("no order for you")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_collection_orderer_falls_back_to_discovery_order() {
    let executor = three_collections();
    let sink = Arc::new(RecordingSink::new());
    let summary = scheduler_for(&executor)
        .with_orderers(registry_with_failing_orderers())
        .with_sink(sink.clone())
        .run_all(
            three_plans(),
            RunConfiguration::sequential().with_collection_orderer("always-fails"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::new(3, 1, 1));
    assert_eq!(sink.len(), 1);
    assert_eq!(executor.events().started(), vec!["c1_pass", "c2_fail", "c3_skip"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn custom_collection_orderer_sets_start_order() {
    let executor = three_collections();
    let mut registry = OrdererRegistry::default();
    registry.register_collection_orderer("reversed", || Ok(Arc::new(Reversed)));

    scheduler_for(&executor)
        .with_orderers(registry)
        .run_all(
            three_plans(),
            RunConfiguration::sequential().with_collection_orderer("reversed"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(executor.events().started(), vec!["c3_skip", "c2_fail", "c1_pass"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_collections_start_in_orderer_order() {
    let names: Vec<String> = (0..8).map(|i| format!("c{i}")).collect();
    let expected: Vec<String> = names.iter().rev().map(|name| format!("{name}_a")).collect();

    // Collection tasks are polled in whatever order the runtime picks;
    // repeat so a lucky schedule cannot hide a misordering.
    for _ in 0..20 {
        let executor = ScriptedExecutor::new();
        let mut registry = OrdererRegistry::default();
        registry.register_collection_orderer("reversed", || Ok(Arc::new(Reversed)));
        let plans: Vec<CollectionPlan> = names
            .iter()
            .map(|name| {
                CollectionPlan::named(name, &[format!("{name}_a").as_str(), format!("{name}_b").as_str()])
            })
            .collect();

        let summary = scheduler_for(&executor)
            .with_orderers(registry)
            .run_all(
                plans,
                RunConfiguration::parallel(1).with_collection_orderer("reversed"),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(summary, RunSummary::new(16, 0, 0));
        let first_cases: Vec<String> = executor
            .events()
            .started()
            .into_iter()
            .filter(|name| name.ends_with("_a"))
            .collect();
        assert_eq!(first_cases, expected);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_orderer_reports_once_and_runs() {
    let executor = three_collections();
    let sink = Arc::new(RecordingSink::new());
    let summary = scheduler_for(&executor)
        .with_sink(sink.clone())
        .run_all(
            three_plans(),
            RunConfiguration::parallel(2).with_case_orderer("does-not-exist"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::new(3, 1, 1));
    assert_eq!(sink.len(), 1);
    assert!(sink.contains("Could not find case orderer 'does-not-exist'"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn orderer_construction_failure_reports_once_and_runs() {
    let executor = three_collections();
    let sink = Arc::new(RecordingSink::new());
    let mut registry = OrdererRegistry::default();
    registry.register_collection_orderer("needs-seed", || anyhow::bail!("seed missing"));

    let summary = scheduler_for(&executor)
        .with_orderers(registry)
        .with_sink(sink.clone())
        .run_all(
            three_plans(),
            RunConfiguration::sequential().with_collection_orderer("needs-seed"),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::new(3, 1, 1));
    assert_eq!(sink.len(), 1);
    assert!(sink.contains("threw during construction"));
    assert!(sink.contains("seed missing"));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_after_first_collection_keeps_only_its_contribution() {
    let cancel = CancellationToken::new();
    let executor = three_collections().script(
        "c1_pass",
        CaseScript::pass()
            .with_tail(TailScript::ok(Duration::from_millis(50)))
            .cancelling(cancel.clone()),
    );

    let summary = scheduler_for(&executor)
        .run_all(three_plans(), RunConfiguration::sequential(), cancel)
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::new(1, 0, 0));
    assert_eq!(executor.events().started(), vec!["c1_pass"]);
    // The drain still waited for C1's tail.
    assert!(
        executor
            .events()
            .position(|e| matches!(e, Event::TailFinished { .. }))
            .is_some()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_mid_collection_skips_remaining_cases_uncounted() {
    let cancel = CancellationToken::new();
    let executor = ScriptedExecutor::new()
        .script("first", CaseScript::fail().cancelling(cancel.clone()))
        .script("second", CaseScript::pass());

    let summary = scheduler_for(&executor)
        .run_all(
            plans(&[("C1", &["first", "second"])]),
            RunConfiguration::parallel(2),
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::new(1, 1, 0));
    assert_eq!(executor.events().started(), vec!["first"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_before_start_runs_nothing() {
    let executor = three_collections();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = scheduler_for(&executor)
        .run_all(three_plans(), RunConfiguration::parallel(2), cancel)
        .await
        .unwrap();

    assert!(summary.is_empty());
    assert!(executor.events().started().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_during_parallel_run_lets_started_work_finish() {
    let cancel = CancellationToken::new();
    let executor = ScriptedExecutor::new()
        .script(
            "slow",
            CaseScript::pass()
                .after(Duration::from_millis(30))
                .with_tail(TailScript::ok(Duration::from_millis(30))),
        )
        .script(
            "trigger",
            CaseScript::pass()
                .after(Duration::from_millis(10))
                .cancelling(cancel.clone()),
        );

    let summary = scheduler_for(&executor)
        .run_all(
            plans(&[("C1", &["slow"]), ("C2", &["trigger", "never"])]),
            RunConfiguration::parallel(4),
            cancel,
        )
        .await
        .unwrap();

    // "slow" was already admitted and finishes; "never" is not started.
    assert_eq!(summary, RunSummary::new(2, 0, 0));
    let events = executor.events();
    assert!(!events.started().contains(&"never".to_string()));
    assert!(
        events
            .position(|e| matches!(e, Event::TailFinished { case, .. } if case == "slow"))
            .is_some()
    );
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn settings_file_drives_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drover.toml");
    std::fs::write(
        &path,
        r#"
case_orderer = "alphabetical"

[collection_behavior]
disable_parallelization = true
"#,
    )
    .unwrap();

    let settings = RunSettings::load_from(&path).unwrap();
    let configuration = RunConfiguration::from_layers(&settings, &ExecutionOptions::default());
    assert_eq!(configuration.describe(), "non-parallel");

    let executor = ScriptedExecutor::new();
    let summary = scheduler_for(&executor)
        .run_all(
            plans(&[("C1", &["zebra", "Apple", "mango"])]),
            configuration,
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary, RunSummary::new(3, 0, 0));
    assert_eq!(executor.events().started(), vec!["Apple", "mango", "zebra"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn free_function_runs_with_defaults() {
    let executor = three_collections();
    let summary = drover_kernel::run_all(
        Arc::new(executor.clone()),
        three_plans(),
        RunConfiguration::default(),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(summary, RunSummary::new(3, 1, 1));
    assert_eq!(executor.events().started().len(), 3);
}
