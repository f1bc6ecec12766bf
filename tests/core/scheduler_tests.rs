//! Scheduler guarantees: worst-wins aggregation, the parallelism bound,
//! cancellation, fail-fast curtailment, per-instance timeouts, and duration
//! monotonicity.

use std::sync::Arc;
use std::time::{Duration, Instant};

use platform_health::core::context::ProbeContext;
use platform_health::core::provider::Provider;
use platform_health::core::providers::system::SystemProvider;
use platform_health::core::scheduler::{evaluate, Target};
use platform_health::core::types::Status;

use crate::common::{Gauge, ScriptedProbe};

fn targets(providers: &[Box<dyn Provider>]) -> Vec<Target<'_>> {
    providers
        .iter()
        .map(|p| Target::new(p.as_ref()))
        .collect()
}

#[tokio::test]
async fn empty_target_list_aggregates_healthy() {
    let ctx = ProbeContext::default();
    let (results, status) = evaluate(&ctx, Vec::new()).await;
    assert!(results.is_empty());
    assert_eq!(status, Status::Healthy);
}

#[tokio::test]
async fn aggregate_status_is_the_worst_of_all_results() {
    let providers: Vec<Box<dyn Provider>> = vec![
        ScriptedProbe::new("a", Status::Healthy, Duration::from_millis(5)).boxed(),
        ScriptedProbe::new("b", Status::Unknown, Duration::from_millis(5)).boxed(),
        ScriptedProbe::new("c", Status::Unhealthy, Duration::from_millis(5)).boxed(),
    ];
    let ctx = ProbeContext::default();
    let (results, status) = evaluate(&ctx, targets(&providers)).await;
    assert_eq!(results.len(), 3);
    assert_eq!(status, Status::Unknown);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_flight_probes_never_exceed_the_parallelism_budget() {
    let gauge = Arc::new(Gauge::default());
    let providers: Vec<Box<dyn Provider>> = (0..8)
        .map(|i| {
            ScriptedProbe::new(&format!("p{i}"), Status::Healthy, Duration::from_millis(30))
                .with_gauge(gauge.clone())
                .boxed()
        })
        .collect();

    let ctx = ProbeContext::new(2, false);
    let start = Instant::now();
    let (results, _) = evaluate(&ctx, targets(&providers)).await;

    assert_eq!(results.len(), 8);
    assert!(
        gauge.max_seen() <= 2,
        "saw {} concurrent probes under a budget of 2",
        gauge.max_seen()
    );
    // 8 probes of 30ms through 2 slots need at least 4 rounds
    assert!(start.elapsed() >= Duration::from_millis(110));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unbounded_parallelism_overlaps_probes() {
    let gauge = Arc::new(Gauge::default());
    let providers: Vec<Box<dyn Provider>> = (0..8)
        .map(|i| {
            ScriptedProbe::new(&format!("p{i}"), Status::Healthy, Duration::from_millis(50))
                .with_gauge(gauge.clone())
                .boxed()
        })
        .collect();

    let ctx = ProbeContext::new(-1, false);
    let start = Instant::now();
    let (results, _) = evaluate(&ctx, targets(&providers)).await;

    assert_eq!(results.len(), 8);
    assert!(gauge.max_seen() >= 4);
    assert!(start.elapsed() < Duration::from_millis(8 * 50));
}

#[tokio::test]
async fn canceling_the_context_ends_the_wait_promptly() {
    let providers: Vec<Box<dyn Provider>> = (0..3)
        .map(|i| {
            ScriptedProbe::new(&format!("p{i}"), Status::Healthy, Duration::from_secs(5)).boxed()
        })
        .collect();

    let ctx = ProbeContext::new(-1, false);
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctx.cancel();
        });
    }

    let start = Instant::now();
    let (results, status) = evaluate(&ctx, targets(&providers)).await;
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(results.is_empty());
    assert_eq!(status, Status::Healthy);
}

#[tokio::test]
async fn per_instance_timeout_bounds_a_single_probe() {
    let providers: Vec<Box<dyn Provider>> = vec![
        ScriptedProbe::new("slow", Status::Healthy, Duration::from_secs(5))
            .with_timeout(Duration::from_millis(50))
            .boxed(),
        ScriptedProbe::new("fast", Status::Healthy, Duration::from_millis(5)).boxed(),
    ];

    let ctx = ProbeContext::default();
    let start = Instant::now();
    let (results, status) = evaluate(&ctx, targets(&providers)).await;

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(results.len(), 2);
    assert_eq!(status, Status::Unhealthy);
    let slow = results.iter().find(|r| r.name == "slow").unwrap();
    assert_eq!(slow.status, Status::Unhealthy);
    assert!(slow.messages[0].contains("timed out"));
}

#[tokio::test]
async fn fail_fast_curtails_sibling_probes() {
    // Three children of 10ms each through one slot: the failing child fires
    // the shared token, so at most the already-running work completes.
    let root = SystemProvider::with_children(
        "root",
        vec![
            ScriptedProbe::new("bad", Status::Unhealthy, Duration::from_millis(10)).boxed(),
            ScriptedProbe::new("ok-1", Status::Healthy, Duration::from_millis(10)).boxed(),
            ScriptedProbe::new("ok-2", Status::Healthy, Duration::from_millis(10)).boxed(),
        ],
    );

    let ctx = ProbeContext::new(1, true);
    let result = root.probe(&ctx).await;

    assert_eq!(result.status, Status::Unhealthy);
    assert!(result.fail_fast_triggered);
    assert!(result.components.len() <= 3);
    assert!(result
        .components
        .iter()
        .any(|c| c.status == Status::Unhealthy));
    assert!(result.messages.iter().any(|m| m.contains("fail-fast")));
}

#[tokio::test]
async fn durations_are_positive_and_cover_children() {
    let inner = SystemProvider::with_children(
        "inner",
        vec![
            ScriptedProbe::new("leaf-a", Status::Healthy, Duration::from_millis(15)).boxed(),
            ScriptedProbe::new("leaf-b", Status::Healthy, Duration::from_millis(5)).boxed(),
        ],
    );
    let root = SystemProvider::with_children("root", vec![Box::new(inner)]);

    let result = root.probe(&ProbeContext::default()).await;

    assert!(result.duration > Duration::ZERO);
    let inner = &result.components[0];
    assert!(inner.duration > Duration::ZERO);
    assert!(result.duration >= inner.duration);
    let max_leaf = inner
        .components
        .iter()
        .map(|c| c.duration)
        .max()
        .unwrap();
    assert!(inner.duration >= max_leaf);
    assert!(max_leaf >= Duration::from_millis(5));
}
