//! Container composition: component-path filtering and its equivalence with
//! the unfiltered tree.

use std::time::Duration;

use platform_health::core::context::{ComponentPath, ProbeContext};
use platform_health::core::provider::Provider;
use platform_health::core::providers::system::SystemProvider;
use platform_health::core::types::{ProbeResult, Status};

use crate::common::ScriptedProbe;

fn fixture() -> SystemProvider {
    let fluxcd = SystemProvider::with_children(
        "fluxcd",
        vec![
            ScriptedProbe::new("source-controller", Status::Healthy, Duration::from_millis(2))
                .boxed(),
            ScriptedProbe::new("helm-controller", Status::Unhealthy, Duration::from_millis(2))
                .boxed(),
        ],
    );
    SystemProvider::with_children(
        "platform-health",
        vec![
            Box::new(fluxcd) as Box<dyn Provider>,
            ScriptedProbe::new("other", Status::Unhealthy, Duration::from_millis(2)).boxed(),
        ],
    )
}

fn find<'a>(result: &'a ProbeResult, name: &str) -> Option<&'a ProbeResult> {
    result.components.iter().find(|c| c.name == name)
}

#[tokio::test]
async fn filtering_selects_exactly_the_requested_subtree() {
    let root = fixture();
    let path: ComponentPath = "fluxcd/source-controller".parse().unwrap();
    let ctx = ProbeContext::default().with_component_paths(vec![path]);

    let result = root.probe(&ctx).await;

    // Only fluxcd was probed, with only the requested child below it
    assert_eq!(result.components.len(), 1);
    let fluxcd = find(&result, "fluxcd").unwrap();
    assert_eq!(fluxcd.components.len(), 1);
    assert_eq!(fluxcd.components[0].name, "source-controller");
    assert!(find(fluxcd, "helm-controller").is_none());

    // The sibling failures were excluded, so the filtered tree is healthy
    assert_eq!(result.status, Status::Healthy);
}

#[tokio::test]
async fn filtered_subtree_matches_the_unfiltered_result() {
    let ctx = ProbeContext::default();
    let unfiltered = fixture().probe(&ctx).await;

    let path: ComponentPath = "fluxcd/helm-controller".parse().unwrap();
    let ctx = ProbeContext::default().with_component_paths(vec![path]);
    let filtered = fixture().probe(&ctx).await;

    let unfiltered_node = find(find(&unfiltered, "fluxcd").unwrap(), "helm-controller").unwrap();
    let filtered_node = find(find(&filtered, "fluxcd").unwrap(), "helm-controller").unwrap();

    assert_eq!(filtered_node.kind, unfiltered_node.kind);
    assert_eq!(filtered_node.status, unfiltered_node.status);
    assert_eq!(filtered_node.messages, unfiltered_node.messages);
}

#[tokio::test]
async fn whole_container_path_probes_every_child() {
    let root = fixture();
    let path: ComponentPath = "fluxcd".parse().unwrap();
    let ctx = ProbeContext::default().with_component_paths(vec![path]);

    let result = root.probe(&ctx).await;
    let fluxcd = find(&result, "fluxcd").unwrap();
    assert_eq!(fluxcd.components.len(), 2);
    assert_eq!(result.status, Status::Unhealthy);
}

#[tokio::test]
async fn multiple_paths_probe_multiple_subtrees() {
    let root = fixture();
    let paths = vec![
        "fluxcd/source-controller".parse().unwrap(),
        "other".parse().unwrap(),
    ];
    let ctx = ProbeContext::default().with_component_paths(paths);

    let result = root.probe(&ctx).await;
    assert_eq!(result.components.len(), 2);
    assert!(find(&result, "other").is_some());
    assert_eq!(result.status, Status::Unhealthy);
}

#[tokio::test]
async fn invalid_path_fails_the_container() {
    let root = fixture();
    let paths = vec!["fluxcd/source-controller".parse().unwrap(), "nope".parse().unwrap()];
    let ctx = ProbeContext::default().with_component_paths(paths);

    let result = root.probe(&ctx).await;
    assert_eq!(result.status, Status::Unhealthy);
    assert!(result.messages.iter().any(|m| m.contains("nope")));
}
