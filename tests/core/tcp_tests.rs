//! End-to-end tcp probes against real sockets, driven through the registry
//! the way a loaded configuration would build them.

use std::time::Duration;

use platform_health::core::context::ProbeContext;
use platform_health::core::provider::{instantiate, InstanceConfig, Provider};
use platform_health::core::types::Status;

fn tcp_instance(port: u16, closed: bool) -> InstanceConfig {
    let yaml = format!(
        "kind: tcp\ntimeout: 1s\nspec:\n  host: 127.0.0.1\n  port: {port}\n  closed: {closed}\n"
    );
    serde_yaml::from_str(&yaml).unwrap()
}

#[tokio::test]
async fn reachable_port_is_healthy() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let provider = instantiate("db", &tcp_instance(port, false)).unwrap();
    let result = provider.probe(&ProbeContext::default()).await;

    assert_eq!(result.status, Status::Healthy);
    assert!(result.messages.is_empty());
    assert_eq!(result.kind, "tcp");
    assert_eq!(result.name, "db");
    assert_eq!(provider.timeout(), Some(Duration::from_secs(1)));
}

#[tokio::test]
async fn closed_port_with_closed_expectation_is_healthy() {
    let provider = instantiate("blocked", &tcp_instance(1, true)).unwrap();
    let result = provider.probe(&ProbeContext::default()).await;
    assert_eq!(result.status, Status::Healthy);
}

#[tokio::test]
async fn unreachable_port_is_unhealthy_with_dial_message() {
    let provider = instantiate("down", &tcp_instance(1, false)).unwrap();
    let result = provider.probe(&ProbeContext::default()).await;
    assert_eq!(result.status, Status::Unhealthy);
    assert!(result.messages[0].starts_with("dial tcp 127.0.0.1:1"));
}
