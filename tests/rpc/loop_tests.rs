//! Cross-aggregator delegation over real sockets: two aggregators pointing
//! satellites at each other must detect the cycle instead of recursing.

use std::sync::Arc;
use std::time::Duration;

use platform_health::core::provider::{instantiate, InstanceConfig, Provider};
use platform_health::core::providers::system::SystemProvider;
use platform_health::core::types::Status;
use platform_health::rpc::proto::platform_health_client::PlatformHealthClient;
use platform_health::rpc::proto::platform_health_server::PlatformHealthServer;
use platform_health::rpc::proto::HealthCheckRequest;
use platform_health::rpc::{connect_channel, from_wire};
use platform_health::server::PlatformHealthService;
use tokio_stream::wrappers::TcpListenerStream;

fn satellite_to(port: u16) -> Box<dyn Provider> {
    let yaml = format!("kind: satellite\ntimeout: 2s\nspec:\n  host: 127.0.0.1\n  port: {port}\n");
    let instance: InstanceConfig = serde_yaml::from_str(&yaml).unwrap();
    instantiate("peer", &instance).unwrap()
}

fn spawn_aggregator(server_id: &str, peer_port: u16, listener: tokio::net::TcpListener) {
    let root = SystemProvider::with_children("platform-health", vec![satellite_to(peer_port)]);
    let service = PlatformHealthService::new(Arc::new(root), server_id);
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(PlatformHealthServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("aggregator server failed");
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mutual_delegation_returns_loop_detected_with_own_id() {
    let listener_a = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_b = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port_a = listener_a.local_addr().unwrap().port();
    let port_b = listener_b.local_addr().unwrap().port();

    spawn_aggregator("A", port_b, listener_a);
    spawn_aggregator("B", port_a, listener_b);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let channel = connect_channel("127.0.0.1", port_a, false, false)
        .await
        .expect("connect to aggregator A");
    let mut client = PlatformHealthClient::new(channel);

    let response = client
        .check(HealthCheckRequest::default())
        .await
        .expect("check rpc")
        .into_inner();
    let result = from_wire(response);

    // A -> B -> A closes the cycle at A, so A's own identifier surfaces on
    // the delegating child.
    assert_eq!(result.status, Status::LoopDetected);
    let satellite = &result.components[0];
    assert_eq!(satellite.kind, "satellite");
    assert_eq!(satellite.status, Status::LoopDetected);
    assert_eq!(satellite.server_id.as_deref(), Some("A"));

    // And symmetrically when asking B
    let channel = connect_channel("127.0.0.1", port_b, false, false)
        .await
        .expect("connect to aggregator B");
    let mut client = PlatformHealthClient::new(channel);
    let result = from_wire(client.check(HealthCheckRequest::default()).await.unwrap().into_inner());
    assert_eq!(result.status, Status::LoopDetected);
    assert_eq!(result.components[0].server_id.as_deref(), Some("B"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn component_filter_travels_through_delegation() {
    // Aggregator B hosts two leaves; A delegates to it with an allow-list.
    let listener_b = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port_b = listener_b.local_addr().unwrap().port();

    let root_b = SystemProvider::with_children(
        "platform-health",
        vec![
            Box::new(
                platform_health::core::providers::mock::MockProvider::scripted(
                    "allowed",
                    Status::Healthy,
                    None,
                ),
            ),
            Box::new(
                platform_health::core::providers::mock::MockProvider::scripted(
                    "hidden",
                    Status::Unhealthy,
                    None,
                ),
            ),
        ],
    );
    let service_b = PlatformHealthService::new(Arc::new(root_b), "B");
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(PlatformHealthServer::new(service_b))
            .serve_with_incoming(TcpListenerStream::new(listener_b))
            .await
            .expect("aggregator server failed");
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let yaml = format!(
        "kind: satellite\nspec:\n  host: 127.0.0.1\n  port: {port_b}\n  components: [allowed]\n"
    );
    let instance: InstanceConfig = serde_yaml::from_str(&yaml).unwrap();
    let satellite = instantiate("peer", &instance).unwrap();

    let result = satellite
        .probe(&platform_health::core::context::ProbeContext::default())
        .await;

    assert_eq!(result.status, Status::Healthy);
    assert_eq!(result.components.len(), 1);
    assert_eq!(result.components[0].name, "allowed");
}
