//! End-to-end http probes against a minimal in-process HTTP/1.1 responder.

use platform_health::core::context::ProbeContext;
use platform_health::core::provider::{instantiate, InstanceConfig, Provider};
use platform_health::core::types::Status;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Serve canned responses on an ephemeral port until the test ends.
async fn canned_server(status_line: &'static str, content_type: &'static str, body: &'static str) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                // Drain the request head; canned responses ignore it
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status_line}\r\ncontent-type: {content_type}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len(),
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    port
}

fn http_instance(port: u16, extra: &str) -> InstanceConfig {
    let yaml = format!(
        "kind: http\ntimeout: 2s\nspec:\n  url: http://127.0.0.1:{port}/healthz\n  method: GET\n{extra}"
    );
    serde_yaml::from_str(&yaml).unwrap()
}

#[tokio::test]
async fn status_below_400_is_healthy_without_checks() {
    let port = canned_server("204 No Content", "text/plain", "").await;
    let provider = instantiate("api", &http_instance(port, "")).unwrap();

    let result = provider.probe(&ProbeContext::default()).await;
    assert_eq!(result.status, Status::Healthy);
    assert!(result.messages.is_empty());
}

#[tokio::test]
async fn server_error_is_unhealthy_without_checks() {
    let port = canned_server("503 Service Unavailable", "text/plain", "overloaded").await;
    let provider = instantiate("api", &http_instance(port, "")).unwrap();

    let result = provider.probe(&ProbeContext::default()).await;
    assert_eq!(result.status, Status::Unhealthy);
    assert!(result.messages[0].contains("503"));
}

#[tokio::test]
async fn json_body_is_exposed_to_checks() {
    let port = canned_server("200 OK", "application/json", "{\"status\":\"ok\",\"shards\":3}").await;

    let mut instance = http_instance(port, "");
    instance.checks = vec![
        platform_health::core::expr::Expression::new("response.json.status == \"ok\""),
        platform_health::core::expr::Expression::new("response.json.shards >= 2"),
    ];
    let provider = instantiate("api", &instance).unwrap();

    let result = provider.probe(&ProbeContext::default()).await;
    assert_eq!(result.status, Status::Healthy, "messages: {:?}", result.messages);
}

#[tokio::test]
async fn failing_check_reports_its_source() {
    let port = canned_server("200 OK", "application/json", "{\"status\":\"degraded\"}").await;

    let mut instance = http_instance(port, "");
    instance.checks = vec![platform_health::core::expr::Expression::new(
        "response.json.status == \"ok\"",
    )];
    let provider = instantiate("api", &instance).unwrap();

    let result = provider.probe(&ProbeContext::default()).await;
    assert_eq!(result.status, Status::Unhealthy);
    assert_eq!(result.messages, vec!["response.json.status == \"ok\"".to_string()]);
}

#[tokio::test]
async fn checks_replace_the_default_status_rule() {
    // With predicates supplied, they alone decide: a 503 that satisfies the
    // checks is healthy, and a non-JSON body surfaces as a null json value.
    let port = canned_server("503 Service Unavailable", "text/plain", "draining").await;

    let mut instance = http_instance(port, "");
    instance.checks = vec![
        platform_health::core::expr::Expression::new("response.status == 503"),
        platform_health::core::expr::Expression::new("response.json == null"),
    ];
    let provider = instantiate("api", &instance).unwrap();

    let result = provider.probe(&ProbeContext::default()).await;
    assert_eq!(result.status, Status::Healthy, "messages: {:?}", result.messages);
}

#[tokio::test]
async fn detail_captures_response_metadata() {
    let port = canned_server("200 OK", "application/json", "{}").await;
    let provider = instantiate("api", &http_instance(port, "  detail: true\n")).unwrap();

    let result = provider.probe(&ProbeContext::default()).await;
    match &result.details[0] {
        platform_health::core::types::Detail::Http(detail) => {
            assert_eq!(detail.status, 200);
            assert_eq!(
                detail.headers.get("content-type").map(String::as_str),
                Some("application/json")
            );
        }
        other => panic!("expected http detail, got {other:?}"),
    }
}
