//! Wire schema and gRPC plumbing
//!
//! Holds the generated `platformhealth.v1` types, the conversions between the
//! wire `HealthCheckResponse` and the in-memory [`ProbeResult`], and the
//! channel builder shared by the satellite and grpc providers.
//!
//! Detail payloads travel as `{type_tag, payload_bytes}` where the payload is
//! the JSON encoding of the typed variant. Receivers dispatch on the tag and
//! skip tags they do not know, so aggregators of different versions can still
//! delegate to each other.

use std::time::Duration;

use tonic::transport::{Channel, ClientTlsConfig, Endpoint, Uri};
use tracing::warn;

use crate::core::types::{Detail, ProbeResult, Status};

pub mod proto {
    tonic::include_proto!("platformhealth.v1");
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),
    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),
}

impl From<Status> for proto::Status {
    fn from(status: Status) -> Self {
        match status {
            Status::Healthy => proto::Status::Healthy,
            Status::Unhealthy => proto::Status::Unhealthy,
            Status::LoopDetected => proto::Status::LoopDetected,
            Status::Unknown => proto::Status::Unknown,
        }
    }
}

impl From<proto::Status> for Status {
    fn from(status: proto::Status) -> Self {
        match status {
            proto::Status::Healthy => Status::Healthy,
            proto::Status::Unhealthy => Status::Unhealthy,
            proto::Status::LoopDetected => Status::LoopDetected,
            proto::Status::Unknown => Status::Unknown,
        }
    }
}

/// Encode a probe result into the wire response.
pub fn to_wire(result: &ProbeResult) -> proto::HealthCheckResponse {
    proto::HealthCheckResponse {
        kind: result.kind.clone(),
        name: result.name.clone(),
        status: proto::Status::from(result.status) as i32,
        messages: result.messages.clone(),
        details: result
            .details
            .iter()
            .filter_map(|detail| {
                let payload = serde_json::to_vec(detail).ok()?;
                Some(proto::Detail {
                    r#type: detail.tag().to_string(),
                    payload,
                })
            })
            .collect(),
        duration_ns: result.duration.as_nanos().min(u128::from(u64::MAX)) as u64,
        server_id: result.server_id.clone().unwrap_or_default(),
        components: result.components.iter().map(to_wire).collect(),
        fail_fast_triggered: result.fail_fast_triggered,
    }
}

/// Decode a wire response into a probe result. Unknown detail tags are
/// dropped with a warning rather than failing the whole response.
pub fn from_wire(response: proto::HealthCheckResponse) -> ProbeResult {
    let status = proto::Status::try_from(response.status)
        .map(Status::from)
        .unwrap_or(Status::Unknown);

    let details = response
        .details
        .into_iter()
        .filter_map(|detail| match serde_json::from_slice::<Detail>(&detail.payload) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(tag = %detail.r#type, error = %e, "dropping undecodable detail payload");
                None
            }
        })
        .collect();

    ProbeResult {
        kind: response.kind,
        name: response.name,
        status,
        messages: response.messages,
        details,
        duration: Duration::from_nanos(response.duration_ns),
        server_id: (!response.server_id.is_empty()).then_some(response.server_id),
        components: response.components.into_iter().map(from_wire).collect(),
        fail_fast_triggered: response.fail_fast_triggered,
    }
}

/// Whether an aggregator port conventionally speaks TLS.
pub fn tls_by_port(port: u16) -> bool {
    matches!(port, 443 | 8443)
}

/// Open a client channel to another gRPC endpoint.
///
/// `insecure` keeps TLS but skips certificate verification; that path dials
/// through an explicit rustls connector because tonic's own TLS config only
/// verifies.
pub async fn connect_channel(
    host: &str,
    port: u16,
    tls: bool,
    insecure: bool,
) -> Result<Channel, RpcError> {
    let authority = format!("{host}:{port}");

    if !tls {
        let endpoint = Endpoint::try_from(format!("http://{authority}"))
            .map_err(|_| RpcError::InvalidEndpoint(authority.clone()))?;
        return Ok(endpoint.connect().await?);
    }

    if !insecure {
        let tls_config = ClientTlsConfig::new()
            .with_native_roots()
            .domain_name(host.to_string());
        let endpoint = Endpoint::try_from(format!("https://{authority}"))
            .map_err(|_| RpcError::InvalidEndpoint(authority.clone()))?
            .tls_config(tls_config)?;
        return Ok(endpoint.connect().await?);
    }

    let mut config = crate::core::providers::tls::insecure_client_config();
    config.alpn_protocols = vec![b"h2".to_vec()];
    let connector = tokio_rustls::TlsConnector::from(std::sync::Arc::new(config));
    let dial_host = host.to_string();
    let dial_authority = authority.clone();

    let endpoint = Endpoint::try_from(format!("https://{authority}"))
        .map_err(|_| RpcError::InvalidEndpoint(authority.clone()))?;
    let channel = endpoint
        .connect_with_connector(tower::service_fn(move |_: Uri| {
            let connector = connector.clone();
            let host = dial_host.clone();
            let authority = dial_authority.clone();
            async move {
                let server_name = rustls::pki_types::ServerName::try_from(host)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
                let tcp = tokio::net::TcpStream::connect(authority.as_str()).await?;
                let tls = connector.connect(server_name, tcp).await?;
                Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(tls))
            }
        }))
        .await?;
    Ok(channel)
}
