//! gRPC health probe
//!
//! Dials the target and calls the standard `grpc.health.v1.Health/Check`
//! rpc. `SERVING` is healthy; any other serving status or transport failure
//! is not.

use std::time::Duration;

use async_trait::async_trait;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

use crate::core::context::ProbeContext;
use crate::core::provider::{
    parse_spec, provider_base, InstanceConfig, Provider, SetupError, DEFAULT_PROBE_TIMEOUT,
};
use crate::core::types::ProbeResult;
use crate::rpc;

pub(crate) fn factory() -> Box<dyn Provider> {
    Box::<GrpcProvider>::default()
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct GrpcSpec {
    pub host: String,
    pub port: u16,
    /// Service name passed to the health rpc; empty checks the server whole
    pub service: Option<String>,
    /// Defaults by port: TLS on 443
    pub tls: Option<bool>,
    pub insecure: bool,
}

#[derive(Debug, Default)]
pub struct GrpcProvider {
    name: String,
    timeout: Option<Duration>,
    spec: GrpcSpec,
}

impl GrpcProvider {
    fn tls_enabled(&self) -> bool {
        self.spec.tls.unwrap_or(self.spec.port == 443)
    }
}

#[async_trait]
impl Provider for GrpcProvider {
    provider_base!("grpc");

    fn configure(&mut self, instance: &InstanceConfig) -> Result<(), SetupError> {
        self.spec = parse_spec("grpc", &instance.spec)?;
        Ok(())
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        if self.spec.host.is_empty() {
            return Err(SetupError::invalid_spec("grpc", "host must be set"));
        }
        if self.spec.port == 0 {
            return Err(SetupError::invalid_spec("grpc", "port must be set"));
        }
        self.timeout.get_or_insert(DEFAULT_PROBE_TIMEOUT);
        Ok(())
    }

    async fn probe(&self, _ctx: &ProbeContext) -> ProbeResult {
        let result = ProbeResult::new(self.kind(), &self.name);

        let channel = match rpc::connect_channel(
            &self.spec.host,
            self.spec.port,
            self.tls_enabled(),
            self.spec.insecure,
        )
        .await
        {
            Ok(channel) => channel,
            Err(e) => {
                return result.unhealthy_msg(format!(
                    "dial grpc {}:{}: {e}",
                    self.spec.host, self.spec.port
                ))
            }
        };

        let mut client = HealthClient::new(channel);
        let request = HealthCheckRequest {
            service: self.spec.service.clone().unwrap_or_default(),
        };

        match client.check(request).await {
            Ok(response) => match response.into_inner().status() {
                ServingStatus::Serving => result.healthy(),
                other => result.unhealthy_msg(format!("serving status {}", other.as_str_name())),
            },
            Err(status) => result.unhealthy_msg(format!(
                "health check rpc failed: {} ({})",
                status.message(),
                status.code()
            )),
        }
    }
}
