//! Remote aggregator delegation
//!
//! A satellite's "children" live in another aggregator reached over the
//! PlatformHealth rpc. The current hops travel with the request so the
//! remote side can detect delegation cycles; its answer is re-rooted under
//! this node's name so the local hierarchy stays intact.

use std::time::Duration;

use async_trait::async_trait;

use crate::core::context::ProbeContext;
use crate::core::provider::{
    parse_spec, provider_base, InstanceConfig, Provider, SetupError, DEFAULT_PROBE_TIMEOUT,
};
use crate::core::types::ProbeResult;
use crate::rpc::{self, proto};

pub(crate) fn factory() -> Box<dyn Provider> {
    Box::<SatelliteProvider>::default()
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct SatelliteSpec {
    pub host: String,
    /// TLS auto-enables on 443/8443
    pub port: u16,
    pub insecure: bool,
    /// Allow-list of remote sub-components; empty allows everything
    pub components: Vec<String>,
    pub fail_fast: bool,
}

impl Default for SatelliteSpec {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8080,
            insecure: false,
            components: Vec::new(),
            fail_fast: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct SatelliteProvider {
    name: String,
    timeout: Option<Duration>,
    spec: SatelliteSpec,
}

impl SatelliteProvider {
    /// Component paths forwarded to the remote aggregator:
    /// - none supplied: the configured allow-list, verbatim
    /// - supplied without an allow-list: the supplied paths, verbatim
    /// - both: the supplied paths, each of which must start inside the
    ///   allow-list; a mismatch fails the whole probe
    fn effective_components(&self, ctx: &ProbeContext) -> Result<Vec<String>, String> {
        let supplied: Vec<String> = ctx
            .component_paths()
            .iter()
            .filter(|p| !p.is_empty())
            .map(ToString::to_string)
            .collect();

        if supplied.is_empty() {
            return Ok(self.spec.components.clone());
        }
        if self.spec.components.is_empty() {
            return Ok(supplied);
        }

        for path in &supplied {
            let head = path.split('/').next().unwrap_or(path);
            if !self.spec.components.iter().any(|allowed| allowed == head) {
                return Err(format!("component {head:?} not allowed"));
            }
        }
        Ok(supplied)
    }
}

#[async_trait]
impl Provider for SatelliteProvider {
    provider_base!("satellite");

    fn configure(&mut self, instance: &InstanceConfig) -> Result<(), SetupError> {
        self.spec = parse_spec("satellite", &instance.spec)?;
        Ok(())
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        if self.spec.host.is_empty() {
            return Err(SetupError::invalid_spec("satellite", "host must be set"));
        }
        if self.spec.port == 0 {
            return Err(SetupError::invalid_spec("satellite", "port must be set"));
        }
        self.timeout.get_or_insert(DEFAULT_PROBE_TIMEOUT);
        Ok(())
    }

    async fn probe(&self, ctx: &ProbeContext) -> ProbeResult {
        let mut result = ProbeResult::new(self.kind(), &self.name);

        let components = match self.effective_components(ctx) {
            Ok(components) => components,
            Err(message) => return result.unhealthy_msg(message),
        };

        let channel = match rpc::connect_channel(
            &self.spec.host,
            self.spec.port,
            rpc::tls_by_port(self.spec.port),
            self.spec.insecure,
        )
        .await
        {
            Ok(channel) => channel,
            Err(e) => {
                return result.unhealthy_msg(format!(
                    "dial aggregator {}:{}: {e}",
                    self.spec.host, self.spec.port
                ))
            }
        };

        let mut client = proto::platform_health_client::PlatformHealthClient::new(channel);
        let request = proto::HealthCheckRequest {
            components,
            hops: ctx.hops().to_vec(),
            fail_fast: self.spec.fail_fast || ctx.fail_fast(),
        };

        let response = match client.check(request).await {
            Ok(response) => response.into_inner(),
            Err(status) => {
                return result.unhealthy_msg(format!(
                    "remote probe failed: {} ({})",
                    status.message(),
                    status.code()
                ))
            }
        };

        // Re-root the remote tree under this node's name; loop information
        // (status + server_id) propagates unchanged.
        let remote = rpc::from_wire(response);
        result.status = remote.status;
        result.messages = remote.messages;
        result.details = remote.details;
        result.components = remote.components;
        result.server_id = remote.server_id;
        result.fail_fast_triggered = remote.fail_fast_triggered;
        result
    }
}
