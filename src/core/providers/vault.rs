//! HashiCorp Vault probe
//!
//! Queries the cluster health endpoint; a Vault is healthy when it is
//! initialized and unsealed. Standby codes count as healthy: a standby node
//! is by definition initialized and unsealed.

use std::time::Duration;

use async_trait::async_trait;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;

use crate::core::context::ProbeContext;
use crate::core::provider::{
    parse_spec, provider_base, InstanceConfig, Provider, SetupError, DEFAULT_PROBE_TIMEOUT,
};
use crate::core::types::ProbeResult;

pub(crate) fn factory() -> Box<dyn Provider> {
    Box::<VaultProvider>::default()
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct VaultSpec {
    pub address: String,
    pub insecure: bool,
}

#[derive(Default)]
pub struct VaultProvider {
    name: String,
    timeout: Option<Duration>,
    spec: VaultSpec,
    client: Option<VaultClient>,
}

#[async_trait]
impl Provider for VaultProvider {
    provider_base!("vault");

    fn configure(&mut self, instance: &InstanceConfig) -> Result<(), SetupError> {
        self.spec = parse_spec("vault", &instance.spec)?;
        Ok(())
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        if self.spec.address.is_empty() {
            return Err(SetupError::invalid_spec("vault", "address must be set"));
        }
        url::Url::parse(&self.spec.address)
            .map_err(|e| SetupError::invalid_spec("vault", format!("address: {e}")))?;
        let timeout = *self.timeout.get_or_insert(DEFAULT_PROBE_TIMEOUT);

        let settings = VaultClientSettingsBuilder::default()
            .address(self.spec.address.as_str())
            .verify(!self.spec.insecure)
            .timeout(Some(timeout))
            .build()
            .map_err(|e| SetupError::invalid_spec("vault", e.to_string()))?;
        let client = VaultClient::new(settings)
            .map_err(|e| SetupError::invalid_spec("vault", e.to_string()))?;
        self.client = Some(client);
        Ok(())
    }

    async fn probe(&self, _ctx: &ProbeContext) -> ProbeResult {
        let result = ProbeResult::new(self.kind(), &self.name);
        let Some(client) = &self.client else {
            return result.unhealthy_msg("provider was not set up");
        };

        match vaultrs::sys::health(client).await {
            Ok(health) if health.initialized && !health.sealed => result.healthy(),
            Ok(health) if !health.initialized => result.unhealthy_msg("vault is not initialized"),
            Ok(_) => result.unhealthy_msg("vault is sealed"),
            // The health endpoint signals non-active states through status
            // codes: 429 standby, 472 DR secondary, 473 performance standby.
            Err(ClientError::APIError { code, .. }) if matches!(code, 429 | 472 | 473) => {
                result.healthy()
            }
            Err(ClientError::APIError { code: 501, .. }) => {
                result.unhealthy_msg("vault is not initialized")
            }
            Err(ClientError::APIError { code: 503, .. }) => result.unhealthy_msg("vault is sealed"),
            Err(e) => result.unhealthy_msg(format!("vault health query failed: {e}")),
        }
    }
}
