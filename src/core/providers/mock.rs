//! Synthetic probe with a scripted outcome
//!
//! Not useful against real infrastructure; exists so hierarchies, fail-fast
//! behavior, and renderers can be exercised without external systems.

use std::time::Duration;

use async_trait::async_trait;

use crate::core::context::ProbeContext;
use crate::core::provider::{parse_spec, provider_base, InstanceConfig, Provider, SetupError};
use crate::core::types::{ProbeResult, Status};

pub(crate) fn factory() -> Box<dyn Provider> {
    Box::<MockProvider>::default()
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct MockSpec {
    pub status: Status,
    /// Simulated probe latency
    #[serde(with = "humantime_serde")]
    pub sleep: Option<Duration>,
    pub messages: Vec<String>,
}

impl Default for MockSpec {
    fn default() -> Self {
        Self {
            status: Status::Healthy,
            sleep: None,
            messages: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MockProvider {
    name: String,
    timeout: Option<Duration>,
    spec: MockSpec,
}

impl MockProvider {
    /// Scripted instance for tests and demo configurations.
    pub fn scripted(name: impl Into<String>, status: Status, sleep: Option<Duration>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            spec: MockSpec {
                status,
                sleep,
                messages: Vec::new(),
            },
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    provider_base!("mock");

    fn configure(&mut self, instance: &InstanceConfig) -> Result<(), SetupError> {
        self.spec = parse_spec("mock", &instance.spec)?;
        Ok(())
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        Ok(())
    }

    async fn probe(&self, _ctx: &ProbeContext) -> ProbeResult {
        if let Some(sleep) = self.spec.sleep {
            tokio::time::sleep(sleep).await;
        }

        let result = ProbeResult::new(self.kind(), &self.name);
        match self.spec.status {
            Status::Healthy => result.healthy(),
            status => {
                let mut result = result.unhealthy(self.spec.messages.iter().cloned());
                result.status = status;
                if result.messages.is_empty() {
                    result.messages.push(format!("mock status {status}"));
                }
                result
            }
        }
    }
}
