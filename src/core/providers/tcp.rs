//! TCP reachability probe

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::core::context::ProbeContext;
use crate::core::provider::{
    parse_spec, provider_base, InstanceConfig, Provider, SetupError, DEFAULT_PROBE_TIMEOUT,
};
use crate::core::types::ProbeResult;

pub(crate) fn factory() -> Box<dyn Provider> {
    Box::<TcpProvider>::default()
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct TcpSpec {
    pub host: String,
    pub port: u16,
    /// Expect the port to be closed: unreachable is healthy, reachable is not
    pub closed: bool,
}

#[derive(Debug, Default)]
pub struct TcpProvider {
    name: String,
    timeout: Option<Duration>,
    spec: TcpSpec,
}

#[async_trait]
impl Provider for TcpProvider {
    provider_base!("tcp");

    fn configure(&mut self, instance: &InstanceConfig) -> Result<(), SetupError> {
        self.spec = parse_spec("tcp", &instance.spec)?;
        Ok(())
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        if self.spec.host.is_empty() {
            return Err(SetupError::invalid_spec("tcp", "host must be set"));
        }
        if self.spec.port == 0 {
            return Err(SetupError::invalid_spec("tcp", "port must be set"));
        }
        self.timeout.get_or_insert(DEFAULT_PROBE_TIMEOUT);
        Ok(())
    }

    async fn probe(&self, _ctx: &ProbeContext) -> ProbeResult {
        let result = ProbeResult::new(self.kind(), &self.name);
        let addr = (self.spec.host.as_str(), self.spec.port);

        match TcpStream::connect(addr).await {
            Ok(_) if self.spec.closed => result.unhealthy_msg(format!(
                "port {}:{} is open, expected closed",
                self.spec.host, self.spec.port
            )),
            Ok(_) => result.healthy(),
            Err(_) if self.spec.closed => result.healthy(),
            Err(e) => result.unhealthy_msg(format!(
                "dial tcp {}:{}: {}",
                self.spec.host, self.spec.port, e
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::InstanceConfig;

    fn provider(host: &str, port: u16, closed: bool) -> TcpProvider {
        let mut provider = TcpProvider {
            name: "test".into(),
            ..Default::default()
        };
        let instance = InstanceConfig {
            kind: "tcp".into(),
            spec: serde_yaml::to_value(serde_yaml::Mapping::from_iter([
                ("host".into(), host.into()),
                ("port".into(), port.into()),
                ("closed".into(), closed.into()),
            ]))
            .unwrap(),
            ..Default::default()
        };
        provider.configure(&instance).unwrap();
        provider.setup().unwrap();
        provider
    }

    #[test]
    fn setup_rejects_missing_host() {
        let mut p = TcpProvider::default();
        p.configure(&InstanceConfig::default()).unwrap();
        assert!(p.setup().is_err());
    }

    #[test]
    fn setup_injects_default_timeout() {
        let p = provider("localhost", 80, false);
        assert_eq!(p.timeout(), Some(DEFAULT_PROBE_TIMEOUT));
    }

    #[tokio::test]
    async fn open_port_is_healthy() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let p = provider("127.0.0.1", port, false);

        let result = p.probe(&ProbeContext::default()).await;
        assert_eq!(result.status, crate::core::types::Status::Healthy);
        assert!(result.messages.is_empty());
    }

    #[tokio::test]
    async fn open_port_with_closed_expectation_is_unhealthy() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let p = provider("127.0.0.1", port, true);

        let result = p.probe(&ProbeContext::default()).await;
        assert_eq!(result.status, crate::core::types::Status::Unhealthy);
        assert!(result.messages[0].contains("expected closed"));
    }

    #[tokio::test]
    async fn closed_port_with_closed_expectation_is_healthy() {
        // Port 1 is practically never listening on a test host
        let p = provider("127.0.0.1", 1, true);
        let result = p.probe(&ProbeContext::default()).await;
        assert_eq!(result.status, crate::core::types::Status::Healthy);
    }
}
