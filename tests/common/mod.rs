//! Shared test doubles
//!
//! `ScriptedProbe` is a provider with a predetermined outcome and latency,
//! plus an optional in-flight gauge so tests can observe how many probes the
//! scheduler actually runs concurrently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use platform_health::core::context::ProbeContext;
use platform_health::core::provider::{InstanceConfig, Provider, SetupError};
use platform_health::core::types::{ProbeResult, Status};

/// Tracks the maximum number of concurrently running probes.
#[derive(Default)]
pub struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max_seen(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

pub struct ScriptedProbe {
    name: String,
    timeout: Option<Duration>,
    status: Status,
    sleep: Duration,
    gauge: Option<Arc<Gauge>>,
}

impl ScriptedProbe {
    pub fn new(name: &str, status: Status, sleep: Duration) -> Self {
        Self {
            name: name.to_string(),
            timeout: None,
            status,
            sleep,
            gauge: None,
        }
    }

    pub fn with_gauge(mut self, gauge: Arc<Gauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn boxed(self) -> Box<dyn Provider> {
        Box::new(self)
    }
}

#[async_trait]
impl Provider for ScriptedProbe {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn configure(&mut self, _instance: &InstanceConfig) -> Result<(), SetupError> {
        Ok(())
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        Ok(())
    }

    async fn probe(&self, _ctx: &ProbeContext) -> ProbeResult {
        if let Some(gauge) = &self.gauge {
            gauge.enter();
        }
        tokio::time::sleep(self.sleep).await;
        if let Some(gauge) = &self.gauge {
            gauge.exit();
        }

        let result = ProbeResult::new(self.kind(), &self.name);
        match self.status {
            Status::Healthy => result.healthy(),
            status => {
                let mut result = result.unhealthy_msg(format!("scripted status {status}"));
                result.status = status;
                result
            }
        }
    }
}
