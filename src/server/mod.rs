//! RPC server facade
//!
//! Exposes the configured probe tree as the `PlatformHealth/Check` rpc. Each
//! request is translated into a probe context; the server's own identifier is
//! appended to the delegation hops so mutually-delegating aggregators detect
//! cycles by string equality, before any probing starts.

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::{Request, Response};
use tracing::{info, warn};

use crate::core::context::{ComponentPath, ProbeContext};
use crate::core::provider::Provider;
use crate::core::types::{Detail, LoopDetail, ProbeResult, Status};
use crate::rpc::proto::platform_health_server::{PlatformHealth, PlatformHealthServer};
use crate::rpc::proto::{HealthCheckRequest, HealthCheckResponse};
use crate::rpc::to_wire;

/// Identifier used for loop detection when none is configured.
pub fn default_server_id(port: u16) -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".into());
    format!("{host}:{port}")
}

pub struct PlatformHealthService {
    root: Arc<dyn Provider>,
    server_id: String,
    parallelism: i64,
}

impl PlatformHealthService {
    /// The `server_id` must be explicit so tests and deployments control the
    /// identity that loop detection compares.
    pub fn new(root: Arc<dyn Provider>, server_id: impl Into<String>) -> Self {
        Self {
            root,
            server_id: server_id.into(),
            parallelism: 0,
        }
    }

    pub fn with_parallelism(mut self, parallelism: i64) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// A request whose hops already contain this server closed a delegation
    /// cycle; answer immediately without probing.
    fn loop_response(&self, hops: &[String]) -> ProbeResult {
        let mut chain = hops.to_vec();
        chain.push(self.server_id.clone());
        warn!(server_id = %self.server_id, chain = ?chain, "delegation loop detected");

        let mut result = ProbeResult::new("system", self.root.name());
        result.status = Status::LoopDetected;
        result.server_id = Some(self.server_id.clone());
        result
            .messages
            .push(format!("delegation loop detected at {:?}", self.server_id));
        result.with_detail(Detail::Loop(LoopDetail { server_ids: chain }))
    }
}

#[tonic::async_trait]
impl PlatformHealth for PlatformHealthService {
    async fn check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, tonic::Status> {
        let request = request.into_inner();

        if request.hops.iter().any(|hop| hop == &self.server_id) {
            return Ok(Response::new(to_wire(&self.loop_response(&request.hops))));
        }

        let mut hops = request.hops;
        hops.push(self.server_id.clone());

        let paths: Vec<ComponentPath> = request
            .components
            .iter()
            .filter_map(|p| p.parse().ok())
            .filter(|p: &ComponentPath| !p.is_empty())
            .collect();

        let ctx = ProbeContext::new(self.parallelism, request.fail_fast)
            .with_hops(hops)
            .with_component_paths(paths);

        let result = self.root.probe(&ctx).await;
        Ok(Response::new(to_wire(&result)))
    }
}

/// Run the aggregator until ctrl-c.
pub async fn serve(
    addr: SocketAddr,
    service: PlatformHealthService,
) -> Result<(), tonic::transport::Error> {
    info!(%addr, server_id = %service.server_id, "starting aggregator");
    tonic::transport::Server::builder()
        .add_service(PlatformHealthServer::new(service))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
}
