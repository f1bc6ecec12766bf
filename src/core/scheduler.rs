//! Bounded-parallel probe fan-out
//!
//! Containers hand their (possibly filtered) children to [`evaluate`], which
//! runs them concurrently under the request's shared limiter and aggregates
//! statuses worst-wins. Guarantees:
//!
//! - at most `parallelism_limit(ctx.parallelism)` slot-holding probes run at
//!   any instant, across all nesting levels
//! - each probe gets its own derived context; a per-instance timeout bounds
//!   that probe only and never widens the request deadline
//! - results carry per-probe wall-clock durations
//! - fail-fast fires the shared cancellation token on the first non-healthy
//!   result; in-flight probes observe it and aborted probes may be absent
//!   from the returned list
//! - the wait terminates once every dispatched probe returned or the request
//!   was canceled

use std::time::Instant;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::debug;

use crate::core::context::{ComponentPath, ProbeContext};
use crate::core::provider::Provider;
use crate::core::types::{worst_status, ProbeResult, Status};

/// One schedulable child: a provider plus the component paths routed to it.
pub struct Target<'a> {
    pub provider: &'a dyn Provider,
    pub paths: Vec<ComponentPath>,
}

impl<'a> Target<'a> {
    pub fn new(provider: &'a dyn Provider) -> Self {
        Self {
            provider,
            paths: Vec::new(),
        }
    }

    pub fn with_paths(mut self, paths: Vec<ComponentPath>) -> Self {
        self.paths = paths;
        self
    }
}

/// Probe every target concurrently and aggregate the outcome.
///
/// The returned status is the worst of the individual statuses, `Healthy`
/// for an empty target list. Relative result ordering follows completion and
/// is not guaranteed under parallelism.
pub async fn evaluate(
    ctx: &ProbeContext,
    targets: Vec<Target<'_>>,
) -> (Vec<ProbeResult>, Status) {
    let mut in_flight: FuturesUnordered<_> = targets
        .into_iter()
        .map(|target| run_one(ctx, target))
        .collect();

    let mut results = Vec::with_capacity(in_flight.len());
    while let Some(outcome) = in_flight.next().await {
        let Some(result) = outcome else { continue };
        let failed = result.status > Status::Healthy;
        results.push(result);
        if failed && ctx.fail_fast() && !ctx.is_cancelled() {
            debug!("fail-fast: canceling remaining probes");
            ctx.cancel();
        }
    }

    let status = worst_status(&results);
    (results, status)
}

/// Run a single probe under the shared limiter, its own timeout, and the
/// request's cancellation handle. Returns `None` when the probe was aborted
/// before producing a result.
async fn run_one(ctx: &ProbeContext, target: Target<'_>) -> Option<ProbeResult> {
    let provider = target.provider;

    // Containers skip the limiter: they only fan out, and parking a slot
    // across the wait for their children would deadlock small budgets.
    let _permit = if provider.occupies_slot() {
        tokio::select! {
            permit = ctx.acquire() => Some(permit?),
            () = ctx.cancelled() => return None,
        }
    } else {
        if ctx.is_cancelled() {
            return None;
        }
        None
    };

    let child_ctx = ctx.clone().with_component_paths(target.paths);
    let start = Instant::now();

    let timeout = provider.timeout().filter(|t| !t.is_zero());
    let mut result = match timeout {
        Some(limit) => tokio::select! {
            () = ctx.cancelled() => return None,
            outcome = tokio::time::timeout(limit, provider.probe(&child_ctx)) => match outcome {
                Ok(result) => result,
                Err(_) => ProbeResult::new(provider.kind(), provider.name()).unhealthy_msg(
                    format!("probe timed out after {}", humantime::format_duration(limit)),
                ),
            },
        },
        None => tokio::select! {
            () = ctx.cancelled() => return None,
            result = provider.probe(&child_ctx) => result,
        },
    };

    result.duration = start.elapsed();
    Some(result)
}
