//! Per-request probe context
//!
//! An immutable carrier threaded through every nested probe call:
//! - cancellation token shared by the whole request (root deadline, caller
//!   abort, fail-fast all fire the same token)
//! - concurrency limiter shared by every container level, so nested systems
//!   never multiply the in-flight probe budget
//! - delegation hops for cross-aggregator loop detection
//! - component paths selecting a subset of the tree

use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

/// A sequence of child names descending the probe tree, e.g. `infra/db`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentPath(Vec<String>);

impl ComponentPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// First segment, i.e. the child name this path selects at the current
    /// container level.
    pub fn head(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Path with the head removed, for routing into the matched child.
    /// `None` when the path selected the child whole.
    pub fn rebase(&self) -> Option<ComponentPath> {
        if self.0.len() > 1 {
            Some(ComponentPath(self.0[1..].to_vec()))
        } else {
            None
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for ComponentPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ComponentPath(
            s.split('/')
                .filter(|seg| !seg.is_empty())
                .map(str::to_owned)
                .collect(),
        ))
    }
}

impl std::fmt::Display for ComponentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Resolve the requested parallelism into a permit count.
///
/// Positive values bound in-flight probes to exactly that many; `0` falls
/// back to the host's concurrency budget; negative means unbounded.
pub fn parallelism_limit(parallelism: i64) -> usize {
    match parallelism {
        p if p > 0 => p as usize,
        0 => std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4),
        _ => Semaphore::MAX_PERMITS,
    }
}

/// Immutable per-request values threaded through every probe call.
///
/// Cloning is cheap; the `with_*` builders return a derived context and never
/// mutate the original. The cancellation token and the concurrency limiter
/// are shared across all derived contexts of one request.
#[derive(Debug, Clone)]
pub struct ProbeContext {
    token: CancellationToken,
    parallelism: i64,
    limiter: Arc<Semaphore>,
    fail_fast: bool,
    hops: Vec<String>,
    component_paths: Vec<ComponentPath>,
}

impl ProbeContext {
    /// Root context for a new request.
    pub fn new(parallelism: i64, fail_fast: bool) -> Self {
        Self {
            token: CancellationToken::new(),
            parallelism,
            limiter: Arc::new(Semaphore::new(parallelism_limit(parallelism))),
            fail_fast,
            hops: Vec::new(),
            component_paths: Vec::new(),
        }
    }

    pub fn parallelism(&self) -> i64 {
        self.parallelism
    }

    /// Rebuild the shared limiter for a different parallelism budget.
    /// Only meaningful at the root of a request, before fan-out begins.
    pub fn with_parallelism(mut self, parallelism: i64) -> Self {
        self.parallelism = parallelism;
        self.limiter = Arc::new(Semaphore::new(parallelism_limit(parallelism)));
        self
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn hops(&self) -> &[String] {
        &self.hops
    }

    pub fn with_hops(mut self, hops: Vec<String>) -> Self {
        self.hops = hops;
        self
    }

    pub fn component_paths(&self) -> &[ComponentPath] {
        &self.component_paths
    }

    pub fn with_component_paths(mut self, paths: Vec<ComponentPath>) -> Self {
        self.component_paths = paths;
        self
    }

    /// Fire the shared cancellation handle for this request.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when the request is canceled (deadline, caller abort, or
    /// fail-fast).
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Acquire a slot from the shared concurrency limiter.
    pub async fn acquire(&self) -> Option<SemaphorePermit<'_>> {
        self.limiter.acquire().await.ok()
    }

    /// Number of limiter permits currently free. Test observability only.
    pub fn available_slots(&self) -> usize {
        self.limiter.available_permits()
    }
}

impl Default for ProbeContext {
    fn default() -> Self {
        Self::new(0, false)
    }
}
