//! Container node
//!
//! A `system` groups child instances of any kind. Its probe result is
//! composed from the children: the scheduler fans them out under the shared
//! concurrency limiter and the aggregate status is worst-wins.
//!
//! Component-path filtering is routed here: each container consumes the first
//! segment of every requested path, probes only the matched children, and
//! passes the rebased remainder down. Paths naming no child fail the whole
//! node with the invalid names.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use crate::core::context::{ComponentPath, ProbeContext};
use crate::core::provider::{
    instantiate, provider_base, ComponentMap, Container, InstanceConfig, Provider, SetupError,
};
use crate::core::scheduler::{self, Target};
use crate::core::types::{ProbeResult, Status};

pub(crate) fn factory() -> Box<dyn Provider> {
    Box::<SystemProvider>::default()
}

#[derive(Default)]
pub struct SystemProvider {
    name: String,
    timeout: Option<Duration>,
    raw_children: ComponentMap,
    children: Vec<Box<dyn Provider>>,
    child_errors: Vec<SetupError>,
}

impl SystemProvider {
    /// Container over already-built children. Used by the root constructor
    /// and by tests that script their own providers.
    pub fn with_children(name: impl Into<String>, children: Vec<Box<dyn Provider>>) -> Self {
        Self {
            name: name.into(),
            timeout: None,
            raw_children: ComponentMap::default(),
            children,
            child_errors: Vec::new(),
        }
    }

    /// Build the root container for a loaded configuration.
    ///
    /// Fatal errors (bad specs, unknown kinds, invalid predicates) propagate;
    /// the caller decides what to do with the non-fatal `child_errors`.
    pub fn root(components: &ComponentMap) -> Result<Self, SetupError> {
        let mut root = SystemProvider {
            name: "platform-health".into(),
            raw_children: components.clone(),
            ..Default::default()
        };
        root.setup()?;
        Ok(root)
    }

    /// Route the requested component paths onto children.
    ///
    /// Returns either the per-child path assignment (`None` tail set means
    /// "matched whole, probe everything below") or the list of path heads
    /// that matched no child.
    fn route_paths(
        &self,
        paths: &[ComponentPath],
    ) -> Result<Vec<(usize, Vec<ComponentPath>, bool)>, Vec<String>> {
        let mut routed: Vec<(usize, Vec<ComponentPath>, bool)> = Vec::new();
        let mut invalid = Vec::new();

        for path in paths {
            let Some(head) = path.head() else { continue };
            let Some(idx) = self.children.iter().position(|c| c.name() == head) else {
                invalid.push(head.to_string());
                continue;
            };

            let entry = match routed.iter_mut().find(|(i, _, _)| *i == idx) {
                Some(entry) => entry,
                None => {
                    routed.push((idx, Vec::new(), false));
                    routed.last_mut().expect("just pushed")
                }
            };
            match path.rebase() {
                Some(tail) => entry.1.push(tail),
                None => entry.2 = true,
            }
        }

        if invalid.is_empty() {
            routed.sort_by_key(|(idx, _, _)| *idx);
            Ok(routed)
        } else {
            Err(invalid)
        }
    }
}

#[async_trait]
impl Provider for SystemProvider {
    provider_base!("system");

    fn configure(&mut self, instance: &InstanceConfig) -> Result<(), SetupError> {
        self.raw_children = instance.components.clone();
        Ok(())
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        let raw = std::mem::take(&mut self.raw_children);
        for (child_name, child_config) in raw.0 {
            match instantiate(&child_name, &child_config) {
                Ok(child) => self.children.push(child),
                Err(e) if is_fatal(&e) => {
                    return Err(SetupError::Child {
                        name: child_name,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(component = %child_name, error = %e, "skipping component: setup failed");
                    self.child_errors.push(SetupError::Child {
                        name: child_name,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(())
    }

    async fn probe(&self, ctx: &ProbeContext) -> ProbeResult {
        let start = Instant::now();
        let mut result = ProbeResult::new(self.kind(), &self.name);

        let targets = if ctx.component_paths().is_empty() {
            self.children
                .iter()
                .map(|child| Target::new(child.as_ref()))
                .collect()
        } else {
            match self.route_paths(ctx.component_paths()) {
                Ok(routed) => routed
                    .into_iter()
                    .map(|(idx, tails, whole)| {
                        let paths = if whole { Vec::new() } else { tails };
                        Target::new(self.children[idx].as_ref()).with_paths(paths)
                    })
                    .collect(),
                Err(invalid) => {
                    let mut result = result.unhealthy(
                        invalid
                            .iter()
                            .map(|name| format!("component {name:?} not found")),
                    );
                    result.duration = start.elapsed();
                    return result;
                }
            }
        };

        let (components, status) = scheduler::evaluate(ctx, targets).await;
        result.components = components;
        result.status = status;

        // A loop detected anywhere below carries the identifier of the
        // aggregator that closed the cycle; keep it visible at this level.
        if status == Status::LoopDetected {
            result.server_id = result
                .components
                .iter()
                .find_map(|child| child.server_id.clone());
        }

        if ctx.fail_fast() && status > Status::Healthy {
            result.fail_fast_triggered = true;
            result
                .messages
                .push("fail-fast: remaining sibling probes were canceled".into());
        }

        result.duration = start.elapsed();
        result
    }

    fn as_container(&self) -> Option<&dyn Container> {
        Some(self)
    }

    fn occupies_slot(&self) -> bool {
        false
    }
}

impl Container for SystemProvider {
    fn children(&self) -> &[Box<dyn Provider>] {
        &self.children
    }

    fn child_errors(&self) -> &[SetupError] {
        &self.child_errors
    }
}

/// Errors that must abort startup even when found in a child. Resolution
/// problems (a kind no registered provider claims) are collected and reported
/// instead; invalid specs and bad predicates stay fatal wherever they occur.
fn is_fatal(err: &SetupError) -> bool {
    match err {
        SetupError::Check(_) | SetupError::InvalidSpec { .. } => true,
        SetupError::Child { source, .. } => is_fatal(source),
        SetupError::UnknownKind(_) => false,
    }
}
