/*!
platform-health - distributed platform health aggregator.

Probes a declarative tree of heterogeneous targets (DNS, TCP, TLS, HTTP(S),
gRPC health services, Kubernetes resources, Vault clusters, and other
aggregators) and composes the outcomes into one hierarchical, worst-wins
result. Usable as a library, as the `ph` CLI, or as a long-running gRPC
aggregator that other instances can delegate to.

## Layout

- [`core::types`] - the result tree (status, messages, typed details)
- [`core::context`] - per-request carrier: cancellation, hops, paths,
  concurrency budget
- [`core::expr`] - CEL check predicates
- [`core::provider`] / [`core::providers`] - the probe implementations
- [`core::scheduler`] - bounded-parallel fan-out
- [`rpc`] / [`server`] - wire schema and the aggregator rpc
- [`config`], [`render`], [`cli`] - the CLI surface
*/

pub mod cli;
pub mod config;
pub mod core;
pub mod render;
pub mod rpc;
pub mod server;
