//! Probe providers
//!
//! One module per provider kind. `builtin` assembles the process-wide
//! `kind -> factory` registry consumed by [`crate::core::provider::registry`].

pub mod dns;
pub mod grpc;
pub mod http;
pub mod kstatus;
pub mod kubernetes;
pub mod mock;
pub mod satellite;
pub mod system;
pub mod tcp;
pub mod tls;
pub mod vault;

use std::collections::HashMap;

use crate::core::provider::Factory;

pub(crate) fn builtin() -> HashMap<&'static str, Factory> {
    HashMap::from([
        ("dns", dns::factory as Factory),
        ("grpc", grpc::factory as Factory),
        ("http", http::factory as Factory),
        ("kubernetes", kubernetes::factory as Factory),
        ("mock", mock::factory as Factory),
        ("satellite", satellite::factory as Factory),
        ("system", system::factory as Factory),
        ("tcp", tcp::factory as Factory),
        ("tls", tls::factory as Factory),
        ("vault", vault::factory as Factory),
    ])
}
