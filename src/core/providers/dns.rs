//! DNS record probe
//!
//! Resolves one record set using either the system resolver configuration or
//! an explicitly configured server (UDP/TCP on 53, DNS-over-TLS on 853), with
//! optional DNSSEC validation. The answered records become the check context.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;

use crate::core::context::ProbeContext;
use crate::core::expr::{CompiledChecks, Declarations, Expression};
use crate::core::provider::{
    parse_spec, provider_base, InstanceConfig, Provider, SetupError, DEFAULT_PROBE_TIMEOUT,
};
use crate::core::types::{Detail, DnsRecordDetail, ProbeResult};

pub(crate) fn factory() -> Box<dyn Provider> {
    Box::<DnsProvider>::default()
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct DnsSpec {
    pub host: String,
    #[serde(rename = "type")]
    pub record_type: String,
    /// Explicit server; the system resolver is used when empty
    pub server: Option<String>,
    pub port: Option<u16>,
    pub tls: bool,
    #[serde(rename = "serverName")]
    pub server_name: Option<String>,
    pub dnssec: bool,
    pub detail: bool,
}

impl Default for DnsSpec {
    fn default() -> Self {
        Self {
            host: String::new(),
            record_type: "A".into(),
            server: None,
            port: None,
            tls: false,
            server_name: None,
            dnssec: false,
            detail: false,
        }
    }
}

pub struct DnsProvider {
    name: String,
    timeout: Option<Duration>,
    spec: DnsSpec,
    raw_checks: Vec<Expression>,
    checks: CompiledChecks,
    record_type: RecordType,
}

impl Default for DnsProvider {
    fn default() -> Self {
        Self {
            name: String::new(),
            timeout: None,
            spec: DnsSpec::default(),
            raw_checks: Vec::new(),
            checks: CompiledChecks::default(),
            record_type: RecordType::A,
        }
    }
}

impl DnsProvider {
    fn declarations() -> Declarations {
        Declarations::variables(&["records", "dnssec"])
    }

    /// Port auto-selects by transport when not configured: 853 for
    /// DNS-over-TLS, 53 otherwise.
    fn server_port(&self) -> u16 {
        self.spec.port.unwrap_or(if self.spec.tls { 853 } else { 53 })
    }

    async fn resolver(&self) -> Result<TokioAsyncResolver, String> {
        let mut opts = ResolverOpts::default();
        opts.validate = self.spec.dnssec;

        let Some(server) = self.spec.server.as_deref().filter(|s| !s.is_empty()) else {
            let (config, mut system_opts) = hickory_resolver::system_conf::read_system_conf()
                .map_err(|e| format!("system resolver configuration: {e}"))?;
            system_opts.validate = self.spec.dnssec;
            return Ok(TokioAsyncResolver::tokio(config, system_opts));
        };

        let port = self.server_port();
        let addr: SocketAddr = match server.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, port),
            Err(_) => tokio::net::lookup_host((server, port))
                .await
                .map_err(|e| format!("resolve dns server {server:?}: {e}"))?
                .next()
                .ok_or_else(|| format!("resolve dns server {server:?}: no addresses"))?,
        };

        let protocol = if self.spec.tls {
            Protocol::Tls
        } else {
            Protocol::Udp
        };
        let mut name_server = NameServerConfig::new(addr, protocol);
        if self.spec.tls {
            name_server.tls_dns_name = Some(
                self.spec
                    .server_name
                    .clone()
                    .unwrap_or_else(|| server.to_string()),
            );
        }

        let mut config = ResolverConfig::new();
        config.add_name_server(name_server);
        Ok(TokioAsyncResolver::tokio(config, opts))
    }

    fn collect_records(lookup: &hickory_resolver::lookup::Lookup) -> Vec<DnsRecordDetail> {
        lookup
            .record_iter()
            .filter_map(|record| {
                let data = record.data()?;
                let mut detail = DnsRecordDetail {
                    rtype: record.record_type().to_string(),
                    ttl: record.ttl(),
                    value: data.to_string(),
                    target: None,
                    priority: None,
                    weight: None,
                    port: None,
                };
                match data {
                    RData::CNAME(cname) => detail.target = Some(cname.to_string()),
                    RData::NS(ns) => detail.target = Some(ns.to_string()),
                    RData::PTR(ptr) => detail.target = Some(ptr.to_string()),
                    RData::MX(mx) => {
                        detail.target = Some(mx.exchange().to_string());
                        detail.priority = Some(mx.preference());
                    }
                    RData::SRV(srv) => {
                        detail.target = Some(srv.target().to_string());
                        detail.priority = Some(srv.priority());
                        detail.weight = Some(srv.weight());
                        detail.port = Some(srv.port());
                    }
                    _ => {}
                }
                Some(detail)
            })
            .collect()
    }
}

#[async_trait]
impl Provider for DnsProvider {
    provider_base!("dns");

    fn configure(&mut self, instance: &InstanceConfig) -> Result<(), SetupError> {
        self.spec = parse_spec("dns", &instance.spec)?;
        self.raw_checks = instance.checks.clone();
        Ok(())
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        if self.spec.host.is_empty() {
            return Err(SetupError::invalid_spec("dns", "host must be set"));
        }
        self.record_type = RecordType::from_str(&self.spec.record_type.to_uppercase())
            .map_err(|_| {
                SetupError::invalid_spec(
                    "dns",
                    format!("unsupported record type {:?}", self.spec.record_type),
                )
            })?;
        if self.spec.server_name.is_some() && !self.spec.tls {
            return Err(SetupError::invalid_spec(
                "dns",
                "serverName requires tls: true",
            ));
        }
        self.checks = CompiledChecks::compile(&self.raw_checks, &Self::declarations())?;
        self.timeout.get_or_insert(DEFAULT_PROBE_TIMEOUT);
        Ok(())
    }

    async fn probe(&self, _ctx: &ProbeContext) -> ProbeResult {
        let mut result = ProbeResult::new(self.kind(), &self.name);

        let resolver = match self.resolver().await {
            Ok(resolver) => resolver,
            Err(message) => return result.unhealthy_msg(message),
        };

        let lookup = match resolver.lookup(self.spec.host.as_str(), self.record_type).await {
            Ok(lookup) => lookup,
            Err(e) => {
                let message = match e.kind() {
                    ResolveErrorKind::NoRecordsFound { response_code, .. } => format!(
                        "lookup {} {}: response code {}",
                        self.spec.host, self.spec.record_type, response_code
                    ),
                    _ => format!("lookup {} {}: {}", self.spec.host, self.spec.record_type, e),
                };
                return result.unhealthy_msg(message);
            }
        };

        let records = Self::collect_records(&lookup);
        if self.spec.detail {
            result = result.with_detail(Detail::Dns {
                records: records.clone(),
            });
        }

        let dnssec_context = serde_json::json!({
            "enabled": self.spec.dnssec,
            // the validating resolver rejects answers it cannot authenticate,
            // so a successful validated lookup is an authenticated one
            "authenticated": self.spec.dnssec,
        });

        let failures = self.checks.evaluate(|cel| {
            let _ = cel.add_variable("records", &records);
            let _ = cel.add_variable("dnssec", &dnssec_context);
        });

        if failures.is_empty() {
            result.healthy()
        } else {
            result.unhealthy(failures)
        }
    }
}
