// Core types for the probe result tree
use std::time::Duration;

/// Aggregate health outcome of a single probe node.
///
/// The variant order defines worst-wins aggregation: a container's status is
/// the `max` of its children's statuses.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Probe target responded and passed every check
    #[default]
    Healthy,
    /// Probe target unreachable, unhealthy, or failed a check
    Unhealthy,
    /// A delegation cycle between aggregators was detected
    LoopDetected,
    /// Probe could not produce a determination
    Unknown,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Healthy => write!(f, "healthy"),
            Status::Unhealthy => write!(f, "unhealthy"),
            Status::LoopDetected => write!(f, "loop detected"),
            Status::Unknown => write!(f, "unknown"),
        }
    }
}

/// Worst status across an iterator of results; `Healthy` when empty.
pub fn worst_status<'a, I: IntoIterator<Item = &'a ProbeResult>>(results: I) -> Status {
    results
        .into_iter()
        .map(|r| r.status)
        .max()
        .unwrap_or(Status::Healthy)
}

/// TLS certificate information attached by the tls provider
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TlsDetail {
    /// Leaf certificate verified against the system trust store
    pub verified: bool,
    pub common_name: String,
    pub subject_alt_names: Vec<String>,
    /// Subject distinguished names, leaf first
    pub chain: Vec<String>,
    /// Leaf certificate expiry, RFC3339
    pub valid_until: String,
    pub signature_algorithm: String,
    pub public_key_algorithm: String,
    pub version: String,
    pub cipher_suite: String,
}

/// One resource record returned by the dns provider
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DnsRecordDetail {
    #[serde(rename = "type")]
    pub rtype: String,
    pub ttl: u32,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Response metadata attached by the http provider when `detail` is set
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HttpDetail {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub headers: std::collections::BTreeMap<String, String>,
}

/// Kubernetes object condition as reported under a kstatus detail
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KstatusCondition {
    #[serde(rename = "type")]
    pub ctype: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// Computed kstatus outcome for one Kubernetes object
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KstatusDetail {
    /// Computed state: Current | InProgress | Failed | Terminating | Unknown
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<KstatusCondition>,
}

/// Chain of aggregator identifiers that formed a delegation cycle
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LoopDetail {
    pub server_ids: Vec<String>,
}

/// Typed detail payload carried on a probe result.
///
/// Opaque to the scheduler; renderers and remote aggregators dispatch on the
/// stable string tag.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Detail {
    Tls(TlsDetail),
    Dns { records: Vec<DnsRecordDetail> },
    Http(HttpDetail),
    Kstatus(KstatusDetail),
    Loop(LoopDetail),
}

impl Detail {
    /// Stable wire tag for this variant
    pub fn tag(&self) -> &'static str {
        match self {
            Detail::Tls(_) => "tls",
            Detail::Dns { .. } => "dns",
            Detail::Http(_) => "http",
            Detail::Kstatus(_) => "kstatus",
            Detail::Loop(_) => "loop",
        }
    }
}

/// Uniform result record produced by every provider.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ProbeResult {
    pub kind: String,
    pub name: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<Detail>,
    /// Wall-clock time taken to produce this result
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Populated only when LOOP_DETECTED propagates from a remote aggregator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ProbeResult>,
    /// Aggregation was curtailed by fail-fast
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fail_fast_triggered: bool,
}

impl ProbeResult {
    /// New result for the given provider kind and instance name.
    ///
    /// Starts `Healthy` with no messages; `unhealthy` is the only permitted
    /// downgrade before the record is returned.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            status: Status::Healthy,
            messages: Vec::new(),
            details: Vec::new(),
            duration: Duration::ZERO,
            server_id: None,
            components: Vec::new(),
            fail_fast_triggered: false,
        }
    }

    /// Mark the result healthy, leaving messages untouched.
    pub fn healthy(mut self) -> Self {
        self.status = Status::Healthy;
        self
    }

    /// Mark the result unhealthy and append the given diagnostics.
    pub fn unhealthy<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.status = Status::Unhealthy;
        self.messages.extend(messages.into_iter().map(Into::into));
        self
    }

    /// Single-message convenience for [`ProbeResult::unhealthy`].
    pub fn unhealthy_msg(self, message: impl Into<String>) -> Self {
        self.unhealthy([message.into()])
    }

    /// Attach a typed detail payload.
    pub fn with_detail(mut self, detail: Detail) -> Self {
        self.details.push(detail);
        self
    }

    /// Linearize the tree into `(slash-delimited path, leaf)` pairs.
    ///
    /// Containers contribute their name to the path but are not themselves
    /// emitted. Used by output renderers, never by the scheduler.
    pub fn flatten(&self) -> Vec<(String, &ProbeResult)> {
        let mut out = Vec::new();
        for child in &self.components {
            child.flatten_into(String::new(), &mut out);
        }
        if self.components.is_empty() {
            out.push((self.name.clone(), self));
        }
        out
    }

    fn flatten_into<'a>(&'a self, prefix: String, out: &mut Vec<(String, &'a ProbeResult)>) {
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", prefix, self.name)
        };
        if self.components.is_empty() {
            out.push((path, self));
        } else {
            for child in &self.components {
                child.flatten_into(path.clone(), out);
            }
        }
    }
}
