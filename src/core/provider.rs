//! Provider contract and registry
//!
//! Every probe kind implements [`Provider`]: configured from the declarative
//! instance config, validated once in `setup`, then probed any number of
//! times. Probing never fails at the type level; external failures are
//! represented as `Unhealthy` results with diagnostic messages.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::core::context::ProbeContext;
use crate::core::expr::{CheckError, Expression};
use crate::core::types::ProbeResult;

/// Applied by `setup` when an instance does not configure its own timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration errors surfaced while building the probe tree.
/// All of these are fatal at startup except child resolution errors, which
/// containers collect and report without aborting their own setup.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("unknown provider kind {0:?}")]
    UnknownKind(String),
    #[error("invalid {kind} spec: {message}")]
    InvalidSpec { kind: &'static str, message: String },
    #[error(transparent)]
    Check(#[from] CheckError),
    #[error("component {name:?}: {source}")]
    Child {
        name: String,
        #[source]
        source: Box<SetupError>,
    },
}

impl SetupError {
    pub fn invalid_spec(kind: &'static str, message: impl Into<String>) -> Self {
        SetupError::InvalidSpec {
            kind,
            message: message.into(),
        }
    }
}

/// Ordered `name -> instance` mapping, preserving configuration file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComponentMap(pub Vec<(String, InstanceConfig)>);

impl ComponentMap {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, InstanceConfig)> {
        self.0.iter()
    }
}

impl<'de> serde::Deserialize<'de> for ComponentMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> serde::de::Visitor<'de> for Visitor {
            type Value = ComponentMap;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a mapping of component name to instance config")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, instance)) = access.next_entry::<String, InstanceConfig>()? {
                    entries.push((name, instance));
                }
                Ok(ComponentMap(entries))
            }
        }

        deserializer.deserialize_map(Visitor)
    }
}

impl serde::Serialize for ComponentMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, instance) in &self.0 {
            map.serialize_entry(name, instance)?;
        }
        map.end()
    }
}

/// Design-time shape of one probe node, as produced by the config loader.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InstanceConfig {
    #[serde(default)]
    pub kind: String,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Provider-specific fields, deserialized by the provider itself
    #[serde(default)]
    pub spec: serde_yaml::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<Expression>,
    /// Children, for container kinds
    #[serde(default, skip_serializing_if = "ComponentMap::is_empty")]
    pub components: ComponentMap,
}

/// Read-only container facet: composed nodes expose their children and the
/// per-child setup errors they collected.
pub trait Container {
    fn children(&self) -> &[Box<dyn Provider>];
    fn child_errors(&self) -> &[SetupError];
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .finish()
    }
}

/// Uniform interface implemented by every probe kind.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable kind tag, as used in configuration and results
    fn kind(&self) -> &'static str;

    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);

    fn timeout(&self) -> Option<Duration>;
    fn set_timeout(&mut self, timeout: Option<Duration>);

    /// Ingest the declarative instance config (spec, checks, children).
    /// Called exactly once, before `setup`.
    fn configure(&mut self, instance: &InstanceConfig) -> Result<(), SetupError>;

    /// Inject defaults, validate configuration, compile check predicates.
    /// Invalid configuration is fatal at startup.
    fn setup(&mut self) -> Result<(), SetupError>;

    /// Execute the probe. Never fails: external errors are returned as
    /// `Unhealthy` results with classified messages.
    async fn probe(&self, ctx: &ProbeContext) -> ProbeResult;

    /// Container facet, when this provider composes children.
    fn as_container(&self) -> Option<&dyn Container> {
        None
    }

    /// Whether this probe holds a slot of the shared concurrency limiter
    /// while it runs. Containers return false: they only fan out, and holding
    /// a slot across the wait for their children would deadlock small
    /// parallelism budgets.
    fn occupies_slot(&self) -> bool {
        true
    }
}

/// Implements the name/timeout plumbing shared by every provider.
macro_rules! provider_base {
    ($kind:literal) => {
        fn kind(&self) -> &'static str {
            $kind
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn set_name(&mut self, name: String) {
            self.name = name;
        }

        fn timeout(&self) -> Option<std::time::Duration> {
            self.timeout
        }

        fn set_timeout(&mut self, timeout: Option<std::time::Duration>) {
            self.timeout = timeout;
        }
    };
}
pub(crate) use provider_base;

/// Deserialize a provider spec, treating an absent spec as all-defaults.
pub fn parse_spec<T>(kind: &'static str, value: &serde_yaml::Value) -> Result<T, SetupError>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    serde_yaml::from_value(value.clone()).map_err(|e| SetupError::InvalidSpec {
        kind,
        message: e.to_string(),
    })
}

pub type Factory = fn() -> Box<dyn Provider>;

static REGISTRY: OnceLock<HashMap<&'static str, Factory>> = OnceLock::new();

/// Process-wide `kind -> factory` mapping. Written once at first access,
/// read-only afterwards.
pub fn registry() -> &'static HashMap<&'static str, Factory> {
    REGISTRY.get_or_init(crate::core::providers::builtin)
}

/// Build, configure and set up a provider instance from its declarative
/// config. This is the single entry point used for the root and, recursively,
/// for every container child.
pub fn instantiate(name: &str, instance: &InstanceConfig) -> Result<Box<dyn Provider>, SetupError> {
    let factory = registry()
        .get(instance.kind.as_str())
        .ok_or_else(|| SetupError::UnknownKind(instance.kind.clone()))?;

    let mut provider = factory();
    provider.set_name(name.to_string());
    provider.set_timeout(instance.timeout);
    provider.configure(instance)?;
    provider.setup()?;
    Ok(provider)
}
