//! Kubernetes resource probe
//!
//! Fetches one object (`name`) or lists matching objects (`labelSelector`,
//! or neither for the whole collection) through the dynamic API, evaluates
//! each object with kstatus, and exposes the raw object maps to check
//! predicates. Group and version are resolved from a table of common kinds
//! plus API discovery, so most specs only name a `kind`.
//!
//! Checks may call `kubernetes.Get({...})` to pull other objects into the
//! evaluation; results are memoized per predicate run so a predicate applied
//! to many items does not hammer the API server.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cel_interpreter::extractors::Arguments;
use cel_interpreter::objects::Key;
use cel_interpreter::{FunctionContext, ResolveResult, Value};
use kube::api::{Api, DynamicObject, GroupVersionKind, ListParams};
use kube::discovery::{self, ApiCapabilities, ApiResource, Discovery, Scope};
use kube::ResourceExt;

use crate::core::context::ProbeContext;
use crate::core::expr::{CompiledChecks, Declarations, Expression};
use crate::core::provider::{
    parse_spec, provider_base, InstanceConfig, Provider, SetupError, DEFAULT_PROBE_TIMEOUT,
};
use crate::core::providers::kstatus::{self, KState};
use crate::core::types::{Detail, KstatusDetail, ProbeResult, Status};

pub(crate) fn factory() -> Box<dyn Provider> {
    Box::<KubernetesProvider>::default()
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct KubernetesSpec {
    pub kind: String,
    pub group: Option<String>,
    pub version: Option<String>,
    /// Empty = client default namespace; `"*"` = all namespaces (list mode)
    pub namespace: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "labelSelector")]
    pub label_selector: Option<String>,
    pub kstatus: bool,
}

impl Default for KubernetesSpec {
    fn default() -> Self {
        Self {
            kind: String::new(),
            group: None,
            version: None,
            namespace: None,
            name: None,
            label_selector: None,
            kstatus: true,
        }
    }
}

/// API groups of the kinds a health configuration typically names, so the
/// spec can stay at `kind: Deployment` without discovery round trips.
fn common_group(kind: &str) -> Option<&'static str> {
    match kind {
        "Deployment" | "StatefulSet" | "DaemonSet" | "ReplicaSet" | "ControllerRevision" => {
            Some("apps")
        }
        "Pod" | "Service" | "ConfigMap" | "Secret" | "Namespace" | "Node" | "Endpoints"
        | "ServiceAccount" | "PersistentVolume" | "PersistentVolumeClaim"
        | "ReplicationController" | "ResourceQuota" | "LimitRange" | "Event" => Some(""),
        "Job" | "CronJob" => Some("batch"),
        "Ingress" | "IngressClass" | "NetworkPolicy" => Some("networking.k8s.io"),
        "HorizontalPodAutoscaler" => Some("autoscaling"),
        "PodDisruptionBudget" => Some("policy"),
        "Role" | "RoleBinding" | "ClusterRole" | "ClusterRoleBinding" => {
            Some("rbac.authorization.k8s.io")
        }
        "CustomResourceDefinition" => Some("apiextensions.k8s.io"),
        "StorageClass" | "VolumeAttachment" | "CSIDriver" => Some("storage.k8s.io"),
        _ => None,
    }
}

/// Resolve kind (+ optional group/version) into a concrete API resource,
/// using the common-kind table before falling back to full discovery.
async fn resolve_api(
    client: &kube::Client,
    kind: &str,
    group: Option<&str>,
    version: Option<&str>,
) -> Result<(ApiResource, ApiCapabilities), String> {
    let group = group.or_else(|| common_group(kind));

    match (group, version) {
        (Some(group), Some(version)) => {
            let gvk = GroupVersionKind::gvk(group, version, kind);
            discovery::oneshot::pinned_kind(client, &gvk)
                .await
                .map_err(|e| format!("discover {kind} in {group}/{version}: {e}"))
        }
        (Some(group), None) => {
            let api_group = discovery::oneshot::group(client, group)
                .await
                .map_err(|e| format!("discover group {group:?}: {e}"))?;
            api_group
                .recommended_kind(kind)
                .ok_or_else(|| format!("kind {kind:?} not found in group {group:?}"))
        }
        (None, _) => {
            let discovery = Discovery::new(client.clone())
                .run()
                .await
                .map_err(|e| format!("api discovery: {e}"))?;
            for api_group in discovery.groups() {
                if let Some(found) = api_group.recommended_kind(kind) {
                    return Ok(found);
                }
            }
            Err(format!("kind {kind:?} not found in any API group"))
        }
    }
}

/// Scope-aware dynamic API handle. `namespace` of `"*"` lists across all
/// namespaces; empty uses the client's default.
fn dynamic_api(
    client: kube::Client,
    resource: &ApiResource,
    capabilities: &ApiCapabilities,
    namespace: Option<&str>,
) -> Api<DynamicObject> {
    match namespace {
        _ if capabilities.scope == Scope::Cluster => Api::all_with(client, resource),
        Some("*") => Api::all_with(client, resource),
        Some(ns) if !ns.is_empty() => Api::namespaced_with(client, ns, resource),
        _ => Api::default_namespaced_with(client, resource),
    }
}

#[derive(Default)]
pub struct KubernetesProvider {
    name: String,
    timeout: Option<Duration>,
    spec: KubernetesSpec,
    raw_checks: Vec<Expression>,
    checks: CompiledChecks,
    client: tokio::sync::OnceCell<kube::Client>,
}

impl KubernetesProvider {
    fn declarations() -> Declarations {
        Declarations::variables(&["resource", "items", "kubernetes"])
    }

    async fn client(&self) -> Result<kube::Client, String> {
        self.client
            .get_or_try_init(|| async {
                kube::Client::try_default()
                    .await
                    .map_err(|e| format!("kubernetes client: {e}"))
            })
            .await
            .map(Clone::clone)
    }

    /// Evaluate kstatus for one object; when it is not current, downgrade the
    /// result and attach the computed conditions.
    fn apply_kstatus(&self, result: ProbeResult, obj: &serde_json::Value) -> ProbeResult {
        if !self.spec.kstatus {
            return result;
        }
        let computed = kstatus::compute(obj);
        if computed.state == KState::Current {
            return result;
        }
        result
            .unhealthy_msg(format!(
                "{}: {}",
                computed.state.as_str(),
                computed.message
            ))
            .with_detail(Detail::Kstatus(KstatusDetail {
                status: computed.state.as_str().to_string(),
                message: computed.message,
                conditions: computed.conditions,
            }))
    }

    fn run_checks(
        &self,
        client: kube::Client,
        bind: impl FnOnce(&mut cel_interpreter::Context),
    ) -> Vec<String> {
        if self.checks.is_empty() {
            return Vec::new();
        }

        // Per-evaluation lookup cache shared by every Get call of this run.
        let cache: Arc<RwLock<HashMap<String, Value>>> = Arc::new(RwLock::new(HashMap::new()));
        let handle = tokio::runtime::Handle::current();
        let namespace = self.spec.namespace.clone();

        self.checks.evaluate(move |cel| {
            bind(cel);
            // `kubernetes` only exists as the receiver of Get()
            cel.add_variable_from_value("kubernetes", HashMap::<String, Value>::new());
            cel.add_function(
                "Get",
                move |ftx: &FunctionContext, Arguments(args): Arguments| -> ResolveResult {
                    lookup_function(ftx, &args, &client, &cache, &handle, namespace.as_deref())
                },
            );
        })
    }
}

#[async_trait]
impl Provider for KubernetesProvider {
    provider_base!("kubernetes");

    fn configure(&mut self, instance: &InstanceConfig) -> Result<(), SetupError> {
        self.spec = parse_spec("kubernetes", &instance.spec)?;
        self.raw_checks = instance.checks.clone();
        Ok(())
    }

    fn setup(&mut self) -> Result<(), SetupError> {
        if self.spec.kind.is_empty() {
            return Err(SetupError::invalid_spec("kubernetes", "kind must be set"));
        }
        if self.spec.name.is_some() && self.spec.label_selector.is_some() {
            return Err(SetupError::invalid_spec(
                "kubernetes",
                "name and labelSelector are mutually exclusive",
            ));
        }
        if self.spec.name.is_some() && self.spec.namespace.as_deref() == Some("*") {
            return Err(SetupError::invalid_spec(
                "kubernetes",
                "namespace \"*\" requires list mode (labelSelector or neither)",
            ));
        }
        self.checks = CompiledChecks::compile(&self.raw_checks, &Self::declarations())?;
        self.timeout.get_or_insert(DEFAULT_PROBE_TIMEOUT);
        Ok(())
    }

    async fn probe(&self, _ctx: &ProbeContext) -> ProbeResult {
        let start = Instant::now();
        let mut result = ProbeResult::new(self.kind(), &self.name);

        let client = match self.client().await {
            Ok(client) => client,
            Err(message) => return result.unhealthy_msg(message),
        };

        let resolved = resolve_api(
            &client,
            &self.spec.kind,
            self.spec.group.as_deref(),
            self.spec.version.as_deref(),
        )
        .await;
        let (resource, capabilities) = match resolved {
            Ok(resolved) => resolved,
            Err(message) => return result.unhealthy_msg(message),
        };
        let api = dynamic_api(
            client.clone(),
            &resource,
            &capabilities,
            self.spec.namespace.as_deref(),
        );

        if let Some(name) = &self.spec.name {
            // Single mode: one object, its map is the check context.
            let obj = match api.get(name).await {
                Ok(obj) => obj,
                Err(e) => {
                    return result
                        .unhealthy_msg(format!("get {} {name:?}: {e}", self.spec.kind))
                }
            };
            let value = match serde_json::to_value(&obj) {
                Ok(value) => value,
                Err(e) => return result.unhealthy_msg(format!("encode object: {e}")),
            };

            result = self.apply_kstatus(result, &value);
            let failures = self.run_checks(client, |cel| {
                let _ = cel.add_variable("resource", &value);
            });
            if !failures.is_empty() {
                result = result.unhealthy(failures);
            }
            result.duration = start.elapsed();
            return result;
        }

        // List mode: every matching object becomes a component result.
        let mut params = ListParams::default();
        if let Some(selector) = &self.spec.label_selector {
            params = params.labels(selector);
        }
        let list = match api.list(&params).await {
            Ok(list) => list,
            Err(e) => return result.unhealthy_msg(format!("list {}: {e}", self.spec.kind)),
        };

        let mut items = Vec::with_capacity(list.items.len());
        for obj in &list.items {
            let value = match serde_json::to_value(obj) {
                Ok(value) => value,
                Err(e) => return result.unhealthy_msg(format!("encode object: {e}")),
            };
            let mut child = ProbeResult::new("kubernetes", obj.name_any());
            child = self.apply_kstatus(child, &value);
            child.duration = start.elapsed();
            result.components.push(child);
            items.push(value);
        }

        // Empty selection is healthy; "at least one" is a predicate concern.
        result.status = crate::core::types::worst_status(&result.components);

        let failures = self.run_checks(client, |cel| {
            let _ = cel.add_variable("items", &items);
        });
        if !failures.is_empty() {
            result.status = Status::Unhealthy.max(result.status);
            result.messages.extend(failures);
        }
        result.duration = start.elapsed();
        result
    }
}

/// Parsed argument map of a `kubernetes.Get({...})` call: `kind` plus exactly
/// one of `name` or `labelSelector`, with optional `namespace`, `group` and
/// `version`. An absent namespace inherits the provider's.
#[derive(Debug, Clone, PartialEq)]
struct LookupRequest {
    kind: String,
    name: Option<String>,
    selector: Option<String>,
    namespace: Option<String>,
    group: Option<String>,
    version: Option<String>,
}

impl LookupRequest {
    fn from_args(args: &[Value], default_namespace: Option<&str>) -> Result<Self, String> {
        let Some(Value::Map(arg)) = args.first() else {
            return Err("Get expects a map argument".to_string());
        };

        let get_field = |key: &str| -> Option<String> {
            match arg.map.get(&Key::String(Arc::new(key.to_string()))) {
                Some(Value::String(s)) => Some(s.as_ref().clone()),
                _ => None,
            }
        };

        let Some(kind) = get_field("kind") else {
            return Err("Get requires a kind".to_string());
        };
        let name = get_field("name");
        let selector = get_field("labelSelector");
        if name.is_some() == selector.is_some() {
            return Err("Get requires exactly one of name or labelSelector".to_string());
        }

        Ok(Self {
            kind,
            name,
            selector,
            namespace: get_field("namespace").or_else(|| default_namespace.map(String::from)),
            group: get_field("group"),
            version: get_field("version"),
        })
    }

    fn cache_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.group.as_deref().unwrap_or("-"),
            self.version.as_deref().unwrap_or("-"),
            self.kind,
            self.namespace.as_deref().unwrap_or("-"),
            self.name
                .as_deref()
                .or(self.selector.as_deref())
                .unwrap_or("-"),
        )
    }
}

/// Answer from the per-evaluation cache when possible, otherwise fetch,
/// convert and memoize. A poisoned lock degrades to the uncached path; it
/// never fails the probe.
fn cached_lookup(
    request: &LookupRequest,
    cache: &Arc<RwLock<HashMap<String, Value>>>,
    fetch: impl FnOnce() -> Result<serde_json::Value, String>,
) -> Result<Value, String> {
    let key = request.cache_key();
    if let Ok(guard) = cache.read() {
        if let Some(hit) = guard.get(&key) {
            return Ok(hit.clone());
        }
    }

    let json = fetch()?;
    let value = cel_interpreter::to_value(&json).map_err(|e| e.to_string())?;
    if let Ok(mut guard) = cache.write() {
        guard.insert(key, value.clone());
    }
    Ok(value)
}

/// One dynamic-API round trip for a lookup request. Single lookups return the
/// object map, or null when the object does not exist; selector lookups
/// return the matching list.
async fn fetch_object(
    client: kube::Client,
    request: &LookupRequest,
) -> Result<serde_json::Value, String> {
    let (resource, capabilities) = resolve_api(
        &client,
        &request.kind,
        request.group.as_deref(),
        request.version.as_deref(),
    )
    .await?;
    let api = dynamic_api(client, &resource, &capabilities, request.namespace.as_deref());

    if let Some(name) = &request.name {
        match api.get(name).await {
            Ok(obj) => serde_json::to_value(&obj).map_err(|e| e.to_string()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(serde_json::Value::Null),
            Err(e) => Err(format!("get {} {name:?}: {e}", request.kind)),
        }
    } else {
        let params = ListParams::default().labels(request.selector.as_deref().unwrap_or(""));
        match api.list(&params).await {
            Ok(list) => serde_json::to_value(&list.items).map_err(|e| e.to_string()),
            Err(e) => Err(format!("list {}: {e}", request.kind)),
        }
    }
}

/// Host function behind `kubernetes.Get({...})`.
fn lookup_function(
    ftx: &FunctionContext,
    args: &[Value],
    client: &kube::Client,
    cache: &Arc<RwLock<HashMap<String, Value>>>,
    handle: &tokio::runtime::Handle,
    default_namespace: Option<&str>,
) -> ResolveResult {
    let request = LookupRequest::from_args(args, default_namespace).map_err(|e| ftx.error(e))?;

    let client = client.clone();
    cached_lookup(&request, cache, || {
        tokio::task::block_in_place(|| handle.block_on(fetch_object(client, &request)))
    })
    .map_err(|e| ftx.error(e))
}
