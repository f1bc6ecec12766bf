//! Kubernetes resource status computation
//!
//! Decides whether an object has reached its desired state ("Current") from
//! its spec/status, the way the kstatus convention defines it: standard
//! conditions first, then per-kind replica accounting for the workload types.
//! Objects with no recognizable status surface are treated as always current.

use serde_json::Value;

use crate::core::types::KstatusCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KState {
    Current,
    InProgress,
    Failed,
    Terminating,
    Unknown,
}

impl KState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KState::Current => "Current",
            KState::InProgress => "InProgress",
            KState::Failed => "Failed",
            KState::Terminating => "Terminating",
            KState::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Computed {
    pub state: KState,
    pub message: String,
    pub conditions: Vec<KstatusCondition>,
}

impl Computed {
    fn new(state: KState, message: impl Into<String>, conditions: Vec<KstatusCondition>) -> Self {
        Self {
            state,
            message: message.into(),
            conditions,
        }
    }
}

/// Compute the kstatus state of one object (as an untyped map).
pub fn compute(obj: &Value) -> Computed {
    let conditions = extract_conditions(obj);

    if obj.pointer("/metadata/deletionTimestamp").is_some() {
        return Computed::new(
            KState::Terminating,
            "resource scheduled for deletion",
            conditions,
        );
    }

    if let (Some(generation), Some(observed)) = (
        int_at(obj, "/metadata/generation"),
        int_at(obj, "/status/observedGeneration"),
    ) {
        if generation != observed {
            return Computed::new(
                KState::InProgress,
                format!("observed generation {observed} does not match generation {generation}"),
                conditions,
            );
        }
    }

    let kind = obj.pointer("/kind").and_then(Value::as_str).unwrap_or("");
    match kind {
        "Deployment" => deployment_status(obj, conditions),
        "StatefulSet" => stateful_set_status(obj, conditions),
        "ReplicaSet" | "ReplicationController" => replica_set_status(obj, conditions),
        "DaemonSet" => daemon_set_status(obj, conditions),
        "Job" => job_status(obj, conditions),
        "Pod" => pod_status(obj, conditions),
        "PersistentVolumeClaim" => pvc_status(obj, conditions),
        _ => standard_conditions_status(conditions),
    }
}

fn extract_conditions(obj: &Value) -> Vec<KstatusCondition> {
    obj.pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions
                .iter()
                .map(|c| KstatusCondition {
                    ctype: str_at(c, "/type").unwrap_or_default().to_string(),
                    status: str_at(c, "/status").unwrap_or_default().to_string(),
                    reason: str_at(c, "/reason").unwrap_or_default().to_string(),
                    message: str_at(c, "/message").unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn condition<'a>(
    conditions: &'a [KstatusCondition],
    ctype: &str,
) -> Option<&'a KstatusCondition> {
    conditions.iter().find(|c| c.ctype == ctype)
}

fn int_at(obj: &Value, pointer: &str) -> Option<i64> {
    obj.pointer(pointer).and_then(Value::as_i64)
}

fn str_at<'a>(obj: &'a Value, pointer: &str) -> Option<&'a str> {
    obj.pointer(pointer).and_then(Value::as_str)
}

fn deployment_status(obj: &Value, conditions: Vec<KstatusCondition>) -> Computed {
    if let Some(progressing) = condition(&conditions, "Progressing") {
        if progressing.reason == "ProgressDeadlineExceeded" {
            return Computed::new(KState::Failed, "progress deadline exceeded", conditions);
        }
    }

    let spec_replicas = int_at(obj, "/spec/replicas").unwrap_or(1);
    let replicas = int_at(obj, "/status/replicas").unwrap_or(0);
    let updated = int_at(obj, "/status/updatedReplicas").unwrap_or(0);
    let available = int_at(obj, "/status/availableReplicas").unwrap_or(0);
    let ready = int_at(obj, "/status/readyReplicas").unwrap_or(0);

    if updated < spec_replicas {
        return Computed::new(
            KState::InProgress,
            format!("updated: {updated}/{spec_replicas}"),
            conditions,
        );
    }
    if replicas > updated {
        return Computed::new(
            KState::InProgress,
            format!("pending termination: {}", replicas - updated),
            conditions,
        );
    }
    if available < updated {
        return Computed::new(
            KState::InProgress,
            format!("available: {available}/{updated}"),
            conditions,
        );
    }
    if ready < spec_replicas {
        return Computed::new(
            KState::InProgress,
            format!("ready: {ready}/{spec_replicas}"),
            conditions,
        );
    }
    Computed::new(
        KState::Current,
        format!("deployment is available, replicas: {replicas}"),
        conditions,
    )
}

fn stateful_set_status(obj: &Value, conditions: Vec<KstatusCondition>) -> Computed {
    let spec_replicas = int_at(obj, "/spec/replicas").unwrap_or(1);
    let ready = int_at(obj, "/status/readyReplicas").unwrap_or(0);
    let current = int_at(obj, "/status/currentReplicas").unwrap_or(0);

    if ready < spec_replicas {
        return Computed::new(
            KState::InProgress,
            format!("ready: {ready}/{spec_replicas}"),
            conditions,
        );
    }
    if current < spec_replicas {
        return Computed::new(
            KState::InProgress,
            format!("current: {current}/{spec_replicas}"),
            conditions,
        );
    }
    Computed::new(
        KState::Current,
        format!("all replicas ready, replicas: {spec_replicas}"),
        conditions,
    )
}

fn replica_set_status(obj: &Value, conditions: Vec<KstatusCondition>) -> Computed {
    let spec_replicas = int_at(obj, "/spec/replicas").unwrap_or(1);
    let ready = int_at(obj, "/status/readyReplicas").unwrap_or(0);
    let available = int_at(obj, "/status/availableReplicas").unwrap_or(0);

    if ready < spec_replicas {
        return Computed::new(
            KState::InProgress,
            format!("ready: {ready}/{spec_replicas}"),
            conditions,
        );
    }
    if available < spec_replicas {
        return Computed::new(
            KState::InProgress,
            format!("available: {available}/{spec_replicas}"),
            conditions,
        );
    }
    Computed::new(KState::Current, "all replicas ready", conditions)
}

fn daemon_set_status(obj: &Value, conditions: Vec<KstatusCondition>) -> Computed {
    let desired = int_at(obj, "/status/desiredNumberScheduled").unwrap_or(0);
    let ready = int_at(obj, "/status/numberReady").unwrap_or(0);
    let available = int_at(obj, "/status/numberAvailable").unwrap_or(0);

    if ready < desired {
        return Computed::new(
            KState::InProgress,
            format!("ready: {ready}/{desired}"),
            conditions,
        );
    }
    if available < desired {
        return Computed::new(
            KState::InProgress,
            format!("available: {available}/{desired}"),
            conditions,
        );
    }
    Computed::new(KState::Current, "all daemon pods ready", conditions)
}

fn job_status(obj: &Value, conditions: Vec<KstatusCondition>) -> Computed {
    if let Some(failed) = condition(&conditions, "Failed") {
        if failed.status == "True" {
            let message = if failed.message.is_empty() {
                "job failed".to_string()
            } else {
                failed.message.clone()
            };
            return Computed::new(KState::Failed, message, conditions);
        }
    }
    if let Some(complete) = condition(&conditions, "Complete") {
        if complete.status == "True" {
            return Computed::new(KState::Current, "job completed", conditions);
        }
    }
    if int_at(obj, "/status/startTime").is_none() && str_at(obj, "/status/startTime").is_none() {
        return Computed::new(KState::InProgress, "job not started", conditions);
    }
    Computed::new(KState::InProgress, "job in progress", conditions)
}

fn pod_status(obj: &Value, conditions: Vec<KstatusCondition>) -> Computed {
    let phase = str_at(obj, "/status/phase").unwrap_or("");
    match phase {
        "Succeeded" => Computed::new(KState::Current, "pod succeeded", conditions),
        "Failed" => {
            let message = str_at(obj, "/status/message").unwrap_or("pod failed").to_string();
            Computed::new(KState::Failed, message, conditions)
        }
        "Running" => {
            if condition(&conditions, "Ready").map(|c| c.status == "True") == Some(true) {
                Computed::new(KState::Current, "pod is ready", conditions)
            } else {
                Computed::new(KState::InProgress, "pod is running but not ready", conditions)
            }
        }
        other => Computed::new(
            KState::InProgress,
            format!("pod phase {other:?}"),
            conditions,
        ),
    }
}

fn pvc_status(obj: &Value, conditions: Vec<KstatusCondition>) -> Computed {
    let phase = str_at(obj, "/status/phase").unwrap_or("");
    if phase == "Bound" {
        Computed::new(KState::Current, "pvc is bound", conditions)
    } else {
        Computed::new(
            KState::InProgress,
            format!("pvc is not bound, phase {phase:?}"),
            conditions,
        )
    }
}

/// Fallback for kinds with no dedicated rules: honor the standard kstatus
/// conditions when present, otherwise consider the object current.
fn standard_conditions_status(conditions: Vec<KstatusCondition>) -> Computed {
    if let Some(stalled) = condition(&conditions, "Stalled") {
        if stalled.status == "True" {
            let message = if stalled.message.is_empty() {
                "resource is stalled".to_string()
            } else {
                stalled.message.clone()
            };
            return Computed::new(KState::Failed, message, conditions);
        }
    }
    if let Some(reconciling) = condition(&conditions, "Reconciling") {
        if reconciling.status == "True" {
            let message = if reconciling.message.is_empty() {
                "resource is reconciling".to_string()
            } else {
                reconciling.message.clone()
            };
            return Computed::new(KState::InProgress, message, conditions);
        }
    }
    if let Some(ready) = condition(&conditions, "Ready") {
        if ready.status != "True" {
            let message = if ready.message.is_empty() {
                format!("ready condition is {}", ready.status)
            } else {
                ready.message.clone()
            };
            return Computed::new(KState::InProgress, message, conditions);
        }
    }
    Computed::new(KState::Current, "resource is current", conditions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deployment_with_all_replicas_is_current() {
        let obj = json!({
            "kind": "Deployment",
            "metadata": {"generation": 2},
            "spec": {"replicas": 3},
            "status": {
                "observedGeneration": 2,
                "replicas": 3, "updatedReplicas": 3,
                "availableReplicas": 3, "readyReplicas": 3,
            },
        });
        let computed = compute(&obj);
        assert_eq!(computed.state, KState::Current);
    }

    #[test]
    fn deployment_rollout_is_in_progress() {
        let obj = json!({
            "kind": "Deployment",
            "spec": {"replicas": 3},
            "status": {"replicas": 3, "updatedReplicas": 2, "availableReplicas": 2, "readyReplicas": 2},
        });
        let computed = compute(&obj);
        assert_eq!(computed.state, KState::InProgress);
        assert_eq!(computed.message, "updated: 2/3");
    }

    #[test]
    fn observed_generation_lag_is_in_progress() {
        let obj = json!({
            "kind": "Deployment",
            "metadata": {"generation": 5},
            "spec": {"replicas": 1},
            "status": {"observedGeneration": 4, "replicas": 1, "updatedReplicas": 1,
                       "availableReplicas": 1, "readyReplicas": 1},
        });
        assert_eq!(compute(&obj).state, KState::InProgress);
    }

    #[test]
    fn deletion_timestamp_is_terminating() {
        let obj = json!({
            "kind": "Pod",
            "metadata": {"deletionTimestamp": "2026-01-01T00:00:00Z"},
            "status": {"phase": "Running"},
        });
        assert_eq!(compute(&obj).state, KState::Terminating);
    }

    #[test]
    fn progress_deadline_exceeded_is_failed() {
        let obj = json!({
            "kind": "Deployment",
            "spec": {"replicas": 1},
            "status": {
                "conditions": [
                    {"type": "Progressing", "status": "False", "reason": "ProgressDeadlineExceeded",
                     "message": "ReplicaSet has timed out progressing."},
                ],
            },
        });
        let computed = compute(&obj);
        assert_eq!(computed.state, KState::Failed);
        assert_eq!(computed.conditions.len(), 1);
        assert_eq!(computed.conditions[0].reason, "ProgressDeadlineExceeded");
    }

    #[test]
    fn running_ready_pod_is_current() {
        let obj = json!({
            "kind": "Pod",
            "status": {
                "phase": "Running",
                "conditions": [{"type": "Ready", "status": "True"}],
            },
        });
        assert_eq!(compute(&obj).state, KState::Current);
    }

    #[test]
    fn plain_object_without_status_is_current() {
        let obj = json!({"kind": "ConfigMap", "metadata": {"name": "settings"}});
        let computed = compute(&obj);
        assert_eq!(computed.state, KState::Current);
        assert!(computed.conditions.is_empty());
    }

    #[test]
    fn custom_resource_honors_standard_conditions() {
        let obj = json!({
            "kind": "HelmRelease",
            "status": {
                "conditions": [{"type": "Ready", "status": "False", "message": "install retries exhausted"}],
            },
        });
        let computed = compute(&obj);
        assert_eq!(computed.state, KState::InProgress);
        assert_eq!(computed.message, "install retries exhausted");
    }
}
