//! SpinApp CRD
//!
//! A SpinApp is the user-authored declaration of one Spin application: which
//! image to run, how to scale it, which variables and runtime bindings it
//! needs, and which executor realizes it.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, EnvVarSource, LocalObjectReference, SecretKeySelector, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// SpinApp declares the desired state of a Spin application.
///
/// Example:
/// ```yaml
/// apiVersion: core.spinoperator.dev/v1alpha1
/// kind: SpinApp
/// metadata:
///   name: hello
/// spec:
///   image: ghcr.io/spinkube/spin-operator/hello-world:20240708-130250-gfefd2b1
///   executor: containerd-shim-spin
///   replicas: 2
///   variables:
///     - name: greeting
///       value: hi
///   runtimeConfig:
///     keyValueStores:
///       - name: default
///         type: redis
///         options:
///           - name: url
///             valueFrom:
///               secretKeyRef:
///                 name: redis
///                 key: url
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.spinoperator.dev",
    version = "v1alpha1",
    kind = "SpinApp",
    namespaced,
    status = "SpinAppStatus",
    shortname = "spinapp",
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Executor","type":"string","jsonPath":".spec.executor"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpinAppSpec {
    /// Executor controlling how this app is run.
    ///
    /// Defaulted at admission to the alphabetically first executor in the
    /// namespace when left empty.
    #[serde(default)]
    pub executor: String,

    /// OCI reference of the Spin application
    pub image: String,

    /// Secrets in the same namespace used to pull the image
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Pull policy for the image (Always, IfNotPresent, Never)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Readiness and liveness checks
    #[serde(default)]
    pub checks: HealthChecks,

    /// Number of replicas. Must be unset when autoscaling is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Leave the replica count to an external autoscaler (HPA/KEDA)
    #[serde(default)]
    pub enable_autoscaling: bool,

    /// Runtime configuration bindings
    #[serde(default)]
    pub runtime_config: RuntimeConfig,

    /// Volumes added to the pod
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Volume mounts added to the app container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,

    /// Bindings from Kubernetes values to Spin variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<SpinVar>,

    /// Annotations applied to the generated Service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_annotations: BTreeMap<String, String>,

    /// Annotations applied to the generated Deployment
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deployment_annotations: BTreeMap<String, String>,

    /// Annotations applied to the pod template
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_annotations: BTreeMap<String, String>,

    /// Labels applied to the pod template. Operator-managed labels win on
    /// collision.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pod_labels: BTreeMap<String, String>,

    /// Compute resources for the app container
    #[serde(default)]
    pub resources: Resources,
}

impl SpinAppSpec {
    /// Replica count the Deployment should carry, `None` when autoscaling
    /// owns the replica count.
    pub fn desired_replicas(&self) -> Option<i32> {
        if self.enable_autoscaling {
            None
        } else {
            Some(self.replicas.unwrap_or(1))
        }
    }
}

/// Observed state of a SpinApp
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpinAppStatus {
    /// `Available` and `Progressing`, mirrored from the Deployment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Executor currently realizing this app
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_scheduler: Option<String>,

    /// Ready replicas of the underlying Deployment
    #[serde(default)]
    pub ready_replicas: i32,
}

/// Runtime configuration for an app.
///
/// Either `loadFromSecret` names a secret that already holds a complete
/// `runtime-config.toml`, or the binding lists are rendered into one.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Secret holding a verbatim runtime config; all other fields are ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_from_secret: Option<String>,

    /// SQLite database bindings (e.g. on-disk, libsql)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sqlite_databases: Vec<RuntimeBinding>,

    /// Key-value store bindings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_value_stores: Vec<RuntimeBinding>,

    /// LLM compute binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_compute: Option<LlmComputeBinding>,
}

impl RuntimeConfig {
    /// Secret name when the config is supplied verbatim, ignoring empty strings
    pub fn verbatim_secret(&self) -> Option<&str> {
        self.load_from_secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// A named store or database binding: a free-form type tag plus options
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeBinding {
    /// Name the app refers to the binding by
    pub name: String,

    /// Backend type (e.g. redis, spin, libsql). Not validated.
    #[serde(rename = "type")]
    pub type_: String,

    /// Backend options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<RuntimeConfigOption>,
}

/// The LLM compute binding. There is at most one per app, so it has no name.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LlmComputeBinding {
    /// Backend type (e.g. spin, remote_http)
    #[serde(rename = "type")]
    pub type_: String,

    /// Backend options
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<RuntimeConfigOption>,
}

/// One option of a binding
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfigOption {
    /// Option key
    pub name: String,

    /// Static value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Reference to a key in a Secret or ConfigMap of the app's namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<RuntimeConfigVarSource>,
}

/// Source of a runtime config option value
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfigVarSource {
    /// Selects a key of a ConfigMap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_key_ref: Option<ConfigMapKeySelector>,

    /// Selects a key of a Secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeySelector>,
}

/// Binding between a Spin variable and a static or referenced value
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpinVar {
    /// Spin variable name (lowercase, digits and `_`)
    pub name: String,

    /// Static value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Value sourced from the pod environment (secret, config map, field)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

/// Compute resources for the app container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    /// Maximum resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<BTreeMap<String, Quantity>>,

    /// Requested resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<BTreeMap<String, Quantity>>,
}

/// Readiness and liveness probes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecks {
    /// Readiness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<HealthProbe>,

    /// Liveness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness: Option<HealthProbe>,
}

/// A single health probe
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthProbe {
    /// HTTP GET transport. Required; a probe without it is rejected at
    /// reconcile time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_get: Option<HttpHealthProbe>,

    /// Seconds after start before the first probe
    #[serde(default = "default_initial_delay")]
    pub initial_delay_seconds: i32,

    /// Seconds after which the probe times out
    #[serde(default = "default_timeout")]
    pub timeout_seconds: i32,

    /// Probe interval in seconds
    #[serde(default = "default_period")]
    pub period_seconds: i32,

    /// Consecutive successes to be considered healthy
    #[serde(default = "default_success_threshold")]
    pub success_threshold: i32,

    /// Consecutive failures to be considered unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: i32,
}

impl Default for HealthProbe {
    fn default() -> Self {
        Self {
            http_get: None,
            initial_delay_seconds: default_initial_delay(),
            timeout_seconds: default_timeout(),
            period_seconds: default_period(),
            success_threshold: default_success_threshold(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_initial_delay() -> i32 {
    10
}

fn default_timeout() -> i32 {
    1
}

fn default_period() -> i32 {
    10
}

fn default_success_threshold() -> i32 {
    1
}

fn default_failure_threshold() -> i32 {
    3
}

/// HTTP transport of a health probe
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpHealthProbe {
    /// Request path, e.g. /healthz
    pub path: String,

    /// Extra request headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_headers: Vec<HttpHealthProbeHeader>,
}

/// A header sent with an HTTP health probe
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HttpHealthProbeHeader {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_documented_example() {
        let yaml = r#"
image: ghcr.io/spinkube/hello:latest
executor: containerd-shim-spin
replicas: 2
variables:
  - name: greeting
    value: hi
runtimeConfig:
  keyValueStores:
    - name: default
      type: redis
      options:
        - name: url
          valueFrom:
            secretKeyRef:
              name: redis
              key: url
checks:
  readiness:
    httpGet:
      path: /healthz
"#;
        let spec: SpinAppSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.executor, "containerd-shim-spin");
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(spec.variables[0].value.as_deref(), Some("hi"));

        let kv = &spec.runtime_config.key_value_stores[0];
        assert_eq!(kv.type_, "redis");
        let secret_ref = kv.options[0]
            .value_from
            .as_ref()
            .and_then(|v| v.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(secret_ref.name, "redis");

        let readiness = spec.checks.readiness.unwrap();
        assert_eq!(readiness.initial_delay_seconds, 10);
        assert_eq!(readiness.failure_threshold, 3);
        assert_eq!(readiness.http_get.unwrap().path, "/healthz");
    }

    #[test]
    fn desired_replicas_defaults_to_one() {
        let spec = SpinAppSpec::default();
        assert_eq!(spec.desired_replicas(), Some(1));
    }

    #[test]
    fn desired_replicas_is_none_when_autoscaling() {
        let spec = SpinAppSpec {
            enable_autoscaling: true,
            replicas: Some(4),
            ..Default::default()
        };
        assert_eq!(spec.desired_replicas(), None);
    }

    #[test]
    fn empty_load_from_secret_is_ignored() {
        let rc = RuntimeConfig {
            load_from_secret: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(rc.verbatim_secret(), None);
    }

    #[test]
    fn status_serializes_camel_case() {
        let status = SpinAppStatus {
            active_scheduler: Some("shim".to_string()),
            ready_replicas: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["activeScheduler"], "shim");
        assert_eq!(json["readyReplicas"], 3);
    }
}
