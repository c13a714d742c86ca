//! SpinAppExecutor CRD
//!
//! An executor is a namespaced policy describing whether the operator should
//! materialize a Deployment for the apps that reference it, and how.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SpinAppExecutor defines how SpinApps that reference it are executed.
///
/// Example:
/// ```yaml
/// apiVersion: core.spinoperator.dev/v1alpha1
/// kind: SpinAppExecutor
/// metadata:
///   name: containerd-shim-spin
/// spec:
///   createDeployment: true
///   deploymentConfig:
///     runtimeClassName: wasmtime-spin-v2
///     installDefaultCACerts: true
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.spinoperator.dev",
    version = "v1alpha1",
    kind = "SpinAppExecutor",
    namespaced,
    status = "SpinAppExecutorStatus",
    printcolumn = r#"{"name":"Deployment","type":"boolean","jsonPath":".spec.createDeployment"}"#,
    printcolumn = r#"{"name":"RuntimeClass","type":"string","jsonPath":".spec.deploymentConfig.runtimeClassName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpinAppExecutorSpec {
    /// Whether the operator creates a Deployment for apps, or the app is
    /// realized externally
    pub create_deployment: bool,

    /// Deployment settings, used when `createDeployment` is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_config: Option<ExecutorDeploymentConfig>,
}

/// Observed state of a SpinAppExecutor (currently empty)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct SpinAppExecutorStatus {}

/// How Deployments for this executor are configured
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorDeploymentConfig {
    /// Runtime class for app pods (shim execution). Mutually exclusive with
    /// `spinImage`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_class_name: Option<String>,

    /// Image running Spin in a regular container. Mutually exclusive with
    /// `runtimeClassName`; app images must be pullable without auth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spin_image: Option<String>,

    /// Secret holding `ca-certificates.crt` mounted into app pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_secret: Option<String>,

    /// Create a default CA bundle secret (`spin-ca`) when no
    /// `caCertSecret` is given
    #[serde(default, rename = "installDefaultCACerts")]
    pub install_default_ca_certs: bool,

    /// OpenTelemetry exporter settings passed to app pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otel: Option<OtelConfig>,
}

impl ExecutorDeploymentConfig {
    /// Runtime class name, ignoring empty strings
    pub fn runtime_class(&self) -> Option<&str> {
        self.runtime_class_name.as_deref().filter(|s| !s.is_empty())
    }

    /// Spin image, ignoring empty strings
    pub fn spin_image(&self) -> Option<&str> {
        self.spin_image.as_deref().filter(|s| !s.is_empty())
    }

    /// Explicit CA secret name, ignoring empty strings
    pub fn ca_secret(&self) -> Option<&str> {
        self.ca_cert_secret.as_deref().filter(|s| !s.is_empty())
    }
}

/// OpenTelemetry exporter endpoints. Field names follow the OTEL env vars.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct OtelConfig {
    /// Combined OTLP endpoint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exporter_otlp_endpoint: String,
    /// Trace-specific OTLP endpoint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exporter_otlp_traces_endpoint: String,
    /// Metrics-specific OTLP endpoint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exporter_otlp_metrics_endpoint: String,
    /// Logs-specific OTLP endpoint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exporter_otlp_logs_endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shim_executor() {
        let yaml = r#"
createDeployment: true
deploymentConfig:
  runtimeClassName: wasmtime-spin-v2
  installDefaultCACerts: true
  otel:
    exporter_otlp_endpoint: http://otel:4318
"#;
        let spec: SpinAppExecutorSpec = serde_yaml::from_str(yaml).unwrap();
        let config = spec.deployment_config.unwrap();
        assert_eq!(config.runtime_class(), Some("wasmtime-spin-v2"));
        assert_eq!(config.spin_image(), None);
        assert!(config.install_default_ca_certs);
        assert_eq!(config.otel.unwrap().exporter_otlp_endpoint, "http://otel:4318");
    }

    #[test]
    fn empty_strings_read_as_unset() {
        let config = ExecutorDeploymentConfig {
            runtime_class_name: Some(String::new()),
            ca_cert_secret: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(config.runtime_class(), None);
        assert_eq!(config.ca_secret(), None);
    }
}
