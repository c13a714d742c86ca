//! Child resources generated for a SpinApp
//!
//! Everything in here is a pure function of the SpinApp, its executor's
//! deployment config and the names of the secrets the controller prepared:
//! - [`volumes`]: runtime-config, user and CA volumes with their mounts
//! - [`env`]: Spin variables, listen address and OTEL endpoints
//! - [`probes`]: readiness/liveness probes
//! - [`deployment`]: the Deployment running the app
//! - [`service`]: the ClusterIP Service in front of ready pods

pub mod deployment;
pub mod env;
pub mod probes;
pub mod service;
pub mod volumes;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use crate::crd::SpinApp;
use crate::Error;

pub use deployment::construct_deployment;
pub use env::construct_env;
pub use probes::construct_probes;
pub use service::construct_service;
pub use volumes::construct_volumes;

// =============================================================================
// Labels and well-known names
// =============================================================================

/// Label carrying the owning app's name on every generated object
pub const NAME_LABEL: &str = "core.spinoperator.dev/app-name";

/// Value of the per-app status label on pods that should receive traffic
pub const STATUS_READY: &str = "ready";

/// Name of the container port serving the app
pub const HTTP_PORT_NAME: &str = "http-app";

/// Port Spin listens on inside the pod
pub const DEFAULT_HTTP_PORT: i32 = 80;

/// Per-app status label key, `core.spinoperator.dev/app.<name>.status`
pub fn status_label(app_name: &str) -> String {
    format!("core.spinoperator.dev/app.{app_name}.status")
}

/// Labels put on the Deployment, Service and generated Secrets
pub fn app_labels(app_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(NAME_LABEL.to_string(), app_name.to_string())])
}

/// Labels selecting the app's pods: the app-name label plus the ready
/// status label
pub fn ready_labels(app_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), app_name.to_string()),
        (status_label(app_name), STATUS_READY.to_string()),
    ])
}

/// Controller owner reference pointing at the app.
///
/// Fails when the app has not been persisted yet (no uid).
pub fn owner_reference(app: &SpinApp) -> Result<OwnerReference, Error> {
    app.controller_owner_ref(&()).ok_or_else(|| {
        Error::construct(
            "owner reference",
            format!("SpinApp {} has no uid", app.name_any()),
        )
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use crate::crd::{ExecutorDeploymentConfig, SpinApp, SpinAppSpec};

    pub fn app(name: &str) -> SpinApp {
        SpinApp {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                uid: Some(format!("{name}-uid")),
                ..Default::default()
            },
            spec: SpinAppSpec {
                executor: "containerd-shim-spin".to_string(),
                image: "ghcr.io/example/app:v1".to_string(),
                ..Default::default()
            },
            status: None,
        }
    }

    pub fn shim_config() -> ExecutorDeploymentConfig {
        ExecutorDeploymentConfig {
            runtime_class_name: Some("wasmtime-spin-v2".to_string()),
            ..Default::default()
        }
    }

    pub fn spintainer_config() -> ExecutorDeploymentConfig {
        ExecutorDeploymentConfig {
            spin_image: Some("ghcr.io/fermyon/spin:v2.7.0".to_string()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_labels_include_status_label() {
        let labels = ready_labels("hello");
        assert_eq!(labels[NAME_LABEL], "hello");
        assert_eq!(labels["core.spinoperator.dev/app.hello.status"], "ready");
    }

    #[test]
    fn owner_reference_is_controller() {
        let app = fixtures::app("hello");
        let owner = owner_reference(&app).unwrap();
        assert_eq!(owner.kind, "SpinApp");
        assert_eq!(owner.name, "hello");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn owner_reference_requires_uid() {
        let mut app = fixtures::app("hello");
        app.metadata.uid = None;
        assert!(owner_reference(&app).is_err());
    }
}
