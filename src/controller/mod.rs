//! Controllers for the Spin operator CRDs
//!
//! - [`spin_app`] converges a SpinApp into its Deployment, Service and
//!   runtime-config Secret and mirrors the Deployment's status back
//! - [`executor`] guards SpinAppExecutor deletion with a finalizer
//!
//! Both talk to the API server only through [`SpinKubeClient`], so the
//! reconcile logic is tested against mocks.

pub mod executor;
pub mod runner;
pub mod spin_app;

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{SpinApp, SpinAppExecutor, SpinAppStatus};
use crate::error::{is_conflict, is_not_found};
use crate::runtime_config::{ReferenceLookup, RUNTIME_CONFIG_KEY};
use crate::workload::NAME_LABEL;
use crate::Error;

pub use executor::ExecutorContext;
pub use spin_app::SpinAppContext;

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "spin-operator";

/// Finalizer blocking executor deletion while apps reference it
pub const EXECUTOR_FINALIZER: &str = "core.spinoperator.dev/finalizer";

/// Delay before retrying a retryable failure
pub const RETRY_AFTER: Duration = Duration::from_secs(30);

// =============================================================================
// Kubernetes client port
// =============================================================================

/// Kubernetes operations used by the controllers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpinKubeClient: Send + Sync {
    /// Get a SpinApp
    async fn get_app(&self, name: &str, namespace: &str) -> Result<Option<SpinApp>, Error>;

    /// List SpinApps in a namespace
    async fn list_apps(&self, namespace: &str) -> Result<Vec<SpinApp>, Error>;

    /// Get a SpinAppExecutor
    async fn get_executor(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<SpinAppExecutor>, Error>;

    /// List SpinAppExecutors in a namespace
    async fn list_executors(&self, namespace: &str) -> Result<Vec<SpinAppExecutor>, Error>;

    /// Write a SpinApp's status, failing with a conflict if the object
    /// changed since `resource_version`
    async fn patch_app_status(
        &self,
        name: &str,
        namespace: &str,
        resource_version: &str,
        status: &SpinAppStatus,
    ) -> Result<(), Error>;

    /// Get a Deployment
    async fn get_deployment(&self, name: &str, namespace: &str)
        -> Result<Option<Deployment>, Error>;

    /// Force-apply a Deployment
    async fn apply_deployment(&self, deployment: &Deployment) -> Result<(), Error>;

    /// Delete a Deployment; a missing Deployment is not an error
    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Force-apply a Service
    async fn apply_service(&self, service: &Service) -> Result<(), Error>;

    /// Create a Secret unless one with the same name already exists
    async fn create_secret_if_absent(&self, secret: &Secret) -> Result<(), Error>;

    /// Delete the app's generated runtime-config Secrets except `keep`
    async fn prune_runtime_config_secrets(
        &self,
        app: &str,
        namespace: &str,
        keep: Option<String>,
    ) -> Result<(), Error>;

    /// Add [`EXECUTOR_FINALIZER`] to an executor
    async fn add_executor_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Remove [`EXECUTOR_FINALIZER`] from an executor
    async fn remove_executor_finalizer(&self, name: &str, namespace: &str)
        -> Result<(), Error>;
}

/// [`SpinKubeClient`] and [`ReferenceLookup`] backed by a kube client
#[derive(Clone)]
pub struct SpinKubeClientImpl {
    client: Client,
}

impl SpinKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn apply_params() -> PatchParams {
        PatchParams::apply(FIELD_MANAGER).force()
    }

    async fn set_executor_finalizers(
        &self,
        name: &str,
        namespace: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<SpinAppExecutor> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SpinKubeClient for SpinKubeClientImpl {
    async fn get_app(&self, name: &str, namespace: &str) -> Result<Option<SpinApp>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn list_apps(&self, namespace: &str) -> Result<Vec<SpinApp>, Error> {
        let api: Api<SpinApp> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_executor(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<SpinAppExecutor>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn list_executors(&self, namespace: &str) -> Result<Vec<SpinAppExecutor>, Error> {
        let api: Api<SpinAppExecutor> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_app_status(
        &self,
        name: &str,
        namespace: &str,
        resource_version: &str,
        status: &SpinAppStatus,
    ) -> Result<(), Error> {
        let api: Api<SpinApp> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Deployment>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn apply_deployment(&self, deployment: &Deployment) -> Result<(), Error> {
        let namespace = deployment.namespace().unwrap_or_default();
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &namespace);
        let mut body = deployment.clone();
        body.metadata.managed_fields = None;
        let body = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": body.metadata,
            "spec": body.spec,
        });
        api.patch(&deployment.name_any(), &Self::apply_params(), &Patch::Apply(&body))
            .await?;
        Ok(())
    }

    async fn delete_deployment(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(deployment = name, "deployment already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_service(&self, service: &Service) -> Result<(), Error> {
        let namespace = service.namespace().unwrap_or_default();
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        let body = json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": service.metadata,
            "spec": service.spec,
        });
        api.patch(&service.name_any(), &Self::apply_params(), &Patch::Apply(&body))
            .await?;
        Ok(())
    }

    async fn create_secret_if_absent(&self, secret: &Secret) -> Result<(), Error> {
        let namespace = secret.namespace().unwrap_or_default();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        match api.create(&PostParams::default(), secret).await {
            Ok(_) => Ok(()),
            Err(e) if is_conflict(&e) => {
                debug!(secret = %secret.name_any(), "secret already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn prune_runtime_config_secrets(
        &self,
        app: &str,
        namespace: &str,
        keep: Option<String>,
    ) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let selector = format!("{NAME_LABEL}={app}");
        let secrets = api.list(&ListParams::default().labels(&selector)).await?;

        for name in stale_runtime_config_secrets(app, &secrets.items, keep.as_deref()) {
            match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => debug!(secret = %name, "pruned runtime config secret"),
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn add_executor_finalizer(&self, name: &str, namespace: &str) -> Result<(), Error> {
        let Some(executor) = self.get_executor(name, namespace).await? else {
            return Ok(());
        };
        let mut finalizers = executor.finalizers().to_vec();
        if finalizers.iter().any(|f| f == EXECUTOR_FINALIZER) {
            return Ok(());
        }
        finalizers.push(EXECUTOR_FINALIZER.to_string());
        self.set_executor_finalizers(name, namespace, finalizers)
            .await
    }

    async fn remove_executor_finalizer(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<(), Error> {
        let Some(executor) = self.get_executor(name, namespace).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = executor
            .finalizers()
            .iter()
            .filter(|f| *f != EXECUTOR_FINALIZER)
            .cloned()
            .collect();
        self.set_executor_finalizers(name, namespace, finalizers)
            .await
    }
}

#[async_trait]
impl ReferenceLookup for SpinKubeClientImpl {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        get_opt(Api::namespaced(self.client.clone(), namespace), name).await
    }
}

/// Generated runtime-config Secrets of `app` other than `keep`.
///
/// Only `<app>-<8 hex>` names holding a runtime config are candidates, so
/// user Secrets that happen to carry the app label are left alone.
pub fn stale_runtime_config_secrets(
    app: &str,
    secrets: &[Secret],
    keep: Option<&str>,
) -> Vec<String> {
    secrets
        .iter()
        .filter(|s| {
            s.data
                .as_ref()
                .is_some_and(|d| d.contains_key(RUNTIME_CONFIG_KEY))
        })
        .map(|s| s.name_any())
        .filter(|name| Some(name.as_str()) != keep)
        .filter(|name| {
            name.strip_prefix(app)
                .and_then(|rest| rest.strip_prefix('-'))
                .is_some_and(is_checksum_suffix)
        })
        .collect()
}

fn is_checksum_suffix(suffix: &str) -> bool {
    suffix.len() == 8 && suffix.chars().all(|c| c.is_ascii_hexdigit())
}

/// True if the executor carries [`EXECUTOR_FINALIZER`]
pub fn has_executor_finalizer(executor: &SpinAppExecutor) -> bool {
    executor
        .finalizers()
        .iter()
        .any(|f| f == EXECUTOR_FINALIZER)
}
