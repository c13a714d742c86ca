//! SpinApp reconciliation
//!
//! One pass: fetch the app, resolve its executor, publish status, then (for
//! executors that create deployments) render the runtime config, make sure
//! the config and CA secrets exist and apply the Deployment. The Service is
//! applied for every executor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::{SpinKubeClient, SpinKubeClientImpl, RETRY_AFTER};
use crate::cacerts::DEFAULT_CA_SECRET;
use crate::crd::{
    set_condition, Condition, ConditionStatus, ExecutorDeploymentConfig, SpinApp,
    SpinAppExecutor, SpinAppStatus,
};
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::metrics::{MetricsRecorder, OtelMetricsRecorder};
use crate::runtime_config::{
    secret_name, ReferenceLookup, RuntimeConfigBuilder, RUNTIME_CONFIG_KEY,
};
use crate::workload::volumes::CA_BUNDLE_KEY;
use crate::workload::{app_labels, construct_deployment, construct_service, owner_reference};
use crate::Error;

/// Default deadline of one reconcile pass
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

const AVAILABLE: &str = "Available";
const PROGRESSING: &str = "Progressing";

/// Shared state of the SpinApp controller
pub struct SpinAppContext {
    /// Kubernetes API access
    pub kube: Arc<dyn SpinKubeClient>,
    /// Runtime config resolution
    pub config_builder: RuntimeConfigBuilder,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Metrics sink
    pub metrics: Arc<dyn MetricsRecorder>,
    /// PEM bundle for `spin-ca` secrets, if one was loaded
    pub ca_bundle: Option<Arc<str>>,
    /// Deadline of one reconcile pass
    pub reconcile_timeout: Duration,
}

impl SpinAppContext {
    /// Create a context from its parts
    pub fn new(
        kube: Arc<dyn SpinKubeClient>,
        lookup: Arc<dyn ReferenceLookup>,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            kube,
            config_builder: RuntimeConfigBuilder::new(lookup),
            events,
            metrics,
            ca_bundle: None,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
        }
    }

    /// Production context backed by a kube client
    pub fn from_client(client: Client) -> Self {
        let kube = Arc::new(SpinKubeClientImpl::new(client.clone()));
        Self::new(
            kube.clone(),
            kube,
            Arc::new(KubeEventPublisher::new(client, "spinapp-controller")),
            Arc::new(OtelMetricsRecorder),
        )
    }

    /// Use `bundle` for default CA secrets
    pub fn with_ca_bundle(mut self, bundle: impl Into<Arc<str>>) -> Self {
        self.ca_bundle = Some(bundle.into());
        self
    }

    /// Bound every pass by `timeout`
    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    /// Context with mocks and no-op sinks
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn SpinKubeClient>,
        lookup: Arc<dyn ReferenceLookup>,
    ) -> Self {
        Self::new(
            kube,
            lookup,
            Arc::new(crate::events::NoopEventPublisher),
            Arc::new(crate::metrics::NoopMetricsRecorder),
        )
    }
}

/// Reconcile one SpinApp, bounded by the context's deadline
#[instrument(
    skip(app, ctx),
    fields(spinapp = %app.name_any(), namespace = %app.namespace().unwrap_or_default())
)]
pub async fn reconcile(app: Arc<SpinApp>, ctx: Arc<SpinAppContext>) -> Result<Action, Error> {
    let timeout = ctx.reconcile_timeout;
    let pass = async move { reconcile_pass(&app, &ctx).await };
    match tokio::time::timeout(timeout, pass).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            seconds: timeout.as_secs(),
        }),
    }
}

async fn reconcile_pass(trigger: &SpinApp, ctx: &SpinAppContext) -> Result<Action, Error> {
    let name = trigger.name_any();
    let namespace = trigger.namespace().unwrap_or_default();

    let Some(app) = ctx.kube.get_app(&name, &namespace).await? else {
        debug!("SpinApp no longer exists");
        return Ok(Action::await_change());
    };

    let executor_name = app.spec.executor.clone();
    let Some(executor) = ctx.kube.get_executor(&executor_name, &namespace).await? else {
        ctx.events
            .publish(
                &app.object_ref(&()),
                EventType::Warning,
                reasons::MISSING_EXECUTOR,
                actions::RECONCILE,
                Some(format!(
                    "Could not find SpinAppExecutor {namespace}/{executor_name}"
                )),
            )
            .await;
        return Err(Error::missing("SpinAppExecutor", &namespace, &executor_name));
    };

    let app = if executor.spec.create_deployment {
        publish_status(&app, &executor, ctx).await?;
        // pick up the resourceVersion produced by the status write
        match ctx.kube.get_app(&name, &namespace).await? {
            Some(fresh) => fresh,
            None => {
                debug!("SpinApp deleted during status update");
                return Ok(Action::await_change());
            }
        }
    } else {
        app
    };

    if app.meta().deletion_timestamp.is_some() {
        debug!("SpinApp is being deleted, children are garbage collected");
        return Ok(Action::await_change());
    }

    if executor.spec.create_deployment {
        let config = executor.spec.deployment_config.clone().unwrap_or_default();
        reconcile_deployment(&app, &config, ctx).await?;
    } else {
        ctx.kube.delete_deployment(&name, &namespace).await?;
    }

    let service = construct_service(&app)?;
    ctx.kube.apply_service(&service).await?;

    ctx.metrics.spin_app_info(&name, &namespace, &executor_name);
    info!(executor = %executor_name, "SpinApp reconciled");
    Ok(Action::await_change())
}

async fn publish_status(
    app: &SpinApp,
    executor: &SpinAppExecutor,
    ctx: &SpinAppContext,
) -> Result<(), Error> {
    let name = app.name_any();
    let namespace = app.namespace().unwrap_or_default();

    let deployment = ctx.kube.get_deployment(&name, &namespace).await?;
    let status = compute_status(app.status.as_ref(), &executor.name_any(), deployment.as_ref());

    let resource_version = app.resource_version().unwrap_or_default();
    if let Err(e) = ctx
        .kube
        .patch_app_status(&name, &namespace, &resource_version, &status)
        .await
    {
        warn!(error = %e, "failed to update SpinApp status");
    }
    Ok(())
}

/// Status for an app realized by `executor`, mirroring `deployment`.
///
/// Existing conditions keep their transition time unless their status
/// changes.
pub fn compute_status(
    current: Option<&SpinAppStatus>,
    executor: &str,
    deployment: Option<&Deployment>,
) -> SpinAppStatus {
    let mut status = current.cloned().unwrap_or_default();
    status.active_scheduler = Some(executor.to_string());

    let Some(deployment) = deployment else {
        for type_ in [AVAILABLE, PROGRESSING] {
            set_condition(
                &mut status.conditions,
                Condition::new(
                    type_,
                    ConditionStatus::Unknown,
                    "DeploymentNotFound",
                    "Deployment not found",
                ),
            );
        }
        status.ready_replicas = 0;
        return status;
    };

    let observed = deployment.status.as_ref();
    for dc in observed.and_then(|s| s.conditions.as_ref()).into_iter().flatten() {
        if dc.type_ != AVAILABLE && dc.type_ != PROGRESSING {
            continue;
        }
        set_condition(
            &mut status.conditions,
            Condition {
                type_: dc.type_.clone(),
                status: ConditionStatus::from_k8s(&dc.status),
                reason: dc.reason.clone().unwrap_or_default(),
                message: dc.message.clone().unwrap_or_default(),
                last_transition_time: dc
                    .last_transition_time
                    .as_ref()
                    .map(|t| t.0)
                    .unwrap_or_else(Utc::now),
            },
        );
    }
    status.ready_replicas = observed.and_then(|s| s.ready_replicas).unwrap_or(0);
    status
}

async fn reconcile_deployment(
    app: &SpinApp,
    config: &ExecutorDeploymentConfig,
    ctx: &SpinAppContext,
) -> Result<(), Error> {
    let namespace = app.namespace().unwrap_or_default();

    let generated_secret = match ctx.config_builder.build(app).await {
        Ok(Some(doc)) => {
            let rendered = doc.to_toml()?;
            let name = secret_name(&app.name_any(), &rendered);
            let secret = runtime_config_secret(app, &name, rendered)?;
            ctx.kube.create_secret_if_absent(&secret).await?;
            debug!(secret = %name, "runtime config secret ensured");
            Some(name)
        }
        Ok(None) => None,
        Err(e) => {
            if let Error::MissingDependency { .. } = &e {
                ctx.events
                    .publish(
                        &app.object_ref(&()),
                        EventType::Warning,
                        reasons::MISSING_DEPENDENCY,
                        actions::RECONCILE,
                        Some(e.to_string()),
                    )
                    .await;
            }
            return Err(e);
        }
    };

    let ca_secret = match config.ca_secret() {
        Some(name) => Some(name.to_string()),
        None if config.install_default_ca_certs => {
            ensure_default_ca_secret(&namespace, ctx).await?;
            Some(DEFAULT_CA_SECRET.to_string())
        }
        None => None,
    };

    let deployment = match construct_deployment(
        app,
        config,
        generated_secret.as_deref(),
        ca_secret.as_deref(),
    ) {
        Ok(d) => d,
        Err(e) => {
            ctx.events
                .publish(
                    &app.object_ref(&()),
                    EventType::Warning,
                    reasons::INVALID_SPEC,
                    actions::RECONCILE,
                    Some(e.to_string()),
                )
                .await;
            return Err(e);
        }
    };
    ctx.kube.apply_deployment(&deployment).await?;

    // the applied Deployment no longer mounts older generated secrets
    ctx.kube
        .prune_runtime_config_secrets(&app.name_any(), &namespace, generated_secret)
        .await
}

async fn ensure_default_ca_secret(namespace: &str, ctx: &SpinAppContext) -> Result<(), Error> {
    let bundle = ctx.ca_bundle.as_ref().ok_or_else(|| {
        Error::internal_with_context(
            "cacerts",
            "executor requests default CA certificates but no CA bundle is loaded",
        )
    })?;

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(DEFAULT_CA_SECRET.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CA_BUNDLE_KEY.to_string(),
            ByteString(bundle.as_bytes().to_vec()),
        )])),
        ..Default::default()
    };
    ctx.kube.create_secret_if_absent(&secret).await
}

fn runtime_config_secret(app: &SpinApp, name: &str, rendered: String) -> Result<Secret, Error> {
    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: app.namespace(),
            labels: Some(app_labels(&app.name_any())),
            owner_references: Some(vec![owner_reference(app)?]),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            RUNTIME_CONFIG_KEY.to_string(),
            ByteString(rendered.into_bytes()),
        )])),
        ..Default::default()
    })
}

/// Requeue retryable failures, wait for a spec change otherwise
pub fn error_policy(app: Arc<SpinApp>, error: &Error, _ctx: Arc<SpinAppContext>) -> Action {
    error!(
        ?error,
        spinapp = %app.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(RETRY_AFTER)
    } else {
        Action::await_change()
    }
}
