//! SpinAppExecutor reconciliation
//!
//! Executors carry a finalizer so they cannot disappear from under the apps
//! that reference them. Deletion is held until no SpinApp in the namespace
//! names the executor.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, instrument};

use super::{has_executor_finalizer, SpinKubeClient, SpinKubeClientImpl, RETRY_AFTER};
use crate::crd::SpinAppExecutor;
use crate::events::{actions, reasons, EventPublisher, KubeEventPublisher};
use crate::metrics::{MetricsRecorder, OtelMetricsRecorder};
use crate::Error;

/// Shared state of the executor controller
pub struct ExecutorContext {
    /// Kubernetes API access
    pub kube: Arc<dyn SpinKubeClient>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Metrics sink
    pub metrics: Arc<dyn MetricsRecorder>,
}

impl ExecutorContext {
    /// Create a context from its parts
    pub fn new(
        kube: Arc<dyn SpinKubeClient>,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> Self {
        Self {
            kube,
            events,
            metrics,
        }
    }

    /// Production context backed by a kube client
    pub fn from_client(client: Client) -> Self {
        Self::new(
            Arc::new(SpinKubeClientImpl::new(client.clone())),
            Arc::new(KubeEventPublisher::new(client, "spinappexecutor-controller")),
            Arc::new(OtelMetricsRecorder),
        )
    }

    /// Context with a mock client and no-op sinks
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn SpinKubeClient>) -> Self {
        Self::new(
            kube,
            Arc::new(crate::events::NoopEventPublisher),
            Arc::new(crate::metrics::NoopMetricsRecorder),
        )
    }
}

/// Reconcile one SpinAppExecutor
#[instrument(
    skip(executor, ctx),
    fields(executor = %executor.name_any(), namespace = %executor.namespace().unwrap_or_default())
)]
pub async fn reconcile(
    executor: Arc<SpinAppExecutor>,
    ctx: Arc<ExecutorContext>,
) -> Result<Action, Error> {
    let name = executor.name_any();
    let namespace = executor.namespace().unwrap_or_default();

    if executor.meta().deletion_timestamp.is_some() {
        return handle_deletion(&executor, &ctx).await;
    }

    if !has_executor_finalizer(&executor) {
        info!("adding executor finalizer");
        ctx.kube.add_executor_finalizer(&name, &namespace).await?;
    }

    let runtime_class = executor
        .spec
        .deployment_config
        .as_ref()
        .and_then(|c| c.runtime_class())
        .unwrap_or_default();
    ctx.metrics.executor_info(
        &name,
        &namespace,
        executor.spec.create_deployment,
        runtime_class,
    );
    Ok(Action::await_change())
}

async fn handle_deletion(
    executor: &SpinAppExecutor,
    ctx: &ExecutorContext,
) -> Result<Action, Error> {
    if !has_executor_finalizer(executor) {
        return Ok(Action::await_change());
    }
    let name = executor.name_any();
    let namespace = executor.namespace().unwrap_or_default();

    let dependents = ctx
        .kube
        .list_apps(&namespace)
        .await?
        .into_iter()
        .filter(|app| app.spec.executor == name)
        .count();

    if dependents > 0 {
        ctx.events
            .publish(
                &executor.object_ref(&()),
                EventType::Warning,
                reasons::DEPENDENTS_EXIST,
                actions::DELETE,
                Some(format!(
                    "cannot delete SpinAppExecutor with dependent SpinApps ({dependents} remaining)"
                )),
            )
            .await;
        return Err(Error::DependentsExist {
            executor: name,
            count: dependents,
        });
    }

    info!("no dependent SpinApps left, releasing executor");
    ctx.kube.remove_executor_finalizer(&name, &namespace).await?;
    Ok(Action::await_change())
}

/// Requeue retryable failures, wait for a spec change otherwise
pub fn error_policy(
    executor: Arc<SpinAppExecutor>,
    error: &Error,
    _ctx: Arc<ExecutorContext>,
) -> Action {
    error!(
        ?error,
        executor = %executor.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(RETRY_AFTER)
    } else {
        Action::await_change()
    }
}
