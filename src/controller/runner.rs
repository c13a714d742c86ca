//! Wiring of the controllers into kube-runtime

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::info;

use super::{executor, spin_app, ExecutorContext, SpinAppContext};
use crate::crd::{SpinApp, SpinAppExecutor};
use crate::workload::NAME_LABEL;

/// Server-side watch timeout, kept under the client's 30s read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// SpinApp controller, also triggered by changes to owned children
pub fn spin_app_controller(client: Client, ctx: Arc<SpinAppContext>) -> ControllerFuture {
    let apps: Api<SpinApp> = Api::all(client.clone());
    let children = watcher_config().labels(NAME_LABEL);

    info!("- SpinApp controller");
    Box::pin(
        Controller::new(apps, watcher_config())
            .owns(Api::<Deployment>::all(client.clone()), children.clone())
            .owns(Api::<Service>::all(client.clone()), children.clone())
            .owns(Api::<Secret>::all(client), children)
            .shutdown_on_signal()
            .run(spin_app::reconcile, spin_app::error_policy, ctx)
            .for_each(log_reconcile_result("SpinApp")),
    )
}

/// SpinAppExecutor controller
pub fn executor_controller(client: Client, ctx: Arc<ExecutorContext>) -> ControllerFuture {
    let executors: Api<SpinAppExecutor> = Api::all(client);

    info!("- SpinAppExecutor controller");
    Box::pin(
        Controller::new(executors, watcher_config())
            .shutdown_on_signal()
            .run(executor::reconcile, executor::error_policy, ctx)
            .for_each(log_reconcile_result("SpinAppExecutor")),
    )
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(obj) => tracing::debug!(?obj, "{} reconciliation completed", controller),
            Err(e) => tracing::warn!(error = ?e, "{} reconciliation error", controller),
        }
        std::future::ready(())
    }
}
