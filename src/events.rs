//! Kubernetes Events emitted by the Spin operator
//!
//! Controllers publish through the [`EventPublisher`] trait so tests can run
//! without an API server. Publishing is fire-and-forget: a failed event is
//! logged and never fails a reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Name reported as the Events' reporting component
pub const REPORTER: &str = "spin-operator";

/// Publishes Events about operator-managed objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `regarding`
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Publisher reporting as `controller`
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        regarding: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, regarding).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _regarding: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    /// The executor referenced by a SpinApp does not exist
    pub const MISSING_EXECUTOR: &str = "MissingExecutor";
    /// A referenced Secret or ConfigMap does not exist
    pub const MISSING_DEPENDENCY: &str = "MissingDependency";
    /// Child resources could not be built from the SpinApp
    pub const INVALID_SPEC: &str = "InvalidSpec";
    /// An executor deletion is blocked by SpinApps still using it
    pub const DEPENDENTS_EXIST: &str = "DependentsExist";
}

/// Event actions (ACTION column of `kubectl get events`)
pub mod actions {
    /// Regular reconcile pass
    pub const RECONCILE: &str = "Reconcile";
    /// Finalizer-driven deletion handling
    pub const DELETE: &str = "Delete";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_publisher_accepts_events() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::MISSING_EXECUTOR,
                actions::RECONCILE,
                Some("Could not find SpinAppExecutor default/shim".to_string()),
            )
            .await;
    }

    #[test]
    fn reasons_are_pascal_case() {
        for reason in [
            reasons::MISSING_EXECUTOR,
            reasons::MISSING_DEPENDENCY,
            reasons::INVALID_SPEC,
            reasons::DEPENDENTS_EXIST,
        ] {
            assert!(reason.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
            assert!(!reason.contains(' '));
        }
    }
}
