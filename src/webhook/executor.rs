//! SpinAppExecutor validation

use std::sync::Arc;

use axum::{extract::State, Json};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::ResourceExt;
use tracing::{error, info};

use super::{decode_object, deny, invalid_message, FieldError, WebhookState};
use crate::crd::{SpinAppExecutor, SpinAppExecutorSpec};

/// Validating webhook for SpinAppExecutors
pub async fn validate_handler(
    State(_state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(validate_request(&req).into_review())
}

fn validate_request(request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let executor: SpinAppExecutor = match decode_object(request) {
        Ok(Some(executor)) => executor,
        Ok(None) => return AdmissionResponse::from(request),
        Err(e) => return deny(request, format!("failed to decode SpinAppExecutor: {e}")),
    };

    let errors = validate_executor(&executor.spec);
    if errors.is_empty() {
        return AdmissionResponse::from(request);
    }
    let message = invalid_message("SpinAppExecutor", &executor.name_any(), &errors);
    info!(executor = %executor.name_any(), %message, "rejecting SpinAppExecutor");
    deny(request, message)
}

/// Field errors of an executor spec.
///
/// Executors creating deployments need exactly one of `runtimeClassName`
/// and `spinImage`.
pub fn validate_executor(spec: &SpinAppExecutorSpec) -> Vec<FieldError> {
    if !spec.create_deployment {
        return Vec::new();
    }
    let config = spec.deployment_config.clone().unwrap_or_default();
    match (config.runtime_class(), config.spin_image()) {
        (Some(class), Some(_)) => vec![FieldError::invalid(
            "spec.deploymentConfig.runtimeClassName",
            class,
            "runtimeClassName and spinImage are mutually exclusive",
        )],
        (None, None) => vec![FieldError::invalid(
            "spec.deploymentConfig.runtimeClassName",
            "",
            "either runtimeClassName or spinImage must be set",
        )],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MockSpinKubeClient;
    use crate::crd::ExecutorDeploymentConfig;
    use crate::webhook::testing::{response, review};
    use serde_json::json;

    fn spec(runtime_class: Option<&str>, spin_image: Option<&str>) -> SpinAppExecutorSpec {
        SpinAppExecutorSpec {
            create_deployment: true,
            deployment_config: Some(ExecutorDeploymentConfig {
                runtime_class_name: runtime_class.map(str::to_string),
                spin_image: spin_image.map(str::to_string),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn exactly_one_execution_profile_is_required() {
        assert!(validate_executor(&spec(Some("wasmtime-spin-v2"), None)).is_empty());
        assert!(validate_executor(&spec(None, Some("ghcr.io/fermyon/spin:v2"))).is_empty());

        let both = validate_executor(&spec(Some("wasmtime-spin-v2"), Some("spin")));
        assert_eq!(
            both[0].to_string(),
            "spec.deploymentConfig.runtimeClassName: Invalid value: \"wasmtime-spin-v2\": runtimeClassName and spinImage are mutually exclusive"
        );

        let neither = validate_executor(&spec(None, None));
        assert!(neither[0]
            .to_string()
            .ends_with("either runtimeClassName or spinImage must be set"));
    }

    #[test]
    fn external_executors_need_no_profile() {
        let spec = SpinAppExecutorSpec {
            create_deployment: false,
            deployment_config: None,
        };
        assert!(validate_executor(&spec).is_empty());
    }

    /// Story: an ambiguous executor is denied at admission
    #[tokio::test]
    async fn story_ambiguous_executor_is_denied() {
        let state = Arc::new(WebhookState::new(Arc::new(MockSpinKubeClient::new())));
        let body = review(
            "SpinAppExecutor",
            "spinappexecutors",
            json!({
                "apiVersion": "core.spinoperator.dev/v1alpha1",
                "kind": "SpinAppExecutor",
                "metadata": {"name": "both", "namespace": "default"},
                "spec": {
                    "createDeployment": true,
                    "deploymentConfig": {"runtimeClassName": "wasmtime-spin-v2", "spinImage": "spin"}
                }
            }),
        );

        let Json(out) = validate_handler(State(state), Json(body)).await;
        let resp = response(out);
        assert!(!resp.allowed);
        assert!(resp
            .result
            .message
            .starts_with("SpinAppExecutor.core.spinoperator.dev \"both\" is invalid:"));
    }
}
