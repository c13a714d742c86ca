//! SpinApp defaulting and validation

use std::sync::Arc;

use axum::{extract::State, Json};
use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::ResourceExt;
use tracing::{debug, error, info};

use super::{decode_object, deny, invalid_message, FieldError, WebhookState};
use crate::crd::{SpinApp, SpinAppExecutor, SpinAppSpec};

/// Mutating webhook: fill in `spec.executor` when empty
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(default_spin_app(&state, &req).await.into_review())
}

async fn default_spin_app(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let app: SpinApp = match decode_object(request) {
        Ok(Some(app)) => app,
        Ok(None) => return AdmissionResponse::from(request),
        Err(e) => return deny(request, format!("failed to decode SpinApp: {e}")),
    };
    if !app.spec.executor.is_empty() {
        return AdmissionResponse::from(request);
    }

    let namespace = request
        .namespace
        .clone()
        .or_else(|| app.namespace())
        .unwrap_or_default();
    let executors = match state.kube.list_executors(&namespace).await {
        Ok(executors) => executors,
        Err(e) => {
            error!(error = %e, "failed to list SpinAppExecutors");
            return deny(request, e);
        }
    };

    let Some(executor) = default_executor(&executors) else {
        debug!(%namespace, "no SpinAppExecutors found, leaving executor unset");
        return AdmissionResponse::from(request);
    };
    info!(app = %app.name_any(), %executor, "defaulting executor");

    let ops = vec![PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(["spec", "executor"]),
        value: serde_json::Value::String(executor),
    })];
    match AdmissionResponse::from(request).with_patch(json_patch::Patch(ops)) {
        Ok(response) => response,
        Err(e) => deny(request, format!("patch serialization error: {e}")),
    }
}

/// Name of the alphabetically first executor, if any
pub fn default_executor(executors: &[SpinAppExecutor]) -> Option<String> {
    executors.iter().map(|e| e.name_any()).min()
}

/// Validating webhook for SpinApps
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(validate_request(&state, &req).await.into_review())
}

async fn validate_request(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let app: SpinApp = match decode_object(request) {
        Ok(Some(app)) => app,
        Ok(None) => return AdmissionResponse::from(request),
        Err(e) => return deny(request, format!("failed to decode SpinApp: {e}")),
    };
    let name = app.name_any();
    let namespace = request
        .namespace
        .clone()
        .or_else(|| app.namespace())
        .unwrap_or_default();

    let executor = if app.spec.executor.is_empty() {
        None
    } else {
        match state.kube.get_executor(&app.spec.executor, &namespace).await {
            Ok(executor) => executor,
            Err(e) => {
                error!(error = %e, "failed to look up SpinAppExecutor");
                return deny(request, format!("failed to look up executor: {e}"));
            }
        }
    };

    let errors = validate_spin_app(&app.spec, executor.as_ref());
    if errors.is_empty() {
        debug!(app = %name, "SpinApp is valid");
        return AdmissionResponse::from(request);
    }
    let message = invalid_message("SpinApp", &name, &errors);
    info!(app = %name, %message, "rejecting SpinApp");
    deny(request, message)
}

/// Every field error of a SpinApp. `executor` is the referenced executor
/// if it exists.
pub fn validate_spin_app(
    spec: &SpinAppSpec,
    executor: Option<&SpinAppExecutor>,
) -> Vec<FieldError> {
    let mut errors = Vec::new();
    errors.extend(validate_executor_ref(spec, executor.is_some()));
    errors.extend(validate_replicas(spec));
    if let Some(executor) = executor {
        errors.extend(validate_annotations(spec, executor));
    }
    errors
}

fn validate_executor_ref(spec: &SpinAppSpec, exists: bool) -> Option<FieldError> {
    if spec.executor.is_empty() {
        return Some(FieldError::invalid(
            "spec.executor",
            "",
            "executor must be set, likely no default executor was set because you have no executors installed",
        ));
    }
    (!exists).then(|| {
        FieldError::invalid(
            "spec.executor",
            spec.executor.as_str(),
            "executor does not exist on cluster",
        )
    })
}

/// Zero and unset are the same replica count: neither may be combined
/// with manual scaling, both are fine under autoscaling.
fn validate_replicas(spec: &SpinAppSpec) -> Option<FieldError> {
    let replicas = spec.replicas.unwrap_or(0);
    if spec.enable_autoscaling {
        (replicas != 0).then(|| {
            FieldError::invalid(
                "spec.replicas",
                replicas,
                "replicas cannot be set when autoscaling is enabled",
            )
        })
    } else {
        (replicas < 1)
            .then(|| FieldError::invalid("spec.replicas", replicas, "replicas must be > 0"))
    }
}

fn validate_annotations(spec: &SpinAppSpec, executor: &SpinAppExecutor) -> Vec<FieldError> {
    if executor.spec.create_deployment {
        return Vec::new();
    }
    let mut errors = Vec::new();
    if !spec.deployment_annotations.is_empty() {
        errors.push(FieldError::invalid(
            "spec.deploymentAnnotations",
            serde_json::json!(spec.deployment_annotations),
            "deploymentAnnotations can't be set when the executor does not use operator deployments",
        ));
    }
    if !spec.pod_annotations.is_empty() {
        errors.push(FieldError::invalid(
            "spec.podAnnotations",
            serde_json::json!(spec.pod_annotations),
            "podAnnotations can't be set when the executor does not use operator deployments",
        ));
    }
    errors
}
