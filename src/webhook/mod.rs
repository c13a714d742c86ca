//! Admission webhooks for the Spin operator CRDs
//!
//! - `POST /mutate-spinapp`: defaults `spec.executor`
//! - `POST /validate-spinapp`: rejects inconsistent SpinApps
//! - `POST /validate-spinappexecutor`: rejects ambiguous executors
//! - `GET /healthz`
//!
//! Served over HTTPS from certificates provisioned into a directory
//! (`tls.crt` / `tls.key`). Requests that cannot be parsed are refused, so
//! the webhook fails closed.

pub mod executor;
pub mod spin_app;

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::controller::SpinKubeClient;
use crate::Error;

/// Shared state of the webhook handlers
#[derive(Clone)]
pub struct WebhookState {
    /// Lookups of executors referenced by SpinApps
    pub kube: Arc<dyn SpinKubeClient>,
}

impl WebhookState {
    /// Create handler state
    pub fn new(kube: Arc<dyn SpinKubeClient>) -> Self {
        Self { kube }
    }
}

/// Router with every admission endpoint
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate-spinapp", post(spin_app::mutate_handler))
        .route("/validate-spinapp", post(spin_app::validate_handler))
        .route("/validate-spinappexecutor", post(executor::validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Serve the webhooks over TLS until the process exits
pub async fn serve(
    addr: SocketAddr,
    cert_dir: &Path,
    state: Arc<WebhookState>,
) -> Result<(), Error> {
    let cert = cert_dir.join("tls.crt");
    let key = cert_dir.join("tls.key");
    let tls = RustlsConfig::from_pem_file(&cert, &key).await.map_err(|e| {
        Error::internal_with_context(
            "webhook",
            format!("failed to load serving certificate from {}: {e}", cert_dir.display()),
        )
    })?;

    info!(%addr, "starting admission webhook server");
    axum_server::bind_rustls(addr, tls)
        .serve(webhook_router(state).into_make_service())
        .await
        .map_err(|e| Error::internal_with_context("webhook", e.to_string()))
}

// =============================================================================
// Field errors
// =============================================================================

/// One invalid field, rendered the way the Kubernetes API server renders
/// field errors: `spec.replicas: Invalid value: 0: replicas must be > 0`
#[derive(Clone, Debug, PartialEq)]
pub struct FieldError {
    /// Dotted field path
    pub field: &'static str,
    /// Offending value
    pub value: serde_json::Value,
    /// What is wrong with it
    pub detail: String,
}

impl FieldError {
    /// Invalid value error
    pub fn invalid(
        field: &'static str,
        value: impl Into<serde_json::Value>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            field,
            value: value.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: Invalid value: {}: {}", self.field, self.value, self.detail)
    }
}

/// `<Kind>.core.spinoperator.dev "<name>" is invalid: <errors>`.
///
/// Several errors are listed in brackets, a single one is not.
pub fn invalid_message(kind: &str, name: &str, errors: &[FieldError]) -> String {
    let rendered = match errors {
        [single] => single.to_string(),
        many => format!(
            "[{}]",
            many.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    format!(
        "{kind}.{} \"{name}\" is invalid: {rendered}",
        crate::crd::API_GROUP
    )
}

/// Object of a request decoded as `K`
fn decode_object<K: DeserializeOwned>(
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Option<K>, serde_json::Error> {
    request
        .object
        .as_ref()
        .map(|obj| serde_json::to_value(obj).and_then(serde_json::from_value))
        .transpose()
}

fn deny(request: &AdmissionRequest<DynamicObject>, message: impl ToString) -> AdmissionResponse {
    AdmissionResponse::from(request).deny(message)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_error_renders_like_api_server() {
        let err = FieldError::invalid("spec.replicas", 0, "replicas must be > 0");
        assert_eq!(err.to_string(), "spec.replicas: Invalid value: 0: replicas must be > 0");

        let err = FieldError::invalid("spec.executor", "", "executor must be set");
        assert_eq!(err.to_string(), "spec.executor: Invalid value: \"\": executor must be set");
    }

    #[test]
    fn aggregate_brackets_multiple_errors() {
        let one = FieldError::invalid("spec.replicas", 0, "replicas must be > 0");
        let two = FieldError::invalid("spec.executor", "x", "executor does not exist on cluster");

        assert_eq!(
            invalid_message("SpinApp", "hello", std::slice::from_ref(&one)),
            "SpinApp.core.spinoperator.dev \"hello\" is invalid: spec.replicas: Invalid value: 0: replicas must be > 0"
        );
        let both = invalid_message("SpinApp", "hello", &[two, one]);
        assert!(
            both.starts_with("SpinApp.core.spinoperator.dev \"hello\" is invalid: [spec.executor")
        );
        assert!(both.ends_with("replicas must be > 0]"));
    }
}
