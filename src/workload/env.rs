//! Environment of the app container

use k8s_openapi::api::core::v1::EnvVar;

use crate::crd::{OtelConfig, SpinApp};
use crate::runtime_config::VARIABLE_ENV_PREFIX;

/// Address Spin binds its HTTP trigger to
pub const LISTEN_ADDR: &str = "0.0.0.0:80";

/// Build the container environment.
///
/// Each Spin variable becomes `SPIN_VARIABLE_<NAME>` with its value or
/// source passed through, followed by the listen address and any non-empty
/// OTEL endpoints of the executor.
pub fn construct_env(app: &SpinApp, otel: Option<&OtelConfig>) -> Vec<EnvVar> {
    let mut env: Vec<EnvVar> = app
        .spec
        .variables
        .iter()
        .map(|var| EnvVar {
            name: format!("{}{}", VARIABLE_ENV_PREFIX, var.name.to_uppercase()),
            value: var.value.clone(),
            value_from: var.value_from.clone(),
        })
        .collect();

    env.push(plain("SPIN_HTTP_LISTEN_ADDR", LISTEN_ADDR));

    if let Some(otel) = otel {
        let endpoints = [
            ("OTEL_EXPORTER_OTLP_ENDPOINT", &otel.exporter_otlp_endpoint),
            ("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT", &otel.exporter_otlp_traces_endpoint),
            ("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT", &otel.exporter_otlp_metrics_endpoint),
            ("OTEL_EXPORTER_OTLP_LOGS_ENDPOINT", &otel.exporter_otlp_logs_endpoint),
        ];
        env.extend(
            endpoints
                .into_iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| plain(name, value)),
        );
    }

    env
}

fn plain(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}
