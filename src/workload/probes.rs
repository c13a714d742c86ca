//! Health probes of the app container

use k8s_openapi::api::core::v1::{HTTPGetAction, HTTPHeader, Probe};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::DEFAULT_HTTP_PORT;
use crate::crd::{HealthChecks, HealthProbe};
use crate::Error;

const UNKNOWN_CONFIGURATION: &str = "probe exists but with unknown configuration, expected httpGet";

/// Translate the app's checks into `(readiness, liveness)` probes
pub fn construct_probes(checks: &HealthChecks) -> Result<(Option<Probe>, Option<Probe>), Error> {
    let readiness = checks
        .readiness
        .as_ref()
        .map(|p| construct_probe(p).map_err(|msg| Error::construct("readiness probe", msg)))
        .transpose()?;
    let liveness = checks
        .liveness
        .as_ref()
        .map(|p| construct_probe(p).map_err(|msg| Error::construct("liveness probe", msg)))
        .transpose()?;
    Ok((readiness, liveness))
}

fn construct_probe(probe: &HealthProbe) -> Result<Probe, &'static str> {
    let http = probe.http_get.as_ref().ok_or(UNKNOWN_CONFIGURATION)?;

    let headers = http
        .http_headers
        .iter()
        .map(|h| HTTPHeader {
            name: h.name.clone(),
            value: h.value.clone(),
        })
        .collect();

    Ok(Probe {
        http_get: Some(HTTPGetAction {
            path: Some(http.path.clone()),
            port: IntOrString::Int(DEFAULT_HTTP_PORT),
            http_headers: Some(headers),
            ..Default::default()
        }),
        initial_delay_seconds: Some(probe.initial_delay_seconds),
        timeout_seconds: Some(probe.timeout_seconds),
        period_seconds: Some(probe.period_seconds),
        success_threshold: Some(probe.success_threshold),
        failure_threshold: Some(probe.failure_threshold),
        ..Default::default()
    })
}
