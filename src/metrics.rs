//! Operator metrics
//!
//! Gauges are OpenTelemetry instruments on the global meter; they are
//! exported when telemetry is initialized with an OTLP endpoint. Controllers
//! record through the [`MetricsRecorder`] port.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Gauge, Meter};
use opentelemetry::KeyValue;

#[cfg(test)]
use mockall::automock;

static METER: Lazy<Meter> = Lazy::new(|| global::meter("spin-operator"));

/// Info gauge, always 1, per reconciled SpinApp
///
/// Labels:
/// - `name`, `namespace`: the SpinApp
/// - `executor`: executor name
pub static SPINAPP_INFO: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("spin_operator_spinapp_info")
        .with_description("Info metric for SpinApps")
        .build()
});

/// Info gauge, always 1, per reconciled SpinAppExecutor
///
/// Labels:
/// - `name`, `namespace`: the executor
/// - `create_deployment`: "true" or "false"
/// - `runtime_class_name`: runtime class, empty when unset
pub static EXECUTOR_INFO: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("spin_operator_spinapp_executor_info")
        .with_description("Info metric for SpinAppExecutors")
        .build()
});

/// Metrics port used by the controllers
#[cfg_attr(test, automock)]
pub trait MetricsRecorder: Send + Sync {
    /// Record that a SpinApp was reconciled with `executor`
    fn spin_app_info(&self, name: &str, namespace: &str, executor: &str);

    /// Record a reconciled executor
    fn executor_info(
        &self,
        name: &str,
        namespace: &str,
        create_deployment: bool,
        runtime_class_name: &str,
    );
}

/// Recorder writing to the OpenTelemetry gauges
pub struct OtelMetricsRecorder;

impl MetricsRecorder for OtelMetricsRecorder {
    fn spin_app_info(&self, name: &str, namespace: &str, executor: &str) {
        SPINAPP_INFO.record(
            1,
            &[
                KeyValue::new("name", name.to_string()),
                KeyValue::new("namespace", namespace.to_string()),
                KeyValue::new("executor", executor.to_string()),
            ],
        );
    }

    fn executor_info(
        &self,
        name: &str,
        namespace: &str,
        create_deployment: bool,
        runtime_class_name: &str,
    ) {
        EXECUTOR_INFO.record(
            1,
            &[
                KeyValue::new("name", name.to_string()),
                KeyValue::new("namespace", namespace.to_string()),
                KeyValue::new("create_deployment", create_deployment.to_string()),
                KeyValue::new("runtime_class_name", runtime_class_name.to_string()),
            ],
        );
    }
}

/// Recorder that records nothing
pub struct NoopMetricsRecorder;

impl MetricsRecorder for NoopMetricsRecorder {
    fn spin_app_info(&self, _name: &str, _namespace: &str, _executor: &str) {}

    fn executor_info(&self, _: &str, _: &str, _: bool, _: &str) {}
}
