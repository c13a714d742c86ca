//! Custom Resource Definitions for the Spin operator
//!
//! - [`SpinApp`] declares an application
//! - [`SpinAppExecutor`] declares how applications are executed

mod executor;
mod spin_app;
mod types;

pub use executor::{
    ExecutorDeploymentConfig, OtelConfig, SpinAppExecutor, SpinAppExecutorSpec,
    SpinAppExecutorStatus,
};
pub use spin_app::{
    HealthChecks, HealthProbe, HttpHealthProbe, HttpHealthProbeHeader, LlmComputeBinding,
    Resources, RuntimeBinding, RuntimeConfig, RuntimeConfigOption, RuntimeConfigVarSource,
    SpinApp, SpinAppSpec, SpinAppStatus, SpinVar,
};
pub use types::{find_condition, set_condition, Condition, ConditionStatus};

/// API group of both CRDs
pub const API_GROUP: &str = "core.spinoperator.dev";
