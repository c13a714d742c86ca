//! Spin Operator - Kubernetes operator for Spin WebAssembly applications
//!
//! A `SpinApp` names an OCI image holding a Spin application and a
//! `SpinAppExecutor` describing how it should run. The operator converges
//! each app into a Deployment, a Service and, when runtime bindings are
//! declared, a Secret holding the rendered Spin runtime config.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (SpinApp, SpinAppExecutor)
//! - [`controller`] - Reconciliation of apps and executors
//! - [`runtime_config`] - Dependency resolution and TOML rendering of runtime config
//! - [`workload`] - Construction of Deployments, Services, volumes, env and probes
//! - [`webhook`] - Defaulting and validating admission webhooks
//! - [`events`] - Kubernetes event publishing
//! - [`metrics`] - OpenTelemetry info gauges
//! - [`telemetry`] - Logging and tracing setup
//! - [`cacerts`] - Default CA bundle for app pods
//! - [`secret`] - Redacting wrapper for resolved secret values
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod cacerts;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod metrics;
pub mod runtime_config;
pub mod secret;
pub mod telemetry;
pub mod webhook;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
