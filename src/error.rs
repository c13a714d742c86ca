//! Error types for the Spin operator
//!
//! Errors are structured with fields to aid debugging in production. Each
//! variant carries enough context (resource names, dependency kinds) to make a
//! log line or Kubernetes Event actionable without a stack trace.

use thiserror::Error;

/// Main error type for Spin operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A referenced object (executor, secret, config map) does not exist
    #[error("{kind} {namespace}/{name} not found")]
    MissingDependency {
        /// Kind of the missing object (e.g., "secret", "configmap", "SpinAppExecutor")
        kind: String,
        /// Namespace the object was looked up in
        namespace: String,
        /// Name of the missing object
        name: String,
    },

    /// The runtime configuration could not be built from the declaration
    #[error("runtime config error: {message}")]
    RuntimeConfig {
        /// Description of what's inconsistent
        message: String,
    },

    /// Constructing a child resource failed
    #[error("failed to construct {kind}: {message}")]
    Construct {
        /// Resource kind being constructed (Deployment, Service, ...)
        kind: String,
        /// Description of what failed
        message: String,
    },

    /// An executor cannot be removed while applications still reference it
    #[error("cannot delete SpinAppExecutor with dependent SpinApps ({count} remaining)")]
    DependentsExist {
        /// Name of the executor being deleted
        executor: String,
        /// Number of SpinApps still referencing it
        count: usize,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A reconciliation pass exceeded its deadline
    #[error("reconciliation timed out after {seconds}s")]
    Timeout {
        /// Deadline that was exceeded
        seconds: u64,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "runtime_config", "webhook")
        context: String,
    },
}

impl Error {
    /// Create a missing dependency error
    pub fn missing(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::MissingDependency {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a runtime config error
    pub fn runtime_config(msg: impl Into<String>) -> Self {
        Self::RuntimeConfig {
            message: msg.into(),
        }
    }

    /// Create a construction error for the given resource kind
    pub fn construct(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Construct {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Construction and runtime config errors need a spec change.
    /// Missing dependencies and dependent apps resolve on their own, so they
    /// are retried. Kubernetes 4xx errors are permanent except conflicts and
    /// throttling.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    !(400..500).contains(&ae.code) || ae.code == 409 || ae.code == 429
                }
                _ => true,
            },
            Error::MissingDependency { .. } => true,
            Error::RuntimeConfig { .. } => false,
            Error::Construct { .. } => false,
            Error::DependentsExist { .. } => true,
            Error::Serialization { .. } => false,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
        }
    }
}

/// Returns true if the error is a Kubernetes 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Returns true if the error is a Kubernetes 409 AlreadyExists/Conflict
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    // ==========================================================================
    // Story Tests: how errors steer the requeue policy
    // ==========================================================================

    /// Story: a missing executor or secret is expected to show up later
    #[test]
    fn story_missing_dependency_is_retried() {
        let err = Error::missing("secret", "default", "redis-creds");
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "secret default/redis-creds not found");
    }

    /// Story: duplicate store names need the user to edit the SpinApp
    #[test]
    fn story_runtime_config_errors_wait_for_spec_change() {
        let err = Error::runtime_config("duplicate definition for key value store with name: a");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("duplicate definition"));
    }

    /// Story: executors with live apps are retried until the apps are gone
    #[test]
    fn story_dependents_exist_is_retried() {
        let err = Error::DependentsExist {
            executor: "containerd-shim-spin".to_string(),
            count: 2,
        };
        assert!(err.is_retryable());
        assert!(err
            .to_string()
            .starts_with("cannot delete SpinAppExecutor with dependent SpinApps"));
    }

    /// Story: server-side apply conflicts and throttling are transient
    #[test]
    fn story_kube_conflicts_are_retried_but_bad_requests_are_not() {
        assert!(Error::from(api_error(409)).is_retryable());
        assert!(Error::from(api_error(429)).is_retryable());
        assert!(Error::from(api_error(500)).is_retryable());
        assert!(!Error::from(api_error(422)).is_retryable());
        assert!(!Error::from(api_error(403)).is_retryable());
    }

    #[test]
    fn construct_errors_wait_for_spec_change() {
        let err = Error::construct(
            "readiness probe",
            "probe exists but with unknown configuration, expected httpGet",
        );
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "failed to construct readiness probe: probe exists but with unknown configuration, expected httpGet"
        );
    }

    #[test]
    fn status_helpers_match_codes() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(409)));
        assert!(is_conflict(&api_error(409)));
    }
}
