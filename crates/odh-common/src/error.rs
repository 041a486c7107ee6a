//! Error types for the ODH e2e suite
//!
//! Errors carry the resource coordinates (kind, name, namespace) that a failing
//! wait was looking at, so a red test run points straight at the object that
//! never converged.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for suite operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A polling helper ran out of time
    #[error(
        "timed out after {timeout:?} waiting for {description}{}",
        fmt_last_error(.last_error)
    )]
    Timeout {
        /// What was being waited for
        description: String,
        /// The budget that expired
        timeout: Duration,
        /// Text of the last retryable error, if the last sample failed
        last_error: Option<String>,
    },

    /// A lookup returned nothing
    #[error("{kind} {name} not found{}", fmt_namespace(.namespace))]
    ResourceNotFound {
        /// Resource kind (e.g., "Pod", "ScaledObject")
        kind: String,
        /// Resource name or label selector used for the lookup
        name: String,
        /// Namespace searched, if namespaced
        namespace: Option<String>,
    },

    /// A list returned a different number of objects than expected
    #[error("expected {expected} {kind} in {namespace}, found {found}")]
    UnexpectedResourceCount {
        /// Resource kind being counted
        kind: String,
        /// Namespace listed
        namespace: String,
        /// Expected object count
        expected: usize,
        /// Observed object count
        found: usize,
    },

    /// Pods entered a terminal failure state
    #[error("failed pods: {}", .pods.join(", "))]
    FailedPods {
        /// Failed pods formatted as `name (reason)`
        pods: Vec<String>,
    },

    /// Canary traffic split did not match the configured percentage
    #[error(
        "canary traffic mismatch: expected {expected}%, observed {actual:.1}% ({successes}/{iterations} requests)"
    )]
    CanaryTraffic {
        /// Configured canary percentage
        expected: u32,
        /// Observed percentage
        actual: f64,
        /// Requests answered by the canary
        successes: u32,
        /// Requests sent
        iterations: u32,
    },

    /// HTTP call against a deployed endpoint failed
    #[error("http error [{url}]: {message}")]
    Http {
        /// Request URL
        url: String,
        /// Description of what failed
        message: String,
        /// Response status, when a response was received
        status: Option<u16>,
    },

    /// Input or observed state failed validation
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// Field path, when the failure is about a single field
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "port_forward")
        context: String,
    },
}

fn fmt_last_error(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(" (last error: {e})"))
        .unwrap_or_default()
}

fn fmt_namespace(namespace: &Option<String>) -> String {
    namespace
        .as_ref()
        .map(|ns| format!(" in namespace {ns}"))
        .unwrap_or_default()
}

impl Error {
    /// Create a timeout error
    pub fn timeout(
        description: impl Into<String>,
        timeout: Duration,
        last_error: Option<String>,
    ) -> Self {
        Self::Timeout {
            description: description.into(),
            timeout,
            last_error,
        }
    }

    /// Create a not-found error for a namespaced resource
    pub fn not_found(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self::ResourceNotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Create a not-found error for a cluster-scoped resource
    pub fn not_found_cluster(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    /// Create an HTTP error without a response status
    pub fn http(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            message: msg.into(),
            status: None,
        }
    }

    /// Create an HTTP error for an unexpected response status
    pub fn http_status(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            message: format!("status {status}: {}", body.into()),
            status: Some(status),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True for API 404s and empty lookups.
    ///
    /// Several waits treat "not there (yet)" as a reason to keep polling, and
    /// deletion waits treat it as success.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube { source } => crate::kube_utils::is_not_found(source),
            Error::ResourceNotFound { .. } => true,
            _ => false,
        }
    }

    /// True for API conflicts (409), e.g. creating an object that already exists
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            Error::Http { status, .. } => *status,
            _ => None,
        }
    }
}
