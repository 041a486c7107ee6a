//! Seams between the waits and whatever talks to a deployed endpoint.
//!
//! Canary and RBAC waits only need a yes/no answer per request; building the
//! request is the caller's business. The HTTP implementations live in
//! [`crate::http`].

use odh_common::Error;

/// One inference request against the model under test
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait InferenceEndpoint: Send + Sync {
    /// Send one request. `Ok` means the expected model answered.
    async fn infer(&self) -> Result<(), Error>;
}

/// Outcome of an authorization check against a protected endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessOutcome {
    /// 2xx
    Allowed,
    /// 401 or 403, with the status
    Forbidden(u16),
    /// Anything else: endpoint not ready, proxy errors, connection failures
    Unavailable(String),
}

/// One authorization check as a given user
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AccessEndpoint: Send + Sync {
    /// Perform the check
    async fn check(&self) -> AccessOutcome;
}
