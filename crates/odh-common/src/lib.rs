//! Common types for the ODH e2e suite: errors, retry, kube helpers and the
//! platform resource kinds the waits operate on.

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod labels;
pub mod resources;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Fixed timeouts shared by the waits.
pub mod timeouts {
    use std::time::Duration;

    /// 10 seconds
    pub const TIMEOUT_10SEC: Duration = Duration::from_secs(10);
    /// 30 seconds
    pub const TIMEOUT_30SEC: Duration = Duration::from_secs(30);
    /// 1 minute
    pub const TIMEOUT_1MIN: Duration = Duration::from_secs(60);
    /// 2 minutes
    pub const TIMEOUT_2MIN: Duration = Duration::from_secs(2 * 60);
    /// 4 minutes
    pub const TIMEOUT_4MIN: Duration = Duration::from_secs(4 * 60);
    /// 5 minutes
    pub const TIMEOUT_5MIN: Duration = Duration::from_secs(5 * 60);
    /// 10 minutes
    pub const TIMEOUT_10MIN: Duration = Duration::from_secs(10 * 60);
    /// 15 minutes
    pub const TIMEOUT_15MIN: Duration = Duration::from_secs(15 * 60);
}

/// Annotation KServe sets on InferenceServices and their pods
pub const DEPLOYMENT_MODE_ANNOTATION: &str = "serving.kserve.io/deploymentMode";

/// HAProxy per-route timeout annotation on OpenShift routes
pub const ROUTE_TIMEOUT_ANNOTATION: &str = "haproxy.router.openshift.io/timeout";

/// Label KServe puts on everything it creates for an InferenceService
pub const ISVC_LABEL: &str = "serving.kserve.io/inferenceservice";

/// Label KServe puts on InferenceGraph router pods
pub const INFERENCE_GRAPH_LABEL: &str = "serving.kserve.io/inferencegraph";

/// Pod filter for model registry instances
pub const MODEL_REGISTRY_POD_FILTER: &str = "component=model-registry";

/// Route filter for the model catalog
pub const MODEL_CATALOG_ROUTE_FILTER: &str = "component=model-catalog";

/// Pod filter for the guardrails orchestrator
pub const GUARDRAILS_ORCHESTRATOR_POD_FILTER: &str =
    "app.kubernetes.io/instance=guardrails-orchestrator";

/// Default namespace where the operator deploys platform components
pub const DEFAULT_APPLICATIONS_NAMESPACE: &str = "opendatahub";

/// Default namespace for model registry instances
pub const DEFAULT_MODEL_REGISTRY_NAMESPACE: &str = "odh-model-registries";
