//! Label selectors for the objects KServe creates on behalf of an
//! InferenceService or InferenceGraph.
//!
//! Serverless and RawDeployment label everything with the owning ISVC name.
//! ModelMesh shares one deployment per ServingRuntime across all ISVCs, so
//! pods and deployments are found through the runtime name instead.

use crate::resources::DeploymentMode;
use crate::{Error, INFERENCE_GRAPH_LABEL, ISVC_LABEL};

/// Kind of object a selector is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorTarget {
    /// Predictor pods
    Pod,
    /// Predictor deployments
    Deployment,
    /// Predictor services
    Service,
}

/// Label selector for the pods, deployments or services backing an ISVC.
///
/// ModelMesh pods and deployments need the ServingRuntime name; asking without
/// one is a validation error rather than a selector that matches nothing.
pub fn isvc_label_selector(
    isvc_name: &str,
    mode: DeploymentMode,
    target: SelectorTarget,
    runtime_name: Option<&str>,
) -> Result<String, Error> {
    match (mode, target) {
        (DeploymentMode::ModelMesh, SelectorTarget::Service) => {
            Ok("modelmesh-service=modelmesh-serving".to_string())
        }
        (DeploymentMode::ModelMesh, _) => {
            let runtime = runtime_name.ok_or_else(|| {
                Error::validation(format!(
                    "runtime name is required to select ModelMesh {:?} objects of {}",
                    target, isvc_name
                ))
            })?;
            Ok(format!("name=modelmesh-serving-{runtime}"))
        }
        _ => Ok(format!("{ISVC_LABEL}={isvc_name}")),
    }
}

/// Label selector for InferenceGraph router pods
pub fn ig_pod_label_selector(ig_name: &str) -> String {
    format!("{INFERENCE_GRAPH_LABEL}={ig_name}")
}

/// Append a comma-separated `key=value` list to a selector
pub fn with_extra_labels(selector: String, extra: Option<&str>) -> String {
    match extra.map(str::trim) {
        Some(extra) if !extra.is_empty() => format!("{selector},{extra}"),
        _ => selector,
    }
}
