//! Platform resource kinds and read-only views over them.
//!
//! The CRDs are owned by external operators (KServe, model registry, TrustyAI,
//! the ODH operator) and evolve independently, so objects stay as
//! `DynamicObject` and only the handful of fields the waits look at are
//! projected into typed views.

use std::fmt;
use std::str::FromStr;

use kube::api::DynamicObject;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use crate::kube_utils::{dynamic_has_condition, HasApiResource, CONDITION_READY, STATUS_TRUE};
use crate::{Error, DEPLOYMENT_MODE_ANNOTATION};

macro_rules! platform_kind {
    ($(#[$doc:meta])* $name:ident, $api_version:literal, $kind:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl HasApiResource for $name {
            const API_VERSION: &'static str = $api_version;
            const KIND: &'static str = $kind;
        }
    };
}

platform_kind!(
    /// KServe InferenceService
    InferenceService, "serving.kserve.io/v1beta1", "InferenceService"
);
platform_kind!(
    /// KServe ServingRuntime
    ServingRuntime, "serving.kserve.io/v1alpha1", "ServingRuntime"
);
platform_kind!(
    /// KServe InferenceGraph
    InferenceGraph, "serving.kserve.io/v1alpha1", "InferenceGraph"
);
platform_kind!(
    /// Model registry instance
    ModelRegistry, "modelregistry.opendatahub.io/v1beta1", "ModelRegistry"
);
platform_kind!(
    /// Model registry instance through the older API version the operator still serves
    ModelRegistryV1Alpha1, "modelregistry.opendatahub.io/v1alpha1", "ModelRegistry"
);
platform_kind!(
    /// TrustyAI guardrails orchestrator
    GuardrailsOrchestrator, "trustyai.opendatahub.io/v1alpha1", "GuardrailsOrchestrator"
);
platform_kind!(
    /// TrustyAI LM evaluation job
    LMEvalJob, "trustyai.opendatahub.io/v1alpha1", "LMEvalJob"
);
platform_kind!(
    /// Kubeflow notebook (workbench)
    Notebook, "kubeflow.org/v1", "Notebook"
);
platform_kind!(
    /// ODH operator component configuration
    DataScienceCluster, "datasciencecluster.opendatahub.io/v1", "DataScienceCluster"
);
platform_kind!(
    /// ODH operator platform initialisation
    DSCInitialization, "dscinitialization.opendatahub.io/v1", "DSCInitialization"
);
platform_kind!(
    /// KEDA ScaledObject
    ScaledObject, "keda.sh/v1alpha1", "ScaledObject"
);
platform_kind!(
    /// OpenShift Route
    Route, "route.openshift.io/v1", "Route"
);
platform_kind!(
    /// OpenShift cluster infrastructure description
    Infrastructure, "config.openshift.io/v1", "Infrastructure"
);

/// How KServe deploys an InferenceService
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeploymentMode {
    /// Knative service with revisions (supports canary rollouts)
    #[default]
    Serverless,
    /// Plain Deployment + Service
    RawDeployment,
    /// Shared ModelMesh runtime pods
    ModelMesh,
}

impl DeploymentMode {
    /// Annotation value for this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Serverless => "Serverless",
            DeploymentMode::RawDeployment => "RawDeployment",
            DeploymentMode::ModelMesh => "ModelMesh",
        }
    }

    /// Mode declared on an object's annotations, `None` when absent
    pub fn annotated(obj: &DynamicObject) -> Result<Option<Self>, Error> {
        obj.annotations()
            .get(DEPLOYMENT_MODE_ANNOTATION)
            .map(|v| v.parse())
            .transpose()
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Serverless" => Ok(DeploymentMode::Serverless),
            "RawDeployment" => Ok(DeploymentMode::RawDeployment),
            "ModelMesh" => Ok(DeploymentMode::ModelMesh),
            other => Err(Error::validation_for_field(
                DEPLOYMENT_MODE_ANNOTATION,
                format!("unknown deployment mode {other:?}"),
            )),
        }
    }
}

/// One entry of `status.components.predictor.traffic`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficTarget {
    /// Knative revision receiving this share
    #[serde(default)]
    pub revision_name: Option<String>,
    /// Whether this entry tracks the latest ready revision
    #[serde(default)]
    pub latest_revision: Option<bool>,
    /// Share of traffic in percent
    #[serde(default)]
    pub percent: Option<i64>,
    /// Traffic tag (e.g. "prev")
    #[serde(default)]
    pub tag: Option<String>,
}

/// Read-only projection of an InferenceService
#[derive(Debug, Clone, PartialEq)]
pub struct IsvcView {
    /// Object name
    pub name: String,
    /// Object namespace
    pub namespace: String,
    /// Effective deployment mode (Serverless when not annotated)
    pub deployment_mode: DeploymentMode,
    /// Mode as written on the annotation, if any
    pub annotated_mode: Option<DeploymentMode>,
    /// `spec.predictor.minReplicas`, 1 when unset
    pub min_replicas: i32,
    /// `spec.predictor.canaryTrafficPercent`, if set
    pub canary_traffic_percent: Option<i64>,
    /// Predictor traffic split
    pub traffic: Vec<TrafficTarget>,
    /// `status.url`
    pub url: Option<String>,
    /// Ready condition is True
    pub ready: bool,
}

impl IsvcView {
    /// Project the fields the waits need out of a dynamic object
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self, Error> {
        let name = obj.metadata.name.clone().ok_or_else(|| {
            Error::validation_for_field("metadata.name", "InferenceService has no name")
        })?;
        let namespace = obj.metadata.namespace.clone().ok_or_else(|| {
            Error::validation_for_field("metadata.namespace", format!("{name} has no namespace"))
        })?;

        let min_replicas = match obj.data.pointer("/spec/predictor/minReplicas") {
            Some(v) => v
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(|| {
                    Error::validation_for_field(
                        "spec.predictor.minReplicas",
                        format!("{name}: expected an integer, got {v}"),
                    )
                })?,
            None => 1,
        };

        let traffic = match obj.data.pointer("/status/components/predictor/traffic") {
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                Error::serialization_for_kind(InferenceService::KIND, e.to_string())
            })?,
            None => Vec::new(),
        };

        let annotated_mode = DeploymentMode::annotated(obj)?;
        Ok(Self {
            deployment_mode: annotated_mode.unwrap_or_default(),
            annotated_mode,
            min_replicas,
            canary_traffic_percent: obj
                .data
                .pointer("/spec/predictor/canaryTrafficPercent")
                .and_then(|v| v.as_i64()),
            traffic,
            url: obj
                .data
                .pointer("/status/url")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            ready: dynamic_has_condition(obj, CONDITION_READY, STATUS_TRUE),
            name,
            namespace,
        })
    }
}
