//! KEDA autoscaling for InferenceServices.
//!
//! With `autoscalerClass: keda`, KServe turns `spec.predictor.autoScaling`
//! into a ScaledObject named `<isvc>-predictor` with one Prometheus trigger.

use kube::api::DynamicObject;
use kube::Client;
use odh_common::kube_utils::{dynamic_api, HasApiResource};
use odh_common::resources::ScaledObject;
use odh_common::Error;
use serde::{Deserialize, Serialize};

/// In-cluster Thanos querier fronting user-workload Prometheus
pub const THANOS_QUERIER_ADDRESS: &str = "https://thanos-querier.openshift-monitoring.svc:9092";

/// TriggerAuthentication the serving stack provisions for Prometheus queries
pub const PROMETHEUS_AUTH_NAME: &str = "inference-prometheus-auth";

/// `spec.predictor.autoScaling` of an InferenceService
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoScalingConfig {
    /// Metrics to scale on
    pub metrics: Vec<MetricSpec>,
}

/// One scaling metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Metric source type ("External")
    #[serde(rename = "type")]
    pub type_: String,
    /// External metric definition
    pub external: ExternalMetric,
}

/// Prometheus-backed external metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMetric {
    /// Query definition
    pub metric: MetricSource,
    /// Scaling target
    pub target: MetricTarget,
    /// Credentials used for the query
    pub authentication_ref: AuthenticationRef,
}

/// Where and what to query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSource {
    /// Namespace the query is scoped to
    pub namespace: String,
    /// Metrics backend ("prometheus")
    pub backend: String,
    /// Backend URL
    pub server_address: String,
    /// PromQL query
    pub query: String,
}

/// Target value the autoscaler steers the metric to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTarget {
    /// Target type ("Value")
    #[serde(rename = "type")]
    pub type_: String,
    /// Target value as a quantity string
    pub value: String,
}

/// Authentication for the metric backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationRef {
    /// Auth mode ("bearer")
    pub auth_modes: String,
    /// TriggerAuthentication reference
    pub authentication_ref: NamedRef,
}

/// Reference by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    /// Object name
    pub name: String,
}

/// Autoscaling config scaling on a Prometheus query through Thanos
pub fn keda_autoscaling_config(query: &str, target_value: &str, namespace: &str) -> AutoScalingConfig {
    AutoScalingConfig {
        metrics: vec![MetricSpec {
            type_: "External".to_string(),
            external: ExternalMetric {
                metric: MetricSource {
                    namespace: namespace.to_string(),
                    backend: "prometheus".to_string(),
                    server_address: THANOS_QUERIER_ADDRESS.to_string(),
                    query: query.to_string(),
                },
                target: MetricTarget {
                    type_: "Value".to_string(),
                    value: target_value.to_string(),
                },
                authentication_ref: AuthenticationRef {
                    auth_modes: "bearer".to_string(),
                    authentication_ref: NamedRef {
                        name: PROMETHEUS_AUTH_NAME.to_string(),
                    },
                },
            },
        }],
    }
}

/// The ScaledObject KServe created for an InferenceService
pub async fn get_isvc_keda_scaledobject(
    client: &Client,
    namespace: &str,
    isvc_name: &str,
) -> Result<DynamicObject, Error> {
    let name = format!("{isvc_name}-predictor");
    dynamic_api(client, &ScaledObject::api_resource(), namespace)
        .get_opt(&name)
        .await?
        .ok_or_else(|| Error::not_found(ScaledObject::KIND, name, namespace))
}

/// Check a ScaledObject has a Prometheus trigger with the given query and threshold
pub fn verify_scaledobject_trigger(
    scaled_object: &DynamicObject,
    query: &str,
    threshold: &str,
) -> Result<(), Error> {
    let triggers = scaled_object
        .data
        .pointer("/spec/triggers")
        .and_then(|t| t.as_array())
        .ok_or_else(|| Error::validation_for_field("spec.triggers", "ScaledObject has no triggers"))?;

    let matches = triggers.iter().any(|t| {
        t.get("type").and_then(|v| v.as_str()) == Some("prometheus")
            && t.pointer("/metadata/query").and_then(|v| v.as_str()) == Some(query)
            && t.pointer("/metadata/threshold").and_then(|v| v.as_str()) == Some(threshold)
    });

    if matches {
        Ok(())
    } else {
        Err(Error::validation_for_field(
            "spec.triggers",
            format!("no prometheus trigger with query {query:?} and threshold {threshold}"),
        ))
    }
}
