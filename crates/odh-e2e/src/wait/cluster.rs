//! Platform-level readiness: nodes, the ODH operator's DSCI/DSC, and generic
//! condition waits on CRDs.

use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DynamicObject, ListParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use odh_common::kube_utils::{
    dynamic_api, dynamic_api_cluster, dynamic_condition_status, has_condition, is_not_found,
    HasApiResource, CONDITION_READY, STATUS_TRUE,
};
use odh_common::resources::{DSCInitialization, DataScienceCluster, Infrastructure};
use odh_common::timeouts::TIMEOUT_2MIN;
use odh_common::Error;
use tracing::{info, warn};

use crate::sampler::TimeoutSampler;

/// Phase the ODH operator reports once a DSC/DSCI reconciled
pub const PHASE_READY: &str = "Ready";

/// DSC condition reporting the model registry component
pub const MODEL_REGISTRY_READY_CONDITION: &str = "ModelRegistryReady";

const CLUSTER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// `status.phase` of a dynamic object
pub fn status_phase(obj: &DynamicObject) -> Option<&str> {
    obj.data.pointer("/status/phase").and_then(|v| v.as_str())
}

/// Wait until a namespaced CRD instance reports `condition == status`
pub async fn wait_for_resource_condition(
    client: &Client,
    ar: &ApiResource,
    namespace: &str,
    name: &str,
    condition: &str,
    status: &str,
    timeout: Duration,
) -> Result<DynamicObject, Error> {
    let api = dynamic_api(client, ar, namespace);
    let api = &api;
    TimeoutSampler::new(
        format!("{} {namespace}/{name} condition {condition}={status}", ar.kind),
        timeout,
        CLUSTER_POLL_INTERVAL,
    )
    .retry_not_found()
    .wait_until(
        || async move { Ok(api.get(name).await?) },
        |obj| dynamic_condition_status(obj, condition) == Some(status),
    )
    .await
}

async fn wait_for_phase_ready(api: &Api<DynamicObject>, kind: &str, name: &str) -> Result<(), Error> {
    info!(kind, name, "waiting for phase Ready");
    let mut last_phase: Option<String> = None;
    let result = TimeoutSampler::new(
        format!("{kind} {name} phase {PHASE_READY}"),
        TIMEOUT_2MIN,
        CLUSTER_POLL_INTERVAL,
    )
    .wait_until(
        || async move { Ok(api.get(name).await?) },
        |obj| {
            last_phase = status_phase(obj).map(str::to_string);
            last_phase.as_deref() == Some(PHASE_READY)
        },
    )
    .await;

    if result.is_err() {
        warn!(kind, name, phase = ?last_phase, "not ready");
    }
    result.map(|_| ())
}

/// Wait up to 2 minutes for the DSCInitialization to be Ready
pub async fn wait_for_dsci_ready(client: &Client, dsci_name: &str) -> Result<(), Error> {
    let api = dynamic_api_cluster(client, &DSCInitialization::api_resource());
    wait_for_phase_ready(&api, DSCInitialization::KIND, dsci_name).await
}

/// Wait up to 2 minutes for the DataScienceCluster to be Ready
pub async fn wait_for_dsc_ready(client: &Client, dsc_name: &str) -> Result<(), Error> {
    let api = dynamic_api_cluster(client, &DataScienceCluster::api_resource());
    wait_for_phase_ready(&api, DataScienceCluster::KIND, dsc_name).await
}

/// Namespace the operator deploys platform components into
pub async fn get_dsci_applications_namespace(client: &Client, dsci_name: &str) -> Result<String, Error> {
    let api = dynamic_api_cluster(client, &DSCInitialization::api_resource());
    let dsci = api
        .get_opt(dsci_name)
        .await?
        .ok_or_else(|| Error::not_found_cluster(DSCInitialization::KIND, dsci_name))?;
    dsci.data
        .pointer("/spec/applicationsNamespace")
        .and_then(|v| v.as_str())
        .filter(|ns| !ns.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::validation_for_field(
                "spec.applicationsNamespace",
                format!("DSCI {dsci_name} has no applications namespace"),
            )
        })
}

/// Operator distribution name (e.g. "Open Data Hub") from `status.release.name`
pub async fn get_operator_distribution(client: &Client, dsc_name: &str) -> Result<String, Error> {
    let api = dynamic_api_cluster(client, &DataScienceCluster::api_resource());
    let dsc = api.get(dsc_name).await?;
    dsc.data
        .pointer("/status/release/name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::validation_for_field(
                "status.release.name",
                format!("DSC {dsc_name} has no release name"),
            )
        })
}

/// `upstream` for an Open Data Hub operator, `downstream` for its product builds
pub fn distribution_from_release(release_name: &str) -> &'static str {
    if release_name == "Open Data Hub" {
        "upstream"
    } else {
        "downstream"
    }
}

/// Check the DSC reports the `condition_type` component condition as True
pub fn verify_component_condition(dsc: &DynamicObject, condition_type: &str) -> Result<(), Error> {
    match dynamic_condition_status(dsc, condition_type) {
        Some(STATUS_TRUE) => Ok(()),
        Some(status) => Err(Error::validation(format!(
            "DSC {} condition {condition_type} is {status}",
            dsc.name_any()
        ))),
        None => Err(Error::validation(format!(
            "DSC {} has no {condition_type} condition",
            dsc.name_any()
        ))),
    }
}

/// Nodes that are not Ready or are cordoned, formatted as `name (reason)`
pub fn unhealthy_nodes(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|node| {
            let ready = has_condition(
                node.status.as_ref().and_then(|s| s.conditions.as_deref()),
                CONDITION_READY,
            );
            let unschedulable = node
                .spec
                .as_ref()
                .and_then(|s| s.unschedulable)
                .unwrap_or(false);
            match (ready, unschedulable) {
                (false, _) => Some(format!("{} (not ready)", node.name_any())),
                (true, true) => Some(format!("{} (unschedulable)", node.name_any())),
                (true, false) => None,
            }
        })
        .collect()
}

/// Check the cluster can run the suite at all: healthy schedulable nodes,
/// then DSCI and DSC Ready.
///
/// Passing `None` for the DSCI/DSC skips the operator checks.
pub async fn verify_cluster_sanity(
    client: &Client,
    dsci_name: Option<&str>,
    dsc_name: Option<&str>,
) -> Result<(), Error> {
    info!("checking cluster sanity");
    let nodes: Api<Node> = Api::all(client.clone());
    let nodes = nodes.list(&ListParams::default()).await?.items;
    let unhealthy = unhealthy_nodes(&nodes);
    if !unhealthy.is_empty() {
        return Err(Error::validation(format!(
            "cluster sanity check failed, unhealthy nodes: {}",
            unhealthy.join(", ")
        )));
    }

    if let Some(dsci) = dsci_name {
        wait_for_dsci_ready(client, dsci).await?;
    }
    if let Some(dsc) = dsc_name {
        wait_for_dsc_ready(client, dsc).await?;
    }
    Ok(())
}

/// Whether the `cluster` Infrastructure is tagged `red-hat-managed=true`.
///
/// Only the first platform entry with resource tags is consulted.
pub fn is_managed_infrastructure(infra: &DynamicObject) -> bool {
    let Some(platforms) = infra
        .data
        .pointer("/status/platformStatus")
        .and_then(|v| v.as_object())
    else {
        return false;
    };

    let Some(tags) = platforms
        .values()
        .filter_map(|entry| entry.get("resourceTags").and_then(|t| t.as_array()))
        .find(|tags| !tags.is_empty())
    else {
        return false;
    };
    info!(?tags, "infrastructure resource tags");
    tags.iter().any(|tag| {
        tag.get("key").and_then(|k| k.as_str()) == Some("red-hat-managed")
            && tag.get("value").and_then(|v| v.as_str()) == Some("true")
    })
}

/// Whether this is a managed OpenShift cluster
pub async fn is_managed_cluster(client: &Client) -> Result<bool, Error> {
    let api = dynamic_api_cluster(client, &Infrastructure::api_resource());
    match api.get("cluster").await {
        Ok(infra) => Ok(is_managed_infrastructure(&infra)),
        Err(e) if is_not_found(&e) => {
            warn!("Infrastructure cluster resource does not exist");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
