//! Waits on the pods and services KServe creates for an InferenceService.

use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use odh_common::kube_utils::{has_condition, CONDITION_READY};
use odh_common::labels::{ig_pod_label_selector, isvc_label_selector, SelectorTarget};
use odh_common::resources::{DeploymentMode, IsvcView};
use odh_common::timeouts::{TIMEOUT_1MIN, TIMEOUT_30SEC, TIMEOUT_4MIN, TIMEOUT_5MIN};
use odh_common::{Error, DEPLOYMENT_MODE_ANNOTATION};
use tracing::{error, info};

use crate::sampler::TimeoutSampler;

/// Container waiting reason for an unresolvable image reference
pub const REASON_INVALID_IMAGE_NAME: &str = "InvalidImageName";
/// Container waiting reason (and legacy pod phase) for a restart loop
pub const REASON_CRASH_LOOP_BACK_OFF: &str = "CrashLoopBackOff";
/// Container terminated reason for a non-zero exit
pub const REASON_ERROR: &str = "Error";
/// Pod phase once all containers terminated and one failed
pub const PHASE_FAILED: &str = "Failed";
/// Pod phase while containers run
pub const PHASE_RUNNING: &str = "Running";

// =============================================================================
// Lookups
// =============================================================================

async fn list_by_selector<K>(api: &Api<K>, selector: &str) -> Result<Vec<K>, Error>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    Ok(api
        .list(&ListParams::default().labels(selector))
        .await?
        .items)
}

/// Pods backing an InferenceService; an empty result is `ResourceNotFound`
pub async fn get_pods_by_isvc_label(
    client: &Client,
    isvc: &IsvcView,
    runtime_name: Option<&str>,
) -> Result<Vec<Pod>, Error> {
    let selector = isvc_label_selector(
        &isvc.name,
        isvc.deployment_mode,
        SelectorTarget::Pod,
        runtime_name,
    )?;
    let pods: Api<Pod> = Api::namespaced(client.clone(), &isvc.namespace);
    let items = list_by_selector(&pods, &selector).await?;
    if items.is_empty() {
        return Err(Error::not_found("Pod", selector, &isvc.namespace));
    }
    Ok(items)
}

/// Services backing an InferenceService; an empty result is `ResourceNotFound`
pub async fn get_services_by_isvc_label(
    client: &Client,
    isvc: &IsvcView,
    runtime_name: Option<&str>,
) -> Result<Vec<Service>, Error> {
    let selector = isvc_label_selector(
        &isvc.name,
        isvc.deployment_mode,
        SelectorTarget::Service,
        runtime_name,
    )?;
    let services: Api<Service> = Api::namespaced(client.clone(), &isvc.namespace);
    let items = list_by_selector(&services, &selector).await?;
    if items.is_empty() {
        return Err(Error::not_found("Service", selector, &isvc.namespace));
    }
    Ok(items)
}

/// Router pods of an InferenceGraph; an empty result is `ResourceNotFound`
pub async fn get_pods_by_ig_label(
    client: &Client,
    ig_name: &str,
    namespace: &str,
) -> Result<Vec<Pod>, Error> {
    let selector = ig_pod_label_selector(ig_name);
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let items = list_by_selector(&pods, &selector).await?;
    if items.is_empty() {
        return Err(Error::not_found("Pod", selector, namespace));
    }
    Ok(items)
}

/// Wait up to 30s for an InferenceService to have pods at all
pub async fn wait_for_isvc_pods(
    client: &Client,
    isvc: &IsvcView,
    runtime_name: Option<&str>,
) -> Result<Vec<Pod>, Error> {
    info!(isvc = %isvc.name, "waiting for pods to be created");
    TimeoutSampler::new(
        format!("pods of isvc {}/{}", isvc.namespace, isvc.name),
        TIMEOUT_30SEC,
        Duration::from_secs(1),
    )
    .retry_not_found()
    .wait_until(
        || get_pods_by_isvc_label(client, isvc, runtime_name),
        |_| true,
    )
    .await
}

// =============================================================================
// Pod state evaluation
// =============================================================================

/// Pod has condition Ready=True
pub fn is_pod_ready(pod: &Pod) -> bool {
    has_condition(
        pod.status.as_ref().and_then(|s| s.conditions.as_deref()),
        CONDITION_READY,
    )
}

/// Pod phase, empty when the status is not populated yet
pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or_default()
}

/// Why a pod counts as failed, if it does.
///
/// Containers (init containers included) waiting with `InvalidImageName` or
/// terminated with `Error` fail the pod. `CrashLoopBackOff` fails it only
/// when the service declares a deployment mode other than ModelMesh; an
/// unannotated service may still be pulling images and recover. Pods without
/// container statuses are judged by phase.
pub fn pod_failure_reason(pod: &Pod, mode: Option<DeploymentMode>) -> Option<String> {
    let status = pod.status.as_ref()?;
    let crash_loop_fails = matches!(mode, Some(m) if m != DeploymentMode::ModelMesh);

    let is_wait_failure = |reason: &str| {
        reason == REASON_INVALID_IMAGE_NAME
            || (crash_loop_fails && reason == REASON_CRASH_LOOP_BACK_OFF)
    };
    let is_terminated_failure = |reason: &str| {
        reason == REASON_ERROR || (crash_loop_fails && reason == REASON_CRASH_LOOP_BACK_OFF)
    };

    match status.container_statuses.as_deref() {
        Some(containers) if !containers.is_empty() => {
            let init = status.init_container_statuses.as_deref().unwrap_or_default();
            containers.iter().chain(init).find_map(|cs| {
                let state = cs.state.as_ref()?;
                if let Some(reason) = state.waiting.as_ref().and_then(|w| w.reason.as_deref()) {
                    if is_wait_failure(reason) {
                        return Some(format!("{}: {}", cs.name, reason));
                    }
                }
                if let Some(reason) = state.terminated.as_ref().and_then(|t| t.reason.as_deref()) {
                    if is_terminated_failure(reason) {
                        return Some(format!("{}: {}", cs.name, reason));
                    }
                }
                None
            })
        }
        _ => match status.phase.as_deref() {
            Some(phase @ (PHASE_FAILED | REASON_CRASH_LOOP_BACK_OFF)) => Some(phase.to_string()),
            _ => None,
        },
    }
}

/// Failed pods formatted as `name (reason)`
pub fn find_failed_pods(pods: &[Pod], mode: Option<DeploymentMode>) -> Vec<String> {
    pods.iter()
        .filter_map(|pod| {
            pod_failure_reason(pod, mode).map(|reason| format!("{} ({})", pod.name_any(), reason))
        })
        .collect()
}

/// More than one pod, all Running: the autoscaler reacted to load
pub fn is_scaled_up(pods: &[Pod]) -> bool {
    pods.len() > 1 && pods.iter().all(|p| pod_phase(p) == PHASE_RUNNING)
}

// =============================================================================
// Waits
// =============================================================================

/// Wait for every pod of an InferenceService to be Ready, failing fast when
/// any pod is in a terminal failure state.
pub async fn verify_no_failed_pods(
    client: &Client,
    isvc: &IsvcView,
    runtime_name: Option<&str>,
    timeout: Option<Duration>,
) -> Result<(), Error> {
    wait_for_isvc_pods(client, isvc, runtime_name).await?;

    info!(isvc = %isvc.name, "verifying no failed pods");
    let sampler = TimeoutSampler::new(
        format!("pods of isvc {}/{} to be ready", isvc.namespace, isvc.name),
        timeout.unwrap_or(TIMEOUT_5MIN),
        Duration::from_secs(10),
    )
    .retry_not_found();

    let mut failed = Vec::new();
    sampler
        .wait_until(
            || get_pods_by_isvc_label(client, isvc, runtime_name),
            |pods| {
                if pods.iter().all(is_pod_ready) {
                    return true;
                }
                failed = find_failed_pods(pods, isvc.annotated_mode);
                !failed.is_empty()
            },
        )
        .await?;

    if failed.is_empty() {
        Ok(())
    } else {
        error!(isvc = %isvc.name, pods = ?failed, "pods failed");
        Err(Error::FailedPods { pods: failed })
    }
}

/// Wait until an InferenceService has no pods left (scale to zero, deletion).
///
/// Returns `Ok(false)` when pods are still there after the timeout.
pub async fn verify_no_inference_pods(
    client: &Client,
    isvc: &IsvcView,
    timeout: Option<Duration>,
) -> Result<bool, Error> {
    let selector = isvc_label_selector(
        &isvc.name,
        isvc.deployment_mode,
        SelectorTarget::Pod,
        None,
    )?;
    let api: Api<Pod> = Api::namespaced(client.clone(), &isvc.namespace);
    let mut remaining: Vec<String> = Vec::new();

    let result = TimeoutSampler::new(
        format!("pods of isvc {}/{} to be gone", isvc.namespace, isvc.name),
        timeout.unwrap_or(TIMEOUT_4MIN),
        Duration::from_secs(5),
    )
    .wait_until(
        || list_by_selector(&api, &selector),
        |pods| {
            remaining = pods.iter().map(|p| p.name_any()).collect();
            pods.is_empty()
        },
    )
    .await;

    match result {
        Ok(_) => Ok(true),
        Err(Error::Timeout { .. }) => {
            error!(isvc = %isvc.name, pods = ?remaining, "inference pods were not deleted");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Assert a pod's phase stays within `statuses` for the whole `duration`
pub async fn check_pod_status_in_time(
    client: &Client,
    namespace: &str,
    pod_name: &str,
    statuses: &[&str],
    duration: Option<Duration>,
    wait: Option<Duration>,
) -> Result<(), Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let api = &api;
    let duration = duration.unwrap_or(Duration::from_secs(120));
    info!(pod = %pod_name, ?statuses, ?duration, "checking pod phase is stable");

    TimeoutSampler::new(
        format!("pod {namespace}/{pod_name} phase in {statuses:?}"),
        duration,
        wait.unwrap_or(Duration::from_secs(1)),
    )
    .hold(
        || async move {
            let pod = api.get(pod_name).await?;
            Ok(pod_phase(&pod).to_string())
        },
        |phase| statuses.contains(&phase.as_str()),
    )
    .await
}

/// Wait for every Serverless-mode pod in a namespace to be deleted
pub async fn wait_for_serverless_pods_deletion(
    client: &Client,
    namespace: &str,
) -> Result<(), Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pods = api.list(&ListParams::default()).await?.items;

    for pod in pods.iter().filter(|p| {
        p.annotations().get(DEPLOYMENT_MODE_ANNOTATION).map(String::as_str)
            == Some(DeploymentMode::Serverless.as_str())
    }) {
        let name = pod.name_any();
        let uid = pod.metadata.uid.as_deref();
        info!(pod = %name, "waiting for serverless pod to be deleted");
        let (api, name) = (&api, name.as_str());

        TimeoutSampler::new(
            format!("serverless pod {namespace}/{name} deletion"),
            TIMEOUT_1MIN,
            Duration::from_secs(1),
        )
        .wait_for_true(|| async move {
            // A recreated pod with the same name has a new uid
            Ok(match api.get_opt(name).await? {
                Some(current) => current.metadata.uid.as_deref() != uid,
                None => true,
            })
        })
        .await?;
    }
    Ok(())
}

/// Sample an InferenceService's pods until `accept` is satisfied.
///
/// Used for autoscaling checks: [`is_scaled_up`] while load runs, then an
/// exact count once it stops.
pub async fn wait_for_isvc_pod_count<A>(
    client: &Client,
    isvc: &IsvcView,
    runtime_name: Option<&str>,
    timeout: Duration,
    sleep: Duration,
    description: &str,
    mut accept: A,
) -> Result<Vec<Pod>, Error>
where
    A: FnMut(&[Pod]) -> bool,
{
    TimeoutSampler::new(
        format!("isvc {}/{}: {description}", isvc.namespace, isvc.name),
        timeout,
        sleep,
    )
    .retry_not_found()
    .wait_until(
        || get_pods_by_isvc_label(client, isvc, runtime_name),
        |pods| {
            info!(
                isvc = %isvc.name,
                count = pods.len(),
                phases = ?pods.iter().map(pod_phase).collect::<Vec<_>>(),
                "pod sample"
            );
            accept(pods)
        },
    )
    .await
}
