//! Replica-readiness waits for predictor deployments.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use odh_common::labels::{isvc_label_selector, with_extra_labels, SelectorTarget};
use odh_common::resources::{DeploymentMode, IsvcView};
use odh_common::timeouts::{TIMEOUT_2MIN, TIMEOUT_5MIN};
use odh_common::Error;
use tracing::{error, info};

use crate::sampler::{TimeoutSampler, TimeoutWatch};

const DEPLOYMENT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Options for [`wait_for_inference_deployment_replicas`]
#[derive(Debug, Clone)]
pub struct InferenceDeploymentWait<'a> {
    /// ServingRuntime name, required for ModelMesh
    pub runtime_name: Option<&'a str>,
    /// Number of predictor deployments expected
    pub expected_num_deployments: usize,
    /// Extra comma-separated `key=value` selector terms
    pub labels: Option<&'a str>,
    /// Wait for replicas up (true) or scaled away (false)
    pub deployed: bool,
    /// Overall budget for listing and every replica wait
    pub timeout: Duration,
}

impl Default for InferenceDeploymentWait<'_> {
    fn default() -> Self {
        Self {
            runtime_name: None,
            expected_num_deployments: 1,
            labels: None,
            deployed: true,
            timeout: TIMEOUT_5MIN,
        }
    }
}

/// `(spec, updated, available, ready)` replica counts, missing values as 0
pub fn replica_counts(deployment: &Deployment) -> (i32, i32, i32, i32) {
    let spec = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);
    let status = deployment.status.as_ref();
    (
        spec,
        status.and_then(|s| s.updated_replicas).unwrap_or(0),
        status.and_then(|s| s.available_replicas).unwrap_or(0),
        status.and_then(|s| s.ready_replicas).unwrap_or(0),
    )
}

/// Deployed: every desired replica is updated, available and ready (and at
/// least one is desired). Undeployed: nothing desired and nothing available.
pub fn replicas_settled(deployment: &Deployment, deployed: bool) -> bool {
    let (spec, updated, available, ready) = replica_counts(deployment);
    if deployed {
        spec > 0 && spec == updated && spec == available && spec == ready
    } else {
        spec == 0 && available == 0
    }
}

/// Wait for `spec.replicas` to reach `replicas` (set by the HPA for raw
/// deployments with `minReplicas > 1`).
pub async fn wait_for_replicas_in_deployment(
    api: &Api<Deployment>,
    name: &str,
    replicas: i32,
    timeout: Option<Duration>,
) -> Result<(), Error> {
    let mut current: Option<i32> = None;
    let result = TimeoutSampler::new(
        format!("deployment {name} spec.replicas == {replicas}"),
        timeout.unwrap_or(TIMEOUT_2MIN),
        DEPLOYMENT_POLL_INTERVAL,
    )
    .wait_until(
        || async move { Ok(api.get(name).await?) },
        |d| {
            current = d.spec.as_ref().and_then(|s| s.replicas);
            current == Some(replicas)
        },
    )
    .await;

    if let Err(e) = &result {
        error!(deployment = %name, current = ?current, expected = replicas, error = %e, "spec.replicas not updated");
    }
    result.map(|_| ())
}

/// Wait until a deployment's replicas are fully rolled out (`deployed`) or
/// gone (`!deployed`).
pub async fn wait_for_deployment_replicas(
    api: &Api<Deployment>,
    name: &str,
    deployed: bool,
    timeout: Duration,
) -> Result<Deployment, Error> {
    let state = if deployed { "deployed" } else { "scaled down" };
    TimeoutSampler::new(
        format!("deployment {name} replicas {state}"),
        timeout,
        DEPLOYMENT_POLL_INTERVAL,
    )
    .wait_until(
        || async move { Ok(api.get(name).await?) },
        |d| replicas_settled(d, deployed),
    )
    .await
}

/// A listing timeout becomes `UnexpectedResourceCount` when every list call
/// worked and only the count was wrong; other errors pass through.
fn count_mismatch(err: Error, namespace: &str, expected: usize, found: usize) -> Error {
    match err {
        Error::Timeout {
            last_error: None, ..
        } => Error::UnexpectedResourceCount {
            kind: "Deployment".to_string(),
            namespace: namespace.to_string(),
            expected,
            found,
        },
        other => other,
    }
}

/// A listed deployment that is gone by the time it is fetched is `ResourceNotFound`
fn still_present(
    current: Option<Deployment>,
    name: &str,
    namespace: &str,
) -> Result<Deployment, Error> {
    current.ok_or_else(|| Error::not_found("Deployment", name, namespace))
}

/// Wait for the predictor deployments of an InferenceService.
///
/// One budget covers the whole sequence: find exactly
/// `expected_num_deployments` deployments, then (raw deployments) wait for the
/// HPA to apply `minReplicas`, then wait for replicas to settle.
///
/// # Errors
/// `UnexpectedResourceCount` when listing worked but the count never matched;
/// `Timeout` when listing itself kept failing; `ResourceNotFound` when a
/// deployment disappears mid-wait.
pub async fn wait_for_inference_deployment_replicas(
    client: &Client,
    isvc: &IsvcView,
    opts: InferenceDeploymentWait<'_>,
) -> Result<Vec<Deployment>, Error> {
    let watch = TimeoutWatch::new(opts.timeout);
    let selector = with_extra_labels(
        isvc_label_selector(
            &isvc.name,
            isvc.deployment_mode,
            SelectorTarget::Deployment,
            opts.runtime_name,
        )?,
        opts.labels,
    );
    let api: Api<Deployment> = Api::namespaced(client.clone(), &isvc.namespace);
    let lp = ListParams::default().labels(&selector);
    let (list_api, lp) = (&api, &lp);

    let mut found = 0usize;
    let deployments = TimeoutSampler::new(
        format!(
            "{} predictor deployments matching {selector}",
            opts.expected_num_deployments
        ),
        watch.remaining_time(),
        DEPLOYMENT_POLL_INTERVAL,
    )
    .wait_until(
        || async move { Ok(list_api.list(lp).await?.items) },
        |items| {
            found = items.len();
            found == opts.expected_num_deployments
        },
    )
    .await
    .map_err(|e| count_mismatch(e, &isvc.namespace, opts.expected_num_deployments, found))?;

    info!(isvc = %isvc.name, count = deployments.len(), "waiting for inference deployment replicas");
    let mut settled = Vec::with_capacity(deployments.len());
    for deployment in &deployments {
        let name = deployment.name_any();
        still_present(api.get_opt(&name).await?, &name, &isvc.namespace)?;

        if isvc.deployment_mode == DeploymentMode::RawDeployment {
            wait_for_replicas_in_deployment(
                &api,
                &name,
                isvc.min_replicas,
                Some(watch.remaining_time()),
            )
            .await?;
        }

        settled.push(
            wait_for_deployment_replicas(&api, &name, opts.deployed, watch.remaining_time())
                .await?,
        );
    }
    Ok(settled)
}
