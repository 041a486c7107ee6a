//! Canary rollout waits for Serverless InferenceServices.
//!
//! Setting `canaryTrafficPercent` makes Knative split traffic between the
//! previous and the latest revision. The rollout is done once the latest
//! revision carries the requested share; the split is then checked from the
//! outside by counting which model answers.

use std::time::Duration;

use kube::Client;
use odh_common::kube_utils::{dynamic_api, HasApiResource};
use odh_common::resources::{InferenceService, IsvcView, TrafficTarget};
use odh_common::timeouts::TIMEOUT_5MIN;
use odh_common::Error;
use tracing::{error, info, warn};

use crate::endpoint::InferenceEndpoint;
use crate::sampler::TimeoutSampler;

/// True when the latest revision receives exactly `percentage` of traffic
pub fn canary_rolled_out(traffic: &[TrafficTarget], percentage: i64) -> bool {
    traffic
        .iter()
        .any(|t| t.latest_revision == Some(true) && t.percent == Some(percentage))
}

/// Wait until the predictor traffic split shows the canary at `percentage`
pub async fn wait_for_canary_rollout(
    client: &Client,
    namespace: &str,
    isvc_name: &str,
    percentage: i64,
    timeout: Option<Duration>,
) -> Result<IsvcView, Error> {
    let api = dynamic_api(client, &InferenceService::api_resource(), namespace);
    let api = &api;
    let mut last_traffic: Vec<TrafficTarget> = Vec::new();

    let result = TimeoutSampler::new(
        format!("isvc {namespace}/{isvc_name} canary at {percentage}%"),
        timeout.unwrap_or(TIMEOUT_5MIN),
        Duration::from_secs(5),
    )
    .wait_until(
        || async move { IsvcView::from_dynamic(&api.get(isvc_name).await?) },
        |view| {
            last_traffic = view.traffic.clone();
            canary_rolled_out(&view.traffic, percentage)
        },
    )
    .await;

    if result.is_err() {
        error!(
            isvc = %isvc_name,
            percentage,
            traffic = ?last_traffic,
            "canary rollout not applied"
        );
    }
    result
}

/// Observed canary split
#[derive(Debug, Clone, PartialEq)]
pub struct CanaryTrafficReport {
    /// Requests sent
    pub iterations: u32,
    /// Requests answered by the new model
    pub successes: u32,
    /// `successes / iterations * 100`
    pub percentage: f64,
}

/// Judge an observed split against the configured one.
///
/// Zero successes always fails: it means the canary never got traffic, which
/// a generous tolerance must not hide.
pub fn evaluate_canary_traffic(
    iterations: u32,
    successes: u32,
    expected_percentage: u32,
    tolerance: u32,
) -> Result<CanaryTrafficReport, Error> {
    if iterations == 0 {
        return Err(Error::validation("canary traffic check needs at least one iteration"));
    }
    let percentage = f64::from(successes) / f64::from(iterations) * 100.0;
    let diff = (f64::from(expected_percentage) - percentage).abs();

    if successes == 0 || diff > f64::from(tolerance) {
        return Err(Error::CanaryTraffic {
            expected: expected_percentage,
            actual: percentage,
            successes,
            iterations,
        });
    }
    Ok(CanaryTrafficReport {
        iterations,
        successes,
        percentage,
    })
}

/// Send `iterations` requests and check the share answered by the new model.
///
/// Requests are sequential; each failed request is taken as served by the
/// previous revision.
pub async fn verify_canary_traffic<P>(
    endpoint: &P,
    iterations: u32,
    expected_percentage: u32,
    tolerance: u32,
) -> Result<CanaryTrafficReport, Error>
where
    P: InferenceEndpoint + ?Sized,
{
    let mut successes = 0u32;
    for iteration in 1..=iterations {
        match endpoint.infer().await {
            Ok(()) => {
                info!(iteration, "inference answered by new model");
                successes += 1;
            }
            Err(e) => warn!(iteration, error = %e, "inference failed, previous model was used"),
        }
    }
    info!(successes, iterations, "requests served by the new model");
    evaluate_canary_traffic(iterations, successes, expected_percentage, tolerance)
}
