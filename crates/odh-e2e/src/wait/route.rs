//! OpenShift route waits.

use std::time::Duration;

use kube::api::{DynamicObject, Patch, PatchParams};
use kube::{Client, ResourceExt};
use odh_common::kube_utils::{dynamic_api, HasApiResource};
use odh_common::resources::Route;
use odh_common::timeouts::TIMEOUT_30SEC;
use odh_common::{Error, ROUTE_TIMEOUT_ANNOTATION};
use serde_json::{json, Value};
use tracing::info;

use crate::sampler::TimeoutSampler;

/// Samples with the expected annotation needed before the router is assumed
/// to have picked it up
const ROUTE_TIMEOUT_CONFIRMATIONS: u32 = 2;

/// Counts samples that carry the expected timeout annotation.
///
/// Matches need not be consecutive: a sample without the annotation is
/// skipped, not a reason to start over.
#[derive(Debug)]
pub struct TimeoutConfirmations<'a> {
    expected: &'a str,
    seen: u32,
}

impl<'a> TimeoutConfirmations<'a> {
    pub fn new(expected: &'a str) -> Self {
        Self { expected, seen: 0 }
    }

    /// Record one sample; true once enough matches were seen
    pub fn observe(&mut self, route: &DynamicObject) -> bool {
        if route_timeout(route) == Some(self.expected) {
            self.seen += 1;
        }
        self.seen >= ROUTE_TIMEOUT_CONFIRMATIONS
    }
}

/// HAProxy timeout annotation of a route
pub fn route_timeout(route: &DynamicObject) -> Option<&str> {
    route
        .annotations()
        .get(ROUTE_TIMEOUT_ANNOTATION)
        .map(String::as_str)
}

/// Wait for a route to carry the HAProxy timeout annotation `route_timeout`.
///
/// The router applies the annotation some time after it is written, so the
/// value has to be seen on two samples (one poll interval apart).
pub async fn wait_for_route_timeout(
    client: &Client,
    namespace: &str,
    name: &str,
    expected_timeout: &str,
) -> Result<(), Error> {
    let api = dynamic_api(client, &Route::api_resource(), namespace);
    let api = &api;
    let mut confirmations = TimeoutConfirmations::new(expected_timeout);

    TimeoutSampler::new(
        format!("route {namespace}/{name} timeout annotation {expected_timeout}"),
        TIMEOUT_30SEC,
        Duration::from_secs(10),
    )
    .retry_not_found()
    .wait_until(
        || async move { Ok(api.get(name).await?) },
        |route| confirmations.observe(route),
    )
    .await?;

    info!(route = %name, timeout = %expected_timeout, "route timeout applied");
    Ok(())
}

/// Merge patch setting the HAProxy timeout annotation
pub fn route_timeout_patch(timeout: &str) -> Value {
    json!({"metadata": {"annotations": {ROUTE_TIMEOUT_ANNOTATION: timeout}}})
}

/// Set the HAProxy timeout of a route an operator creates, then wait for it
/// to be picked up.
///
/// The route may not exist yet when this is called.
pub async fn annotate_route_timeout(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: &str,
) -> Result<(), Error> {
    let api = dynamic_api(client, &Route::api_resource(), namespace);
    let api = &api;
    TimeoutSampler::new(
        format!("route {namespace}/{name} to exist"),
        TIMEOUT_30SEC,
        Duration::from_secs(2),
    )
    .retry_not_found()
    .wait_until(|| async move { Ok(api.get(name).await?) }, |_| true)
    .await?;

    api.patch(name, &PatchParams::default(), &Patch::Merge(route_timeout_patch(timeout)))
        .await?;
    wait_for_route_timeout(client, namespace, name, timeout).await
}

/// `spec.host` of a route
pub fn route_host(route: &DynamicObject) -> Option<&str> {
    route.data.pointer("/spec/host").and_then(|v| v.as_str())
}
