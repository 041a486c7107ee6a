//! Shared setup for the cluster scenarios.
#![cfg(feature = "cluster-e2e")]

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DynamicObject, ListParams, ObjectMeta, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use odh_common::kube_utils::{
    build_api_resource, create_or_get, delete_ignore_not_found, dynamic_api, HasApiResource,
    CONDITION_READY, STATUS_TRUE,
};
use odh_common::resources::{InferenceService, IsvcView, Route};
use odh_common::retry::{retry_with_backoff_if, RetryConfig};
use odh_common::timeouts::TIMEOUT_2MIN;
use odh_e2e::http::{http_client, DEFAULT_HTTP_TIMEOUT};
use odh_e2e::wait::cluster::wait_for_resource_condition;
use odh_e2e::wait::route::route_host;
use odh_e2e::{unique_name, E2eContext, Error, TimeoutSampler};
use tracing::info;

pub mod registry;
pub mod test_harness;

pub use test_harness::*;

pub fn init_e2e_test() {
    odh_common::telemetry::init_tracing();
}

/// Everything a scenario needs to talk to the cluster
pub struct Cluster {
    pub ctx: E2eContext,
    pub client: Client,
    pub http: reqwest::Client,
}

pub async fn connect() -> Result<Cluster, Error> {
    let ctx = E2eContext::from_env();
    let client = ctx.client().await?;
    let http = http_client(DEFAULT_HTTP_TIMEOUT)?;
    Ok(Cluster { ctx, client, http })
}

// =============================================================================
// Namespaces
// =============================================================================

/// A namespace created for one scenario; call [`TestNamespace::delete`] at
/// the end since async cleanup cannot run in `Drop`.
pub struct TestNamespace {
    pub name: String,
}

impl TestNamespace {
    pub async fn create(client: &Client, prefix: &str) -> Result<Self, Error> {
        let name = unique_name(prefix);
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                labels: Some(BTreeMap::from([
                    ("opendatahub.io/dashboard".to_string(), "true".to_string()),
                    ("modelmesh-enabled".to_string(), "false".to_string()),
                ])),
                ..Default::default()
            },
            ..Default::default()
        };
        let api: Api<Namespace> = Api::all(client.clone());
        create_or_get(&api, &ns).await?;
        info!(namespace = %name, "created test namespace");
        Ok(Self { name })
    }

    /// Delete and wait for the namespace to be gone
    pub async fn delete(self, client: &Client) -> Result<(), Error> {
        let api: Api<Namespace> = Api::all(client.clone());
        if !delete_ignore_not_found(&api, &self.name).await? {
            return Ok(());
        }
        let (api, name) = (&api, self.name.as_str());
        TimeoutSampler::new(
            format!("namespace {name} deleted"),
            TIMEOUT_2MIN,
            Duration::from_secs(5),
        )
        .wait_for_true(|| async move { Ok(api.get_opt(name).await?.is_none()) })
        .await
    }
}

// =============================================================================
// Manifests
// =============================================================================

/// Create a namespaced object from YAML (no-op if it already exists)
pub async fn apply_manifest(client: &Client, namespace: &str, yaml: &str) -> Result<DynamicObject, Error> {
    let value: serde_json::Value =
        serde_yaml::from_str(yaml).map_err(|e| Error::serialization(e.to_string()))?;
    apply_value(client, namespace, value).await
}

/// Create a namespaced object from its JSON form (no-op if it already exists)
pub async fn apply_value(
    client: &Client,
    namespace: &str,
    value: serde_json::Value,
) -> Result<DynamicObject, Error> {
    let mut obj: DynamicObject =
        serde_json::from_value(value).map_err(|e| Error::serialization(e.to_string()))?;
    let types = obj
        .types
        .clone()
        .ok_or_else(|| Error::validation("manifest has no apiVersion/kind"))?;
    let ar = build_api_resource(&types.api_version, &types.kind);
    obj.metadata.namespace = Some(namespace.to_string());
    info!(kind = %types.kind, name = %obj.name_any(), namespace, "applying manifest");
    let api = dynamic_api(client, &ar, namespace);
    // KServe's admission webhook answers 500 until its pod is serving
    retry_with_backoff_if(
        &RetryConfig::webhook(),
        "apply_manifest",
        |e: &Error| e.status().is_some_and(|s| s >= 500),
        || create_or_get(&api, &obj),
    )
    .await
}

/// JSON merge patch
pub async fn merge_patch(
    client: &Client,
    ar: &ApiResource,
    namespace: &str,
    name: &str,
    patch: &serde_json::Value,
) -> Result<DynamicObject, Error> {
    Ok(dynamic_api(client, ar, namespace)
        .patch(name, &PatchParams::default(), &Patch::Merge(patch))
        .await?)
}

/// Wait for an InferenceService to be Ready and return its view
pub async fn wait_for_isvc_ready(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<IsvcView, Error> {
    let obj = wait_for_resource_condition(
        client,
        &InferenceService::api_resource(),
        namespace,
        name,
        CONDITION_READY,
        STATUS_TRUE,
        timeout,
    )
    .await?;
    IsvcView::from_dynamic(&obj)
}

/// `https://<host>` of the first route matching `selector`
pub async fn route_url(client: &Client, namespace: &str, selector: &str) -> Result<String, Error> {
    let routes = dynamic_api(client, &Route::api_resource(), namespace)
        .list(&ListParams::default().labels(selector))
        .await?;
    routes
        .items
        .iter()
        .find_map(route_host)
        .map(|host| format!("https://{host}"))
        .ok_or_else(|| Error::not_found(Route::KIND, selector, namespace))
}
