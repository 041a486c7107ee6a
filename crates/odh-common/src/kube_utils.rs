//! Kubernetes plumbing shared by every wait and scenario.
//!
//! Platform resources (InferenceService, ModelRegistry, ...) are CRDs owned by
//! external operators, so they are read and written through `DynamicObject`
//! with an `ApiResource` built from compile-time constants. Built-in kinds go
//! through k8s-openapi types.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::Error;

/// Condition type for ready
pub const CONDITION_READY: &str = "Ready";
/// Condition type for available
pub const CONDITION_AVAILABLE: &str = "Available";
/// Status value for true conditions
pub const STATUS_TRUE: &str = "True";

const CLIENT_CONTEXT: &str = "create_client";

// =============================================================================
// Client
// =============================================================================

/// Timeouts applied to every request the kube client makes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// TCP/TLS connect
    pub connect: Duration,
    /// Waiting for a response; watches are not used, so this bounds every call
    pub read: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(30),
        }
    }
}

static CRYPTO_PROVIDER: Once = Once::new();

/// Make ring the process-wide rustls provider.
///
/// Both kube and reqwest build rustls configs; with no default installed,
/// rustls refuses to pick one when several providers are compiled in.
pub fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        if rustls::crypto::ring::default_provider().install_default().is_err() {
            warn!("a rustls crypto provider was already installed, keeping it");
        }
    });
}

/// Client for the cluster in `kubeconfig` (or the inferred one) with the
/// default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeouts(kubeconfig, ClientTimeouts::default()).await
}

/// Client with explicit timeouts.
///
/// With no path, falls back to `Config::infer` (KUBECONFIG, ~/.kube/config,
/// then in-cluster service account).
pub async fn create_client_with_timeouts(
    kubeconfig: Option<&Path>,
    timeouts: ClientTimeouts,
) -> Result<Client, Error> {
    install_crypto_provider();
    let mut config = load_config(kubeconfig).await?;
    config.connect_timeout = Some(timeouts.connect);
    config.read_timeout = Some(timeouts.read);
    debug!(cluster = %config.cluster_url, namespace = %config.default_namespace, "kube config loaded");
    Client::try_from(config)
        .map_err(|e| Error::internal_with_context(CLIENT_CONTEXT, format!("client setup failed: {e}")))
}

async fn load_config(kubeconfig: Option<&Path>) -> Result<Config, Error> {
    let Some(path) = kubeconfig else {
        return Config::infer().await.map_err(|e| {
            Error::internal_with_context(CLIENT_CONTEXT, format!("no usable cluster config: {e}"))
        });
    };
    let raw = Kubeconfig::read_from(path).map_err(|e| {
        Error::internal_with_context(
            CLIENT_CONTEXT,
            format!("cannot read {}: {e}", path.display()),
        )
    })?;
    Config::from_custom_kubeconfig(raw, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::internal_with_context(
                CLIENT_CONTEXT,
                format!("invalid kubeconfig {}: {e}", path.display()),
            )
        })
}

// =============================================================================
// ApiResource building
// =============================================================================

/// Types with a compile-time known API version and kind.
///
/// Implemented by marker types for the platform CRDs so call sites can write
/// `InferenceService::api_resource()` instead of spelling out group/version.
pub trait HasApiResource {
    /// Full API version (e.g., "serving.kserve.io/v1beta1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "InferenceService")
    const KIND: &'static str;

    /// ApiResource for this kind
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// ApiResource for an `apiVersion` and kind, with the conventional plural
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split `group/version` into its parts; core kinds have an empty group
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Lowercase plural used in the resource URL path.
///
/// Covers the English rules CRD authors follow (`-ies`, `-es`, `-s`); none
/// of the kinds used here have an irregular plural.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }
    let suffix = if ["s", "x", "ch", "sh"].iter().any(|end| lower.ends_with(end)) {
        "es"
    } else {
        "s"
    };
    lower + suffix
}

/// Namespaced dynamic API for a CRD
pub fn dynamic_api(client: &Client, ar: &ApiResource, namespace: &str) -> Api<DynamicObject> {
    Api::namespaced_with(client.clone(), namespace, ar)
}

/// Cluster-scoped dynamic API for a CRD
pub fn dynamic_api_cluster(client: &Client, ar: &ApiResource) -> Api<DynamicObject> {
    Api::all_with(client.clone(), ar)
}

// =============================================================================
// Error classification
// =============================================================================

/// True when the API answered 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

// =============================================================================
// Conditions
// =============================================================================

/// Typed status conditions (`type` plus `status`) from k8s-openapi
pub trait StatusCondition {
    /// Condition type, e.g. "Ready"
    fn condition_type(&self) -> &str;
    /// "True", "False" or "Unknown"
    fn condition_status(&self) -> &str;
}

macro_rules! status_condition {
    ($($ty:path),* $(,)?) => {
        $(
            impl StatusCondition for $ty {
                fn condition_type(&self) -> &str {
                    &self.type_
                }
                fn condition_status(&self) -> &str {
                    &self.status
                }
            }
        )*
    };
}

status_condition!(
    k8s_openapi::api::core::v1::PodCondition,
    k8s_openapi::api::core::v1::NodeCondition,
    k8s_openapi::api::apps::v1::DeploymentCondition,
);

/// True when `condition_type` is present with status True
pub fn has_condition<C: StatusCondition>(conditions: Option<&[C]>, condition_type: &str) -> bool {
    conditions.unwrap_or_default().iter().any(|c| {
        c.condition_type() == condition_type && c.condition_status() == STATUS_TRUE
    })
}

/// Status of `status.conditions[type == condition_type]` on a dynamic object
pub fn dynamic_condition_status<'a>(obj: &'a DynamicObject, condition_type: &str) -> Option<&'a str> {
    obj.data
        .pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(|t| t.as_str()) == Some(condition_type))?
        .get("status")?
        .as_str()
}

/// True when the dynamic object reports `condition_type` with the given status
pub fn dynamic_has_condition(obj: &DynamicObject, condition_type: &str, status: &str) -> bool {
    dynamic_condition_status(obj, condition_type) == Some(status)
}

// =============================================================================
// Create / delete
// =============================================================================

/// Create an object, or fetch the existing one if it is already there.
///
/// Fixtures are re-run against long-lived clusters, so a 409 is not a failure.
pub async fn create_or_get<K>(api: &Api<K>, obj: &K) -> Result<K, Error>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    match api.create(&PostParams::default(), obj).await {
        Ok(created) => {
            info!(name = ?obj.meta().name, namespace = ?obj.meta().namespace, "created");
            Ok(created)
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => {
            let name = obj.meta().name.clone().unwrap_or_default();
            debug!(name = %name, "already exists, fetching current object");
            Ok(api.get(&name).await?)
        }
        Err(e) => Err(e.into()),
    }
}

/// Delete an object, treating 404 as success.
///
/// Returns true when a delete was actually issued.
pub async fn delete_ignore_not_found<K>(api: &Api<K>, name: &str) -> Result<bool, Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
