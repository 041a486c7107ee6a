//! Locating the model registry instance and catalog the scenarios run against.
#![cfg(feature = "cluster-e2e")]

use kube::api::ListParams;
use kube::{Client, ResourceExt};
use odh_common::kube_utils::{dynamic_api, HasApiResource};
use odh_common::resources::ModelRegistry;
use odh_common::MODEL_REGISTRY_POD_FILTER;
use odh_e2e::model_registry::MODEL_REGISTRY_API_PATH;
use odh_e2e::Error;

use super::route_url;

/// Plain-HTTP REST port of the registry container, behind the auth proxy
pub const REGISTRY_REST_PORT: u16 = 8080;

/// A ModelRegistry and the HTTPS base URL of its route
pub struct RegistryEndpoint {
    pub name: String,
    pub base_url: String,
}

impl RegistryEndpoint {
    /// `<base>/api/model_registry/v1alpha3/registered_models`
    pub fn registered_models_url(&self) -> String {
        format!("{}{MODEL_REGISTRY_API_PATH}/registered_models", self.base_url)
    }
}

/// Every ModelRegistry in `namespace` with its route
pub async fn discover_registries(client: &Client, namespace: &str) -> Result<Vec<RegistryEndpoint>, Error> {
    let registries = dynamic_api(client, &ModelRegistry::api_resource(), namespace)
        .list(&ListParams::default())
        .await?;
    let mut endpoints = Vec::with_capacity(registries.items.len());
    for mr in &registries.items {
        let name = mr.name_any();
        let selector = format!("app={name},{MODEL_REGISTRY_POD_FILTER}");
        let base_url = route_url(client, namespace, &selector).await?;
        endpoints.push(RegistryEndpoint { name, base_url });
    }
    Ok(endpoints)
}

/// First ModelRegistry in `namespace` and its route
pub async fn discover_registry(client: &Client, namespace: &str) -> Result<RegistryEndpoint, Error> {
    discover_registries(client, namespace)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::not_found(ModelRegistry::KIND, "*", namespace))
}
