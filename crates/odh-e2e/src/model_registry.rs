//! Model registry REST API helpers.
//!
//! A model is registered in three calls: the registered model, a version of
//! it, then the artifact the version points at. Each call returns the created
//! document, whose `id` feeds the next call.
//!
//! Registered models and versions are then updated with PATCH: description,
//! state (LIVE/ARCHIVED) and typed custom properties.

use std::time::Duration;

use kube::api::DynamicObject;
use odh_common::Error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::http::{get, post_json, send};
use crate::sampler::TimeoutSampler;

/// REST prefix served by the model registry
pub const MODEL_REGISTRY_API_PATH: &str = "/api/model_registry/v1alpha3";

/// REST prefix served by the model catalog
pub const MODEL_CATALOG_API_PATH: &str = "/api/model_catalog/v1alpha1/";

/// Name prefix of the catalog sources ConfigMap; one per cluster no matter
/// how many registries exist
pub const DEFAULT_MODEL_CATALOG: &str = "model-catalog-sources";

/// Operator that owns ModelRegistry objects
pub const MODEL_REGISTRY_OPERATOR_NAME: &str = "model-registry-operator";

const CATALOG_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Everything needed to register one model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterModel {
    /// Registered model name
    pub model_name: String,
    /// Registered model description
    pub model_description: String,
    /// Version name
    pub model_version: String,
    /// Where the model lives
    pub model_uri: String,
    /// e.g. "onnx"
    pub model_format: String,
    /// e.g. "1"
    pub model_format_version: String,
    /// Data connection holding the model
    pub model_storage_key: String,
    /// Path inside the data connection
    pub model_storage_path: String,
    /// Author recorded on the version
    pub author: String,
    /// Plain values stored as custom properties of the version
    pub model_metadata: Map<String, Value>,
}

impl Default for RegisterModel {
    fn default() -> Self {
        Self {
            model_name: "my-model".to_string(),
            model_description: "lorem ipsum".to_string(),
            model_version: "2.0.0".to_string(),
            model_uri: "https://storage-place.my-company.com".to_string(),
            model_format: "onnx".to_string(),
            model_format_version: "1".to_string(),
            model_storage_key: "my-data-connection".to_string(),
            model_storage_path: "path/to/model".to_string(),
            author: "odh-e2e".to_string(),
            model_metadata: json!({
                "int_key": 1,
                "bool_key": false,
                "float_key": 1.5,
                "str_key": "str_value",
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
        }
    }
}

impl RegisterModel {
    /// Body for `POST registered_models`
    pub fn registered_model_body(&self) -> Value {
        json!({
            "name": self.model_name,
            "description": self.model_description,
        })
    }

    /// `count` models derived from this one, `<name>-0`, `<name>-1`, ...
    pub fn numbered(&self, count: usize) -> Vec<RegisterModel> {
        (0..count)
            .map(|i| RegisterModel {
                model_name: format!("{}-{i}", self.model_name),
                ..self.clone()
            })
            .collect()
    }

    /// Body for `POST model_versions`
    pub fn model_version_body(&self, registered_model_id: &str) -> Result<Value, Error> {
        let mut body = json!({
            "name": self.model_version,
            "description": format!("Model version for {}", self.model_name),
            "author": self.author,
            "registeredModelId": registered_model_id,
        });
        if !self.model_metadata.is_empty() {
            body["customProperties"] = custom_properties(&self.model_metadata)?;
        }
        Ok(body)
    }

    /// Body for `POST model_versions/{id}/artifacts`
    pub fn model_artifact_body(&self) -> Value {
        json!({
            "artifactType": "model-artifact",
            "name": self.model_name,
            "description": format!("Model artifact for {}", self.model_name),
            "uri": self.model_uri,
            "modelFormatName": self.model_format,
            "modelFormatVersion": self.model_format_version,
            "storageKey": self.model_storage_key,
            "storagePath": self.model_storage_path,
        })
    }
}

/// Lifecycle state of a registered model or model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelState {
    /// Visible and deployable
    Live,
    /// Hidden from the catalog, kept for history
    Archived,
}

impl ModelState {
    /// PATCH body moving a document into this state
    pub fn update(&self) -> Value {
        json!({ "state": self })
    }
}

/// Typed registry custom property for a plain JSON value.
///
/// Integers are sent as strings since `int_value` is an int64 in the API.
/// Arrays, objects and null have no registry type.
pub fn custom_property(value: &Value) -> Result<Value, Error> {
    match value {
        Value::Bool(b) => Ok(json!({"metadataType": "MetadataBoolValue", "bool_value": b})),
        Value::Number(n) if n.is_i64() || n.is_u64() => {
            Ok(json!({"metadataType": "MetadataIntValue", "int_value": n.to_string()}))
        }
        Value::Number(n) => Ok(json!({"metadataType": "MetadataDoubleValue", "double_value": n})),
        Value::String(s) => Ok(json!({"metadataType": "MetadataStringValue", "string_value": s})),
        other => Err(Error::validation_for_field(
            "customProperties",
            format!("no custom property type for {other}"),
        )),
    }
}

/// `customProperties` object for a map of plain values
pub fn custom_properties(metadata: &Map<String, Value>) -> Result<Value, Error> {
    metadata
        .iter()
        .map(|(key, value)| Ok((key.clone(), custom_property(value)?)))
        .collect::<Result<Map<_, _>, Error>>()
        .map(Value::Object)
}

/// PATCH body setting one boolean custom property
pub fn bool_custom_property_update(key: &str, value: bool) -> Value {
    json!({"customProperties": {key: {"metadataType": "MetadataBoolValue", "bool_value": value}}})
}

/// Documents created by [`ModelRegistryRest::register_model`]
#[derive(Debug, Clone, PartialEq)]
pub struct RegisteredModel {
    /// The registered model
    pub register_model: Value,
    /// Its version
    pub model_version: Value,
    /// The version's artifact
    pub model_artifact: Value,
}

/// Client for one model registry instance
#[derive(Debug, Clone)]
pub struct ModelRegistryRest {
    client: Client,
    base_url: String,
    token: Option<String>,
}

/// `id` of a registry document
pub fn document_id(doc: &Value, what: &str) -> Result<String, Error> {
    doc.get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::serialization_for_kind(what, format!("response has no id: {doc}")))
}

impl ModelRegistryRest {
    /// `base_url` is scheme + host (+ port), e.g. `https://registry.apps.example.com:443`
    pub fn new(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{MODEL_REGISTRY_API_PATH}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, Error> {
        let url = self.url(path);
        debug!(url = %url, "model registry POST");
        post_json(&self.client, &url, self.token.as_deref(), body)
            .await?
            .error_for_status(&url)?
            .json()
    }

    /// GET a document, e.g. `registered_models/1`
    pub async fn get(&self, path: &str) -> Result<Value, Error> {
        let url = self.url(path);
        get(&self.client, &url, self.token.as_deref())
            .await?
            .error_for_status(&url)?
            .json()
    }

    /// PATCH a document, e.g. `model_artifacts/{id}` with `{"description": ...}`
    pub async fn patch(&self, api_name: &str, id: &str, data: &Value) -> Result<Value, Error> {
        let url = self.url(&format!("{api_name}/{id}"));
        let req = self.client.patch(&url).json(data);
        let req = match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        send(req, &url).await?.error_for_status(&url)?.json()
    }

    /// Register a model, its version, and the version's artifact
    pub async fn register_model(&self, model: &RegisterModel) -> Result<RegisteredModel, Error> {
        let register_model = self
            .post("registered_models", &model.registered_model_body())
            .await?;
        let model_id = document_id(&register_model, "RegisteredModel")?;

        let model_version = self
            .post("model_versions", &model.model_version_body(&model_id)?)
            .await?;
        let version_id = document_id(&model_version, "ModelVersion")?;

        let model_artifact = self
            .post(
                &format!("model_versions/{version_id}/artifacts"),
                &model.model_artifact_body(),
            )
            .await?;

        info!(model = %model.model_name, model_id = %model_id, version_id = %version_id, "registered model");
        Ok(RegisteredModel {
            register_model,
            model_version,
            model_artifact,
        })
    }
}

/// Check every key of the `expected` object has the same value in `actual`.
///
/// All mismatches are collected into one validation error. A document that
/// is not a JSON object at all is a serialization error carrying its body.
pub fn validate_resource_attributes(
    expected: &Value,
    actual: &Value,
    resource_name: &str,
) -> Result<(), Error> {
    let expected = expected.as_object().ok_or_else(|| {
        Error::validation_for_field(
            resource_name,
            format!("expected attributes of {resource_name} must be an object, got {expected}"),
        )
    })?;
    if !actual.is_object() {
        return Err(Error::serialization_for_kind(
            resource_name,
            format!("{resource_name} is not a JSON object: {actual}"),
        ));
    }

    let mismatches: Vec<String> = expected
        .iter()
        .filter_map(|(key, want)| match actual.get(key) {
            Some(got) if got == want => None,
            Some(got) => Some(format!("{key}: expected {want}, found {got}")),
            None => Some(format!("{key}: expected {want}, missing")),
        })
        .collect();

    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(Error::validation_for_field(
            resource_name,
            format!("{resource_name} mismatches: {}", mismatches.join("; ")),
        ))
    }
}

/// External MySQL database a ModelRegistry stores metadata in
#[derive(Debug, Clone, PartialEq)]
pub struct MysqlConnection {
    /// Service host, e.g. `db.ns.svc.cluster.local`
    pub host: String,
    /// Port, 3306 for MySQL and MariaDB
    pub port: u16,
    /// Database name
    pub database: String,
    /// Database user
    pub username: String,
    /// Secret holding the password
    pub password_secret: String,
    /// Key of the password inside that secret
    pub password_key: String,
}

/// ModelRegistry with REST and gRPC servers and the OAuth proxy route enabled
pub fn model_registry_manifest(name: &str, operator_name: &str, mysql: &MysqlConnection) -> Value {
    json!({
        "apiVersion": "modelregistry.opendatahub.io/v1beta1",
        "kind": "ModelRegistry",
        "metadata": {
            "name": name,
            "labels": {
                "app.kubernetes.io/name": name,
                "app.kubernetes.io/instance": name,
                "app.kubernetes.io/part-of": operator_name,
                "app.kubernetes.io/created-by": operator_name,
            }
        },
        "spec": {
            "grpc": {},
            "rest": {},
            "oauthProxy": {"port": 8443, "routePort": 443, "serviceRoute": "enabled"},
            "mysql": {
                "host": mysql.host,
                "port": mysql.port,
                "database": mysql.database,
                "username": mysql.username,
                "passwordSecret": {"name": mysql.password_secret, "key": mysql.password_key},
                "skipDBCreation": false,
            }
        }
    })
}

/// A ModelRegistry whose operator has written any status at all
pub fn registry_status_populated(registry: &DynamicObject) -> bool {
    registry
        .data
        .get("status")
        .and_then(|s| s.as_object())
        .is_some_and(|s| !s.is_empty())
}

/// Check that creating a ModelRegistry outside the registries namespace was
/// refused with a 403 that names the namespace it has to live in.
pub fn expect_namespace_rejection<T>(
    created: Result<T, Error>,
    registries_namespace: &str,
) -> Result<(), Error> {
    let expected = format!("namespace must be {registries_namespace}");
    match created {
        Ok(_) => Err(Error::validation(format!(
            "ModelRegistry was admitted outside {registries_namespace}"
        ))),
        Err(e) if e.status() == Some(403) && e.to_string().contains(&expected) => {
            info!(error = %e, "ModelRegistry rejected outside the registries namespace");
            Ok(())
        }
        Err(e) => Err(Error::validation(format!(
            "expected 403 with \"{expected}\", got: {e}"
        ))),
    }
}

/// Names of the catalog sources ConfigMaps among `names`
pub fn model_catalog_config_maps<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    names
        .into_iter()
        .filter(|name| name.starts_with(DEFAULT_MODEL_CATALOG))
        .collect()
}

/// Wait until `<catalog_url>sources` answers 200.
///
/// `catalog_url` ends with [`MODEL_CATALOG_API_PATH`].
pub async fn wait_for_model_catalog_api(
    client: &Client,
    catalog_url: &str,
    token: Option<&str>,
    timeout: Duration,
) -> Result<(), Error> {
    let url = format!("{catalog_url}sources");
    let url = url.as_str();
    info!(url, "waiting for model catalog API");
    TimeoutSampler::new(format!("model catalog API at {url}"), timeout, CATALOG_POLL_INTERVAL)
        .wait_until(
            || async move { get(client, url, token).await?.error_for_status(url) },
            |resp| resp.status_code == 200,
        )
        .await
        .map(|_| ())
}
