//! Model registry REST API: instance availability, model registration and
//! updates through the route, the same data through a port-forward to the
//! registry service, and the model catalog API.
//!
//! ```bash
//! cargo test -p odh-e2e --features cluster-e2e --test e2e test_model_registry_rest -- --ignored --nocapture
//! ```

#![cfg(feature = "cluster-e2e")]

use std::sync::OnceLock;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ListParams};
use kube::ResourceExt;
use odh_common::kube_utils::{dynamic_api, HasApiResource, CONDITION_AVAILABLE, STATUS_TRUE};
use odh_common::resources::{ModelRegistry, ModelRegistryV1Alpha1};
use odh_common::timeouts::{TIMEOUT_2MIN, TIMEOUT_5MIN};
use odh_common::MODEL_CATALOG_ROUTE_FILTER;
use odh_e2e::http::http_get_with_retry;
use odh_e2e::model_registry::{
    bool_custom_property_update, document_id, model_catalog_config_maps,
    registry_status_populated, validate_resource_attributes, wait_for_model_catalog_api,
    ModelRegistryRest, ModelState, RegisterModel, RegisteredModel, MODEL_CATALOG_API_PATH,
    MODEL_REGISTRY_API_PATH,
};
use odh_e2e::port_forward::PortForward;
use odh_e2e::wait::cluster::wait_for_resource_condition;
use odh_e2e::{unique_name, Error};
use serde_json::{json, Value};

use super::helpers::registry::{discover_registry, REGISTRY_REST_PORT};
use super::helpers::{connect, init_e2e_test, route_url, TestHarness};

/// PATCH a document and check the response carries every field of `update`
async fn update_and_validate(
    rest: &ModelRegistryRest,
    api_name: &str,
    id: &str,
    update: &Value,
) -> Result<(), Error> {
    let updated = rest.patch(api_name, id, update).await?;
    validate_resource_attributes(update, &updated, api_name)
}

#[tokio::test]
#[ignore]
async fn test_model_registry_rest() {
    init_e2e_test();
    let cluster = connect().await.expect("cluster connection");
    let (ctx, client) = (&cluster.ctx, &cluster.client);
    let token = ctx.require_token().expect("admin token");
    let namespace = ctx.model_registry_namespace.as_str();
    let registry = discover_registry(client, namespace)
        .await
        .expect("model registry instance");
    let rest = ModelRegistryRest::new(
        cluster.http.clone(),
        registry.base_url.clone(),
        Some(token.to_string()),
    );
    let model = RegisterModel {
        model_name: unique_name("my-model"),
        ..Default::default()
    };
    let registered: OnceLock<RegisteredModel> = OnceLock::new();
    let harness = TestHarness::new("model registry rest");

    harness
        .run("registry_available", || async {
            wait_for_resource_condition(
                client,
                &ModelRegistry::api_resource(),
                namespace,
                &registry.name,
                CONDITION_AVAILABLE,
                STATUS_TRUE,
                TIMEOUT_5MIN,
            )
            .await
            .map(|_| ())
        })
        .await;

    harness
        .run("registry_api_version", || async {
            let mr = dynamic_api(client, &ModelRegistry::api_resource(), namespace)
                .get(&registry.name)
                .await?;
            let api_version = mr.types.map(|t| t.api_version).unwrap_or_default();
            if api_version == ModelRegistry::API_VERSION {
                Ok(())
            } else {
                Err(Error::validation(format!(
                    "expected apiVersion {}, got {api_version:?}",
                    ModelRegistry::API_VERSION
                )))
            }
        })
        .await;

    harness
        .run("registry_status_v1alpha1", || async {
            let mr = dynamic_api(client, &ModelRegistryV1Alpha1::api_resource(), namespace)
                .get(&registry.name)
                .await?;
            if registry_status_populated(&mr) {
                Ok(())
            } else {
                Err(Error::validation(format!(
                    "{} has an empty status through {}",
                    registry.name,
                    ModelRegistryV1Alpha1::API_VERSION
                )))
            }
        })
        .await;

    let ok = harness
        .run("register_model", || async {
            let result = rest.register_model(&model).await?;
            validate_resource_attributes(
                &json!({
                    "name": model.model_name,
                    "description": model.model_description,
                }),
                &result.register_model,
                "register_model",
            )?;
            validate_resource_attributes(
                &json!({"name": model.model_version, "author": model.author}),
                &result.model_version,
                "model_version",
            )?;
            validate_resource_attributes(
                &json!({
                    "uri": model.model_uri,
                    "modelFormatName": model.model_format,
                    "modelFormatVersion": model.model_format_version,
                    "storageKey": model.model_storage_key,
                    "storagePath": model.model_storage_path,
                }),
                &result.model_artifact,
                "model_artifact",
            )?;
            let _ = registered.set(result);
            Ok::<_, Error>(())
        })
        .await;

    let ids = || -> Result<(String, String, String), Error> {
        let r = registered
            .get()
            .ok_or_else(|| Error::validation("no registered model"))?;
        Ok((
            document_id(&r.register_model, "RegisteredModel")?,
            document_id(&r.model_version, "ModelVersion")?,
            document_id(&r.model_artifact, "ModelArtifact")?,
        ))
    };

    let updates = [
        "update_artifact",
        "update_version",
        "archive_and_restore_version",
        "update_version_custom_property",
        "update_registered_model_description",
        "registered_model_via_port_forward",
    ];
    if ok {
        harness
            .run("update_artifact", || async {
                let (_, _, artifact) = ids()?;
                for update in [
                    json!({"description": "updated artifact description"}),
                    json!({"modelFormatName": "tensorflow"}),
                    json!({"modelFormatVersion": "v2"}),
                ] {
                    update_and_validate(&rest, "model_artifacts", &artifact, &update).await?;
                }
                Ok::<_, Error>(())
            })
            .await;

        harness
            .run("update_version", || async {
                let (_, version, _) = ids()?;
                let update = json!({"description": "updated model version description"});
                update_and_validate(&rest, "model_versions", &version, &update).await
            })
            .await;

        harness
            .run("archive_and_restore_version", || async {
                let (_, version, _) = ids()?;
                for state in [ModelState::Archived, ModelState::Live] {
                    update_and_validate(&rest, "model_versions", &version, &state.update()).await?;
                }
                Ok::<_, Error>(())
            })
            .await;

        harness
            .run("update_version_custom_property", || async {
                let (_, version, _) = ids()?;
                let update = bool_custom_property_update("bool_key", true);
                update_and_validate(&rest, "model_versions", &version, &update).await
            })
            .await;

        harness
            .run("update_registered_model_description", || async {
                let (model_id, _, _) = ids()?;
                let update = json!({"description": "updated registered model description"});
                update_and_validate(&rest, "registered_models", &model_id, &update).await
            })
            .await;

        harness
            .run("registered_model_via_port_forward", || async {
                let forward = PortForward::start(
                    ctx.kubeconfig.as_deref(),
                    namespace,
                    &format!("svc/{}", registry.name),
                    REGISTRY_REST_PORT,
                )
                .await?;
                let url = format!("{}{MODEL_REGISTRY_API_PATH}/registered_models", forward.url());
                let resp = http_get_with_retry(&cluster.http, &url, None).await?;
                let resp = resp.error_for_status(&url)?;
                if resp.body.contains(&model.model_name) {
                    Ok(())
                } else {
                    Err(Error::validation(format!(
                        "{} not listed by the registry service",
                        model.model_name
                    )))
                }
            })
            .await;
    } else {
        for check in updates {
            harness.skip(check, "registration failed");
        }
    }

    harness
        .run("one_model_catalog_config_map", || async {
            let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
            let names: Vec<String> = config_maps
                .list(&ListParams::default())
                .await?
                .items
                .iter()
                .map(|cm| cm.name_any())
                .collect();
            let catalogs = model_catalog_config_maps(names.iter().map(String::as_str));
            if catalogs.len() == 1 {
                Ok(())
            } else {
                Err(Error::validation(format!(
                    "expected one model catalog sources ConfigMap, found {catalogs:?}"
                )))
            }
        })
        .await;

    harness
        .run("model_catalog_api", || async {
            let base = route_url(client, namespace, MODEL_CATALOG_ROUTE_FILTER).await?;
            let url = format!("{base}{MODEL_CATALOG_API_PATH}");
            wait_for_model_catalog_api(&cluster.http, &url, Some(token), TIMEOUT_2MIN).await
        })
        .await;

    harness.finish().expect("model registry rest");
}
