//! Private InferenceGraph: with auth enabled, a user without a view role on
//! the graph is turned away and is let in once a RoleBinding grants `get` on
//! that graph.
//!
//! Needs `ODH_TEST_USER` / `ODH_TEST_USER_TOKEN`.
//!
//! ```bash
//! cargo test -p odh-e2e --features cluster-e2e --test e2e test_private_inference_graph -- --ignored --nocapture
//! ```

#![cfg(feature = "cluster-e2e")]

use std::sync::OnceLock;

use k8s_openapi::api::rbac::v1::Role;
use kube::api::Api;
use odh_common::kube_utils::{create_or_get, HasApiResource, CONDITION_READY, STATUS_TRUE};
use odh_common::resources::{DeploymentMode, InferenceGraph};
use odh_common::timeouts::TIMEOUT_10MIN;
use odh_e2e::http::BearerAccessEndpoint;
use odh_e2e::teardown::best_effort;
use odh_e2e::wait::cluster::wait_for_resource_condition;
use odh_e2e::wait::pods::get_pods_by_ig_label;
use odh_e2e::wait::rbac::{
    assert_forbidden, grant_access, inference_graph_view_role, wait_for_access_granted, SubjectKind,
};
use odh_e2e::Error;
use serde_json::{json, Value};
use tracing::info;

use super::helpers::serving::{iris_request, sklearn_isvc, IRIS_MODEL_URI, SKLEARN_RUNTIME_YAML};
use super::helpers::{
    apply_manifest, apply_value, connect, init_e2e_test, wait_for_isvc_ready, TestHarness,
    TestNamespace,
};

const GRAPH_NAME: &str = "iris-graph";
const ISVC_NAME: &str = "iris";
const ENABLE_AUTH_ANNOTATION: &str = "security.opendatahub.io/enable-auth";

fn private_graph(name: &str, isvc: &str) -> Value {
    json!({
        "apiVersion": InferenceGraph::API_VERSION,
        "kind": InferenceGraph::KIND,
        "metadata": {
            "name": name,
            "annotations": {
                ENABLE_AUTH_ANNOTATION: "true",
                "serving.kserve.io/deploymentMode": DeploymentMode::Serverless.as_str(),
            },
        },
        "spec": {"nodes": {"root": {
            "routerType": "Sequence",
            "steps": [{"name": isvc, "serviceName": isvc}],
        }}},
    })
}

#[tokio::test]
#[ignore]
async fn test_private_inference_graph() {
    init_e2e_test();
    let cluster = connect().await.expect("cluster connection");
    let (ctx, client) = (&cluster.ctx, &cluster.client);
    let (user, user_token) = ctx.require_test_user().expect("test user");
    let ns = TestNamespace::create(client, "ig-auth").await.expect("namespace");
    let harness = TestHarness::new("private inference graph");

    let graph_url: OnceLock<String> = OnceLock::new();
    let deployed = harness
        .run("graph_ready", || async {
            apply_manifest(client, &ns.name, SKLEARN_RUNTIME_YAML).await?;
            let isvc = sklearn_isvc(ISVC_NAME, DeploymentMode::Serverless.as_str(), IRIS_MODEL_URI, json!({}));
            apply_value(client, &ns.name, isvc).await?;
            wait_for_isvc_ready(client, &ns.name, ISVC_NAME, TIMEOUT_10MIN).await?;

            apply_value(client, &ns.name, private_graph(GRAPH_NAME, ISVC_NAME)).await?;
            let graph = wait_for_resource_condition(
                client,
                &InferenceGraph::api_resource(),
                &ns.name,
                GRAPH_NAME,
                CONDITION_READY,
                STATUS_TRUE,
                TIMEOUT_10MIN,
            )
            .await?;
            let pods = get_pods_by_ig_label(client, GRAPH_NAME, &ns.name).await?;
            info!(pods = pods.len(), "graph pods");
            let url = graph
                .data
                .pointer("/status/url")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::validation(format!("{GRAPH_NAME} has no status.url")))?;
            let _ = graph_url.set(url.to_string());
            Ok::<_, Error>(())
        })
        .await;

    let endpoint = graph_url.into_inner().map(|url| {
        BearerAccessEndpoint::new(cluster.http.clone(), url, user_token).with_json_body(iris_request())
    });
    let role_name = format!("{GRAPH_NAME}-view");
    let binding_name = format!("{GRAPH_NAME}-view-{user}");

    match (deployed, endpoint.as_ref()) {
        (true, Some(endpoint)) => {
            let denied = harness
                .run("forbidden_without_view_role", || assert_forbidden(endpoint))
                .await;
            if denied {
                harness
                    .run("allowed_with_view_role", || async {
                        let roles: Api<Role> = Api::namespaced(client.clone(), &ns.name);
                        let role = inference_graph_view_role(&role_name, &ns.name, Some(&[GRAPH_NAME]));
                        create_or_get(&roles, &role).await?;
                        grant_access(client, &ns.name, &binding_name, &role_name, SubjectKind::User, user)
                            .await?;
                        wait_for_access_granted(endpoint, None, None).await
                    })
                    .await;
            } else {
                harness.skip("allowed_with_view_role", "graph was not private");
            }
        }
        _ => {
            for check in ["forbidden_without_view_role", "allowed_with_view_role"] {
                harness.skip(check, "graph not deployed");
            }
        }
    }

    best_effort("delete namespace", ns.delete(client)).await;
    harness.finish().expect("private inference graph");
}
