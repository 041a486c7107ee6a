//! Model registry access control: a user without permissions is turned away,
//! a RoleBinding lets them in once the auth proxy notices, and deleting the
//! binding locks them out again.
//!
//! Needs `ODH_TEST_USER` / `ODH_TEST_USER_TOKEN` for a user that has no
//! access to the registry.
//!
//! ```bash
//! cargo test -p odh-e2e --features cluster-e2e --test e2e test_model_registry_rbac -- --ignored --nocapture
//! ```

#![cfg(feature = "cluster-e2e")]

use k8s_openapi::api::rbac::v1::Role;
use kube::api::Api;
use odh_common::kube_utils::{create_or_get, delete_ignore_not_found};
use odh_e2e::http::BearerAccessEndpoint;
use odh_e2e::teardown::best_effort;
use odh_e2e::unique_name;
use odh_e2e::wait::rbac::{
    assert_forbidden, grant_access, model_registry_access_role, revoke_access,
    wait_for_access_granted, wait_for_access_revoked, SubjectKind,
};
use tracing::info;

use super::helpers::registry::discover_registry;
use super::helpers::{connect, init_e2e_test, TestHarness};

#[tokio::test]
#[ignore]
async fn test_model_registry_rbac() {
    init_e2e_test();
    let cluster = connect().await.expect("cluster connection");
    let (ctx, client) = (&cluster.ctx, &cluster.client);
    let (user, user_token) = ctx.require_test_user().expect("test user");
    let namespace = ctx.model_registry_namespace.as_str();
    let registry = discover_registry(client, namespace)
        .await
        .expect("model registry instance");
    info!(registry = %registry.name, url = %registry.base_url, "testing registry");

    let endpoint = BearerAccessEndpoint::new(
        cluster.http.clone(),
        registry.registered_models_url(),
        user_token,
    );
    let role_name = unique_name(&format!("{}-access", registry.name));
    let binding_name = unique_name(&format!("{}-access-{user}", registry.name));
    let roles: Api<Role> = Api::namespaced(client.clone(), namespace);
    let harness = TestHarness::new("model registry rbac");

    let denied = harness
        .run("user_forbidden_without_binding", || assert_forbidden(&endpoint))
        .await;

    let granted = denied
        && harness
            .run("binding_grants_access", || async {
                create_or_get(
                    &roles,
                    &model_registry_access_role(&role_name, namespace, &registry.name),
                )
                .await?;
                grant_access(client, namespace, &binding_name, &role_name, SubjectKind::User, user)
                    .await?;
                wait_for_access_granted(&endpoint, None, None).await
            })
            .await;

    if granted {
        harness
            .run("revocation_propagates", || async {
                revoke_access(client, namespace, &binding_name).await?;
                wait_for_access_revoked(&endpoint, None, None).await
            })
            .await;
    } else {
        harness.skip("revocation_propagates", "access was never granted");
    }

    best_effort("revoke access", revoke_access(client, namespace, &binding_name)).await;
    best_effort("delete role", delete_ignore_not_found(&roles, &role_name)).await;
    harness.finish().expect("model registry rbac");
}
