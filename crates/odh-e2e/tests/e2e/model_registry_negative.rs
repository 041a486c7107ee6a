//! ModelRegistry admission: an instance created outside the registries
//! namespace is refused with a 403 that names the namespace it belongs in.
//!
//! ```bash
//! cargo test -p odh-e2e --features cluster-e2e --test e2e test_model_registry_wrong_namespace -- --ignored --nocapture
//! ```

#![cfg(feature = "cluster-e2e")]

use odh_e2e::model_registry::{
    expect_namespace_rejection, model_registry_manifest, MysqlConnection,
    MODEL_REGISTRY_OPERATOR_NAME,
};
use odh_e2e::teardown::best_effort;

use super::helpers::{apply_value, connect, init_e2e_test, TestHarness, TestNamespace};

const REGISTRY_NAME: &str = "model-registry0";
const DB_NAME: &str = "model-registry-db0";

#[tokio::test]
#[ignore]
async fn test_model_registry_wrong_namespace() {
    init_e2e_test();
    let cluster = connect().await.expect("cluster connection");
    let (ctx, client) = (&cluster.ctx, &cluster.client);
    let ns = TestNamespace::create(client, "mr-negative").await.expect("namespace");
    let harness = TestHarness::new("model registry negative");

    harness
        .run("registry_refused_outside_registries_namespace", || async {
            let mysql = MysqlConnection {
                host: format!("{DB_NAME}.{}.svc.cluster.local", ns.name),
                port: 3306,
                database: "model_registry".to_string(),
                username: "mlmduser".to_string(),
                password_secret: DB_NAME.to_string(),
                password_key: "database-password".to_string(),
            };
            let manifest = model_registry_manifest(REGISTRY_NAME, MODEL_REGISTRY_OPERATOR_NAME, &mysql);
            let created = apply_value(client, &ns.name, manifest).await;
            expect_namespace_rejection(created, &ctx.model_registry_namespace)
        })
        .await;

    best_effort("delete namespace", ns.delete(client)).await;
    harness.finish().expect("model registry negative");
}
