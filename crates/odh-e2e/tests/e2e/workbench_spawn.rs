//! Workbench spawn: a Notebook created the way the dashboard creates it gets
//! a running, Ready pod.
//!
//! ```bash
//! cargo test -p odh-e2e --features cluster-e2e --test e2e test_workbench_spawn -- --ignored --nocapture
//! ```

#![cfg(feature = "cluster-e2e")]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::Api;
use kube::ResourceExt;
use odh_common::kube_utils::{create_or_get, dynamic_api, HasApiResource};
use odh_common::resources::Route;
use odh_common::timeouts::TIMEOUT_10MIN;
use odh_e2e::notebook::{
    current_username, dashboard_route_name, internal_image_registry_available, minimal_image,
    notebook_image_path, notebook_pvc, wait_for_notebook_pod_ready, NotebookSpec,
};
use odh_e2e::teardown::best_effort;
use odh_e2e::wait::cluster::{distribution_from_release, get_operator_distribution};
use odh_e2e::wait::route::route_host;
use odh_e2e::Error;
use tracing::info;

use super::helpers::{apply_value, connect, init_e2e_test, TestHarness, TestNamespace};

const NOTEBOOK_NAME: &str = "test-odh-notebook";

#[tokio::test]
#[ignore]
async fn test_workbench_spawn() {
    init_e2e_test();
    let cluster = connect().await.expect("cluster connection");
    let (ctx, client) = (&cluster.ctx, &cluster.client);
    let ns = TestNamespace::create(client, "workbench").await.expect("namespace");
    let harness = TestHarness::new("workbench spawn");

    harness
        .run("notebook_pod_ready", || async {
            let release = get_operator_distribution(client, &ctx.dsc_name).await?;
            let distribution = distribution_from_release(&release);

            let dashboard = dynamic_api(client, &Route::api_resource(), &ctx.applications_namespace)
                .get(dashboard_route_name(distribution))
                .await?;
            let dashboard_host = route_host(&dashboard)
                .ok_or_else(|| Error::validation(format!("route {} has no host", dashboard.name_any())))?
                .to_string();
            let username = current_username(client).await?;
            let internal_registry = internal_image_registry_available(client).await?;

            let image = minimal_image(distribution);
            let notebook = NotebookSpec {
                name: NOTEBOOK_NAME.to_string(),
                namespace: ns.name.clone(),
                image_path: notebook_image_path(&image, internal_registry, &ctx.applications_namespace),
                image,
                username,
                dashboard_host,
                annotations: BTreeMap::new(),
            };
            info!(image = %notebook.image_path, "spawning workbench");

            let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), &ns.name);
            create_or_get(&pvcs, &notebook_pvc(NOTEBOOK_NAME, &ns.name)).await?;
            apply_value(client, &ns.name, notebook.manifest()).await?;

            let pod = wait_for_notebook_pod_ready(client, &ns.name, NOTEBOOK_NAME, TIMEOUT_10MIN).await?;
            info!(pod = %pod.name_any(), "workbench ready");
            Ok::<_, Error>(())
        })
        .await;

    best_effort("delete namespace", ns.delete(client)).await;
    harness.finish().expect("workbench spawn");
}
