//! Guardrails orchestrator with the built-in regex detector and the gateway:
//! the orchestrator rolls out, its routes get a long router timeout, PII in
//! a prompt is reported on the `pii` route and the `passthrough` route lets
//! the same kind of traffic through untouched.
//!
//! A vLLM emulator stands in for the generation model.
//!
//! ```bash
//! cargo test -p odh-e2e --features cluster-e2e --test e2e test_guardrails_gateway -- --ignored --nocapture
//! ```

#![cfg(feature = "cluster-e2e")]

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::ResourceExt;
use odh_common::kube_utils::{create_or_get, dynamic_api, HasApiResource};
use odh_common::resources::Route;
use odh_common::timeouts::{TIMEOUT_5MIN, TIMEOUT_10MIN};
use odh_e2e::guardrails::{
    annotate_orchestrator_routes, chat_request, gateway_chat_url, gateway_config_map,
    get_guardrails_orchestrator_pod, orchestrator_config_map, orchestrator_route_names,
    verify_detection, verify_no_detection, wait_for_guardrails_orchestrator, DetectionDirection,
    GuardrailsOrchestratorSpec, GATEWAY_CONFIG_NAME, ORCHESTRATOR_CONFIG_NAME,
    PII_INPUT_DETECTION_PROMPT,
};
use odh_e2e::http::post_json;
use odh_e2e::teardown::best_effort;
use odh_e2e::wait::route::route_host;
use odh_e2e::Error;
use serde_json::Value;
use tracing::info;

use super::helpers::{
    apply_manifest, apply_value, connect, init_e2e_test, wait_for_isvc_ready, TestHarness,
    TestNamespace,
};

const GENERATOR_NAME: &str = "llm";

const VLLM_EMULATOR_RUNTIME_YAML: &str = r#"
apiVersion: serving.kserve.io/v1alpha1
kind: ServingRuntime
metadata:
  name: vllm-emulator
spec:
  supportedModelFormats:
    - name: vLLM
      autoSelect: true
  multiModel: false
  containers:
    - name: kserve-container
      image: quay.io/trustyai_testing/vllm_emulator:latest
      ports:
        - containerPort: 8080
          protocol: TCP
"#;

const GENERATOR_ISVC_YAML: &str = r#"
apiVersion: serving.kserve.io/v1beta1
kind: InferenceService
metadata:
  name: llm
  annotations:
    serving.kserve.io/deploymentMode: RawDeployment
spec:
  predictor:
    model:
      modelFormat:
        name: vLLM
      runtime: vllm-emulator
      storageUri: hf://Qwen/Qwen2.5-0.5B-Instruct
"#;

#[tokio::test]
#[ignore]
async fn test_guardrails_gateway() {
    init_e2e_test();
    let cluster = connect().await.expect("cluster connection");
    let (ctx, client) = (&cluster.ctx, &cluster.client);
    let token = ctx.require_token().expect("admin token");
    let ns = TestNamespace::create(client, "guardrails").await.expect("namespace");
    let orchestrator = GuardrailsOrchestratorSpec {
        orchestrator_config: Some(ORCHESTRATOR_CONFIG_NAME.to_string()),
        enable_built_in_detectors: true,
        enable_guardrails_gateway: true,
        guardrails_gateway_config: Some(GATEWAY_CONFIG_NAME.to_string()),
        ..Default::default()
    };
    let harness = TestHarness::new("guardrails gateway");

    let generator = harness
        .run("deploy_generator", || async {
            apply_manifest(client, &ns.name, VLLM_EMULATOR_RUNTIME_YAML).await?;
            apply_manifest(client, &ns.name, GENERATOR_ISVC_YAML).await?;
            wait_for_isvc_ready(client, &ns.name, GENERATOR_NAME, TIMEOUT_10MIN).await?;
            Ok::<_, Error>(())
        })
        .await;

    let ready = generator
        && harness
            .run("orchestrator_ready", || async {
                let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), &ns.name);
                let generator_host = format!("{GENERATOR_NAME}-predictor.{}.svc.cluster.local", ns.name);
                create_or_get(&config_maps, &orchestrator_config_map(&ns.name, &generator_host, 80))
                    .await?;
                create_or_get(&config_maps, &gateway_config_map(&ns.name)).await?;
                apply_value(client, &ns.name, orchestrator.manifest()).await?;

                wait_for_guardrails_orchestrator(client, &ns.name, &orchestrator.name, TIMEOUT_5MIN)
                    .await?;
                let pod = get_guardrails_orchestrator_pod(client, &ns.name).await?;
                info!(pod = %pod.name_any(), "orchestrator pod");
                Ok::<_, Error>(())
            })
            .await;

    let routed = ready
        && harness
            .run("routes_timeout_annotated", || {
                annotate_orchestrator_routes(client, &ns.name, &orchestrator.name)
            })
            .await;

    let (orchestrator_name, namespace) = (orchestrator.name.as_str(), ns.name.as_str());
    let gateway_url = |route: &'static str| async move {
        let [_, _, gateway] = orchestrator_route_names(orchestrator_name);
        let gateway = dynamic_api(client, &Route::api_resource(), namespace)
            .get(&gateway)
            .await?;
        let host = route_host(&gateway)
            .ok_or_else(|| Error::validation(format!("route {} has no host", gateway.name_any())))?;
        Ok::<_, Error>(gateway_chat_url(host, route))
    };

    if routed {
        harness
            .run("pii_input_detected", || async {
                let url = gateway_url("pii").await?;
                let body = chat_request(GENERATOR_NAME, PII_INPUT_DETECTION_PROMPT.content);
                let response: Value = post_json(&cluster.http, &url, Some(token), &body)
                    .await?
                    .error_for_status(&url)?
                    .json()?;
                verify_detection(&response, &PII_INPUT_DETECTION_PROMPT, DetectionDirection::Input)
            })
            .await;

        harness
            .run("passthrough_not_inspected", || async {
                let url = gateway_url("passthrough").await?;
                let body = chat_request(GENERATOR_NAME, PII_INPUT_DETECTION_PROMPT.content);
                let response: Value = post_json(&cluster.http, &url, Some(token), &body)
                    .await?
                    .error_for_status(&url)?
                    .json()?;
                verify_no_detection(&response)
            })
            .await;
    } else {
        harness.skip("pii_input_detected", "orchestrator not reachable");
        harness.skip("passthrough_not_inspected", "orchestrator not reachable");
    }

    best_effort("delete namespace", ns.delete(client)).await;
    harness.finish().expect("guardrails gateway");
}
