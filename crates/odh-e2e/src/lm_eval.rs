//! TrustyAI LM evaluation jobs: manifests, completion waits and the checks on
//! the evaluation pod.

use std::sync::LazyLock;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DynamicObject, LogParams};
use kube::Client;
use odh_common::kube_utils::{dynamic_api, HasApiResource};
use odh_common::resources::LMEvalJob;
use odh_common::Error;
use regex::Regex;
use serde_json::{json, Value};
use tracing::info;

use crate::sampler::TimeoutSampler;
use crate::wait::pods::pod_phase;

/// `status.state` of a finished job
pub const LMEVALJOB_COMPLETE_STATE: &str = "Complete";

/// How long an evaluation pod may run
pub const LMEVAL_POD_TIMEOUT: Duration = Duration::from_secs(20 * 60);

static JOB_COMPLETED_LOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"update status: job completed.*"state":"Complete","reason":"Succeeded""#)
        .expect("job completion pattern compiles")
});

/// Evaluation of a Hugging Face model
#[derive(Debug, Clone)]
pub struct LMEvalJobSpec {
    /// Job name, also the name of its pod
    pub name: String,
    /// `pretrained=...` and friends
    pub model_args: Vec<(String, String)>,
    /// `taskList`: `{"taskNames": [...]}` or custom task recipes
    pub task_list: Value,
    /// Fraction or count of samples per task
    pub limit: Option<String>,
    /// Let the job download models and datasets
    pub allow_online: bool,
    /// Let tasks run code from the dataset
    pub allow_code_execution: bool,
}

impl LMEvalJobSpec {
    /// Job running `tasks` on `pretrained` with online access
    pub fn huggingface(name: &str, pretrained: &str, tasks: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            model_args: vec![("pretrained".to_string(), pretrained.to_string())],
            task_list: json!({"taskNames": tasks}),
            limit: Some("0.01".to_string()),
            allow_online: true,
            allow_code_execution: true,
        }
    }

    /// Manifest for the custom resource
    pub fn manifest(&self) -> Value {
        let model_args: Vec<Value> = self
            .model_args
            .iter()
            .map(|(name, value)| json!({"name": name, "value": value}))
            .collect();
        let mut spec = json!({
            "model": "hf",
            "modelArgs": model_args,
            "taskList": self.task_list,
            "logSamples": true,
            "allowOnline": self.allow_online,
            "allowCodeExecution": self.allow_code_execution,
        });
        if let Some(limit) = &self.limit {
            spec["limit"] = json!(limit);
        }
        json!({
            "apiVersion": LMEvalJob::API_VERSION,
            "kind": LMEvalJob::KIND,
            "metadata": {"name": self.name},
            "spec": spec,
        })
    }
}

/// `status.state` and `status.reason` of a job
pub fn lmeval_job_state(job: &DynamicObject) -> (Option<&str>, Option<&str>) {
    let status = job.data.get("status");
    let field = |name: &str| status.and_then(|s| s.get(name)).and_then(|v| v.as_str());
    (field("state"), field("reason"))
}

/// Wait for a job to reach `Complete`; a `Failed` reason ends the wait early.
pub async fn wait_for_lmevaljob_complete(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<DynamicObject, Error> {
    let api = dynamic_api(client, &LMEvalJob::api_resource(), namespace);
    let (api, job_name) = (&api, name);
    info!(job = %name, namespace, "waiting for LMEvalJob");

    let job = TimeoutSampler::new(
        format!("LMEvalJob {namespace}/{name} complete"),
        timeout,
        Duration::from_secs(10),
    )
    .retry_not_found()
    .wait_until(
        || async move { Ok(api.get(job_name).await?) },
        |job| {
            let (state, reason) = lmeval_job_state(job);
            state == Some(LMEVALJOB_COMPLETE_STATE) || reason == Some("Failed")
        },
    )
    .await?;

    let (state, reason) = lmeval_job_state(&job);
    if state == Some(LMEVALJOB_COMPLETE_STATE) && reason != Some("Failed") {
        return Ok(job);
    }
    Err(Error::validation(format!(
        "LMEvalJob {namespace}/{name} ended in state {state:?} with reason {reason:?}"
    )))
}

/// The driver logged a completed, succeeded job
pub fn job_completed_in_logs(logs: &str) -> bool {
    JOB_COMPLETED_LOG.is_match(logs)
}

/// Wait for the evaluation pod to succeed and check its logs report the job
/// as completed.
pub async fn validate_lmeval_job_pod_and_logs(
    client: &Client,
    namespace: &str,
    job_name: &str,
) -> Result<(), Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let (pods, pod_name) = (&api, job_name);

    TimeoutSampler::new(
        format!("LMEval pod {namespace}/{job_name} succeeded"),
        LMEVAL_POD_TIMEOUT,
        Duration::from_secs(10),
    )
    .retry_not_found()
    .wait_until(
        || async move { Ok(pods.get(pod_name).await?) },
        |pod| pod_phase(pod) == "Succeeded",
    )
    .await?;

    let logs = api.logs(job_name, &LogParams::default()).await?;
    if job_completed_in_logs(&logs) {
        info!(pod = %job_name, "LMEval job completed");
        Ok(())
    } else {
        Err(Error::validation(format!(
            "pod {namespace}/{job_name} succeeded but its logs do not report a completed job"
        )))
    }
}
