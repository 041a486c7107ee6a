//! LM evaluation of a small Hugging Face model: the LMEvalJob completes and
//! its pod logs a succeeded run.
//!
//! Needs outbound access to Hugging Face.
//!
//! ```bash
//! cargo test -p odh-e2e --features cluster-e2e --test e2e test_lmeval_huggingface -- --ignored --nocapture
//! ```

#![cfg(feature = "cluster-e2e")]

use odh_common::timeouts::TIMEOUT_15MIN;
use odh_e2e::lm_eval::{
    validate_lmeval_job_pod_and_logs, wait_for_lmevaljob_complete, LMEvalJobSpec,
};
use odh_e2e::teardown::best_effort;
use odh_e2e::Error;

use super::helpers::{apply_value, connect, init_e2e_test, TestHarness, TestNamespace};

const JOB_NAME: &str = "lmeval-test";
const TINY_MODEL: &str = "rgeada/tiny-untrained-granite";

#[tokio::test]
#[ignore]
async fn test_lmeval_huggingface() {
    init_e2e_test();
    let cluster = connect().await.expect("cluster connection");
    let client = &cluster.client;
    let ns = TestNamespace::create(client, "lmeval").await.expect("namespace");
    let harness = TestHarness::new("lmeval huggingface");

    let pod_ok = harness
        .run("evaluation_pod_succeeds", || async {
            let job = LMEvalJobSpec::huggingface(JOB_NAME, TINY_MODEL, &["arc_easy"]);
            apply_value(client, &ns.name, job.manifest()).await?;
            validate_lmeval_job_pod_and_logs(client, &ns.name, JOB_NAME).await
        })
        .await;

    if pod_ok {
        harness
            .run("job_complete", || async {
                wait_for_lmevaljob_complete(client, &ns.name, JOB_NAME, TIMEOUT_15MIN).await?;
                Ok::<_, Error>(())
            })
            .await;
    } else {
        harness.skip("job_complete", "evaluation pod failed");
    }

    best_effort("delete namespace", ns.delete(client)).await;
    harness.finish().expect("lmeval huggingface");
}
