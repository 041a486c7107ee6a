//! End-to-end test support for the ODH platform: fixed-interval samplers and
//! the waits built on them (pods, deployments, canary rollouts, RBAC
//! propagation, routes, platform readiness), plus HTTP endpoints and the
//! model registry, guardrails, workbench and LM evaluation helpers used by
//! the cluster scenarios under `tests/e2e`.

pub mod context;
pub mod endpoint;
pub mod guardrails;
pub mod http;
pub mod keda;
pub mod lm_eval;
pub mod model_registry;
pub mod notebook;
pub mod output;
pub mod port_forward;
pub mod sampler;
pub mod teardown;
pub mod wait;

pub use context::{run_id, unique_name, E2eContext};
pub use odh_common::{Error, Result};
pub use sampler::{TimeoutSampler, TimeoutWatch};
