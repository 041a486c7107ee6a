//! Polling/wait utilities.
//!
//! Each wait is a [`TimeoutSampler`](crate::sampler::TimeoutSampler) over a
//! Kubernetes get/list or an endpoint call, with the fixed interval and
//! budget that object kind needs to converge.

pub mod canary;
pub mod cluster;
pub mod deployment;
pub mod pods;
pub mod rbac;
pub mod route;
