//! RBAC propagation waits.
//!
//! Creating or deleting a RoleBinding is not immediately visible to the
//! OAuth/kube-rbac proxies in front of platform endpoints; they cache
//! authorization decisions. These waits poll an endpoint as the affected user
//! until the decision flips.

use std::time::Duration;

use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::api::{Api, ObjectMeta};
use kube::Client;
use odh_common::kube_utils::{create_or_get, delete_ignore_not_found};
use odh_common::timeouts::TIMEOUT_4MIN;
use odh_common::Error;
use tracing::{debug, info};

use crate::endpoint::{AccessEndpoint, AccessOutcome};
use crate::sampler::TimeoutSampler;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
const SERVING_API_GROUP: &str = "serving.kserve.io";
const RBAC_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Who a RoleBinding grants access to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    /// A single user
    User,
    /// An OpenShift group
    Group,
}

impl SubjectKind {
    fn as_str(&self) -> &'static str {
        match self {
            SubjectKind::User => "User",
            SubjectKind::Group => "Group",
        }
    }
}

/// Role allowing `get` on the service fronting a model registry instance,
/// which is what the registry's auth proxy checks.
pub fn model_registry_access_role(name: &str, namespace: &str, registry_name: &str) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["services".to_string()]),
            resource_names: Some(vec![registry_name.to_string()]),
            verbs: vec!["get".to_string()],
            ..Default::default()
        }]),
    }
}

/// Role allowing `get` on KServe `resource` objects, all of them or only
/// `resource_names`.
fn serving_view_role(name: &str, namespace: &str, resource: &str, resource_names: Option<&[&str]>) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![SERVING_API_GROUP.to_string()]),
            resources: Some(vec![resource.to_string()]),
            resource_names: resource_names.map(|names| names.iter().map(|n| n.to_string()).collect()),
            verbs: vec!["get".to_string()],
            ..Default::default()
        }]),
    }
}

/// Role the auth proxy of a private InferenceService checks
pub fn isvc_view_role(name: &str, namespace: &str, resource_names: Option<&[&str]>) -> Role {
    serving_view_role(name, namespace, "inferenceservices", resource_names)
}

/// Role the auth proxy of a private InferenceGraph checks
pub fn inference_graph_view_role(name: &str, namespace: &str, resource_names: Option<&[&str]>) -> Role {
    serving_view_role(name, namespace, "inferencegraphs", resource_names)
}

/// Role the operator creates for users of one registry instance
pub fn registry_user_role(registry_name: &str) -> String {
    format!("registry-user-{registry_name}")
}

/// RoleBinding of `role` to one user or group
pub fn role_binding(
    name: &str,
    namespace: &str,
    role: &str,
    subject_kind: SubjectKind,
    subject_name: &str,
) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![Subject {
            api_group: Some(RBAC_API_GROUP.to_string()),
            kind: subject_kind.as_str().to_string(),
            name: subject_name.to_string(),
            namespace: None,
        }]),
    }
}

/// Bind `role` to a user or group (no-op if the binding already exists)
pub async fn grant_access(
    client: &Client,
    namespace: &str,
    binding_name: &str,
    role: &str,
    subject_kind: SubjectKind,
    subject_name: &str,
) -> Result<RoleBinding, Error> {
    let api: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);
    info!(
        binding = %binding_name,
        role = %role,
        subject = %subject_name,
        kind = subject_kind.as_str(),
        "granting access"
    );
    create_or_get(
        &api,
        &role_binding(binding_name, namespace, role, subject_kind, subject_name),
    )
    .await
}

/// Delete a RoleBinding created by [`grant_access`]
pub async fn revoke_access(client: &Client, namespace: &str, binding_name: &str) -> Result<(), Error> {
    let api: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);
    if delete_ignore_not_found(&api, binding_name).await? {
        info!(binding = %binding_name, "revoked access");
    }
    Ok(())
}

async fn wait_for_outcome<P, A>(
    endpoint: &P,
    description: &str,
    timeout: Option<Duration>,
    sleep: Option<Duration>,
    accept: A,
) -> Result<AccessOutcome, Error>
where
    P: AccessEndpoint + ?Sized,
    A: Fn(&AccessOutcome) -> bool,
{
    TimeoutSampler::new(
        description,
        timeout.unwrap_or(TIMEOUT_4MIN),
        sleep.unwrap_or(RBAC_POLL_INTERVAL),
    )
    .wait_until(
        || async move {
            let outcome = endpoint.check().await;
            debug!(?outcome, "access check");
            Ok(outcome)
        },
        accept,
    )
    .await
}

/// Poll until the endpoint lets the calling user in
pub async fn wait_for_access_granted<P>(
    endpoint: &P,
    timeout: Option<Duration>,
    sleep: Option<Duration>,
) -> Result<(), Error>
where
    P: AccessEndpoint + ?Sized,
{
    wait_for_outcome(endpoint, "access to be granted", timeout, sleep, |o| {
        *o == AccessOutcome::Allowed
    })
    .await?;
    info!("access granted");
    Ok(())
}

/// Poll until the endpoint turns the calling user away (401 or 403)
pub async fn wait_for_access_revoked<P>(
    endpoint: &P,
    timeout: Option<Duration>,
    sleep: Option<Duration>,
) -> Result<(), Error>
where
    P: AccessEndpoint + ?Sized,
{
    let outcome = wait_for_outcome(endpoint, "access to be revoked", timeout, sleep, |o| {
        matches!(o, AccessOutcome::Forbidden(_))
    })
    .await?;
    info!(?outcome, "access revoked");
    Ok(())
}

/// A single check that must come back 403
pub async fn assert_forbidden<P>(endpoint: &P) -> Result<(), Error>
where
    P: AccessEndpoint + ?Sized,
{
    match endpoint.check().await {
        AccessOutcome::Forbidden(403) => Ok(()),
        other => Err(Error::validation(format!(
            "expected HTTP 403 Forbidden, got {other:?}"
        ))),
    }
}
