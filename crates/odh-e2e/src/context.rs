//! Where the suite runs: cluster connection, platform namespaces and tokens.
//!
//! # Environment Variables
//!
//! ```bash
//! ODH_KUBECONFIG=/path/to/kubeconfig          # default: in-cluster / ~/.kube/config
//! ODH_APPLICATIONS_NAMESPACE=opendatahub
//! ODH_MODEL_REGISTRY_NAMESPACE=odh-model-registries
//! ODH_DSCI_NAME=default-dsci
//! ODH_DSC_NAME=default-dsc
//! ODH_TOKEN=sha256~...                        # admin bearer token for routes
//! ODH_TEST_USER=htpasswd-user                 # non-admin user name
//! ODH_TEST_USER_TOKEN=sha256~...              # that user's token
//! ODH_RUN_ID=abc123                           # suffix for created objects
//! ```

use std::path::Path;
use std::sync::OnceLock;

use kube::Client;
use odh_common::kube_utils::create_client;
use odh_common::{Error, DEFAULT_APPLICATIONS_NAMESPACE, DEFAULT_MODEL_REGISTRY_NAMESPACE};

/// Default DSCInitialization name created by the operator
pub const DEFAULT_DSCI_NAME: &str = "default-dsci";

/// Default DataScienceCluster name
pub const DEFAULT_DSC_NAME: &str = "default-dsc";

/// Longest Kubernetes object name the suite generates
const MAX_NAME_LEN: usize = 63;

/// Suite configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct E2eContext {
    /// Kubeconfig path; `None` uses kube's default inference
    pub kubeconfig: Option<String>,
    /// Namespace of platform components
    pub applications_namespace: String,
    /// Namespace model registry instances are created in
    pub model_registry_namespace: String,
    /// DSCInitialization name
    pub dsci_name: String,
    /// DataScienceCluster name
    pub dsc_name: String,
    /// Bearer token for HTTP calls as the admin user
    pub token: Option<String>,
    /// Name of a user without platform permissions
    pub test_user: Option<String>,
    /// That user's bearer token
    pub test_user_token: Option<String>,
}

impl Default for E2eContext {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            applications_namespace: DEFAULT_APPLICATIONS_NAMESPACE.to_string(),
            model_registry_namespace: DEFAULT_MODEL_REGISTRY_NAMESPACE.to_string(),
            dsci_name: DEFAULT_DSCI_NAME.to_string(),
            dsc_name: DEFAULT_DSC_NAME.to_string(),
            token: None,
            test_user: None,
            test_user_token: None,
        }
    }
}

impl E2eContext {
    /// Load from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let defaults = Self::default();
        Self {
            kubeconfig: get("ODH_KUBECONFIG"),
            applications_namespace: get("ODH_APPLICATIONS_NAMESPACE")
                .unwrap_or(defaults.applications_namespace),
            model_registry_namespace: get("ODH_MODEL_REGISTRY_NAMESPACE")
                .unwrap_or(defaults.model_registry_namespace),
            dsci_name: get("ODH_DSCI_NAME").unwrap_or(defaults.dsci_name),
            dsc_name: get("ODH_DSC_NAME").unwrap_or(defaults.dsc_name),
            token: get("ODH_TOKEN"),
            test_user: get("ODH_TEST_USER"),
            test_user_token: get("ODH_TEST_USER_TOKEN"),
        }
    }

    /// Kubernetes client for the configured cluster
    pub async fn client(&self) -> Result<Client, Error> {
        create_client(self.kubeconfig.as_deref().map(Path::new)).await
    }

    /// The non-admin user and token, required by RBAC scenarios
    pub fn require_test_user(&self) -> Result<(&str, &str), Error> {
        let user = self.test_user.as_deref().ok_or_else(|| {
            Error::validation_for_field("ODH_TEST_USER", "non-admin user name is not set")
        })?;
        let token = self.test_user_token.as_deref().ok_or_else(|| {
            Error::validation_for_field("ODH_TEST_USER_TOKEN", "non-admin user token is not set")
        })?;
        Ok((user, token))
    }

    /// The admin token, required by scenarios calling routes
    pub fn require_token(&self) -> Result<&str, Error> {
        self.token
            .as_deref()
            .ok_or_else(|| Error::validation_for_field("ODH_TOKEN", "admin token is not set"))
    }
}

static RUN_ID: OnceLock<String> = OnceLock::new();

/// Unique run ID for this test process.
///
/// `ODH_RUN_ID` if set (e.g. a CI build number), otherwise `{pid}-{millis}`.
pub fn run_id() -> &'static str {
    RUN_ID.get_or_init(|| {
        std::env::var("ODH_RUN_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| {
                let millis = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis())
                    .unwrap_or_default();
                format!("{}-{}", std::process::id(), millis % 1_000_000)
            })
    })
}

/// `{prefix}-{run_id}` as a valid object name
pub fn unique_name(prefix: &str) -> String {
    name_with_suffix(prefix, run_id())
}

fn name_with_suffix(prefix: &str, suffix: &str) -> String {
    let raw = format!("{prefix}-{suffix}").to_lowercase();
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    name.truncate(MAX_NAME_LEN);
    name.trim_matches('-').to_string()
}
