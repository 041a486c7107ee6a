//! Workbenches: Kubeflow Notebook objects as the dashboard creates them,
//! their storage, and the wait for the spawned pod.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams, ObjectMeta};
use kube::Client;
use odh_common::kube_utils::{build_api_resource, dynamic_api_cluster, is_not_found, HasApiResource};
use odh_common::resources::Notebook;
use odh_common::Error;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::sampler::TimeoutSampler;
use crate::wait::pods::{find_failed_pods, is_pod_ready};

/// Registry address used when the cluster runs its internal image registry
pub const INTERNAL_IMAGE_REGISTRY_PATH: &str = "image-registry.openshift-image-registry.svc:5000";

/// Tag of the minimal workbench image
pub const MINIMAL_IMAGE_TAG: &str = "2025.2";

/// Label the dashboard lists its objects by
pub const DASHBOARD_LABEL: &str = "opendatahub.io/dashboard";

/// Label on the pods the notebook controller spawns
pub const NOTEBOOK_NAME_LABEL: &str = "notebook-name";

const OAUTH_PROXY_IMAGE: &str = "registry.redhat.io/openshift4/ose-oauth-proxy:v4.10";
const NOTEBOOK_PORT: u16 = 8888;

fn is_upstream(distribution: &str) -> bool {
    distribution == "upstream"
}

/// `<image>:<tag>` of the minimal workbench image for a distribution
pub fn minimal_image(distribution: &str) -> String {
    let name = if is_upstream(distribution) {
        "jupyter-minimal-notebook"
    } else {
        "s2i-minimal-notebook"
    };
    format!("{name}:{MINIMAL_IMAGE_TAG}")
}

/// Dashboard route of a distribution
pub fn dashboard_route_name(distribution: &str) -> &'static str {
    if is_upstream(distribution) {
        "odh-dashboard"
    } else {
        "rhods-dashboard"
    }
}

/// Where the notebook container pulls `image` from.
///
/// With the internal registry the imagestream in the applications namespace
/// is used; without it only `:<tag>` is given and the controller resolves it.
pub fn notebook_image_path(image: &str, internal_registry: bool, applications_namespace: &str) -> String {
    if internal_registry {
        format!("{INTERNAL_IMAGE_REGISTRY_PATH}/{applications_namespace}/{image}")
    } else {
        let tag = image.rsplit_once(':').map_or(image, |(_, tag)| tag);
        format!(":{tag}")
    }
}

/// A workbench as the dashboard would create it
#[derive(Debug, Clone)]
pub struct NotebookSpec {
    /// Notebook name, also its PVC and service account name
    pub name: String,
    /// Project namespace
    pub namespace: String,
    /// `<image>:<tag>` selected in the dashboard
    pub image: String,
    /// Pull path from [`notebook_image_path`]
    pub image_path: String,
    /// User the Jupyter server runs for
    pub username: String,
    /// Host of the dashboard route
    pub dashboard_host: String,
    /// Extra annotations (OAuth settings)
    pub annotations: BTreeMap<String, String>,
}

fn http_health(path: &str, port: &str, scheme: &str, initial_delay: u32) -> Value {
    json!({
        "failureThreshold": 3,
        "httpGet": {"path": path, "port": port, "scheme": scheme},
        "initialDelaySeconds": initial_delay,
        "periodSeconds": 5,
        "successThreshold": 1,
        "timeoutSeconds": 1,
    })
}

impl NotebookSpec {
    fn base_url(&self) -> String {
        format!("/notebook/{}/{}", self.namespace, self.name)
    }

    fn notebook_args(&self) -> String {
        let settings = json!({
            "user": self.username,
            "hub_host": format!("https://{}", self.dashboard_host),
            "hub_prefix": format!("/projects/{}", self.namespace),
        });
        [
            format!("--ServerApp.port={NOTEBOOK_PORT}"),
            "--ServerApp.token=''".to_string(),
            "--ServerApp.password=''".to_string(),
            format!("--ServerApp.base_url={}", self.base_url()),
            "--ServerApp.quit_button=False".to_string(),
            format!("--ServerApp.tornado_settings={settings}"),
        ]
        .join("\n")
    }

    fn oauth_proxy(&self) -> Value {
        let name = &self.name;
        let sar = json!({
            "verb": "get",
            "resource": "notebooks",
            "resourceAPIGroup": "kubeflow.org",
            "resourceName": name,
            "namespace": "$(NAMESPACE)",
        });
        json!({
            "name": "oauth-proxy",
            "image": OAUTH_PROXY_IMAGE,
            "imagePullPolicy": "Always",
            "args": [
                "--provider=openshift",
                "--https-address=:8443",
                "--http-address=",
                format!("--openshift-service-account={name}"),
                "--cookie-secret-file=/etc/oauth/config/cookie_secret",
                "--cookie-expire=24h0m0s",
                "--tls-cert=/etc/tls/private/tls.crt",
                "--tls-key=/etc/tls/private/tls.key",
                format!("--upstream=http://localhost:{NOTEBOOK_PORT}"),
                "--upstream-ca=/var/run/secrets/kubernetes.io/serviceaccount/ca.crt",
                "--email-domain=*",
                "--skip-provider-button",
                format!("--openshift-sar={sar}"),
                format!(
                    "--logout-url=https://{}/projects/{}?notebookLogout={name}",
                    self.dashboard_host, self.namespace
                ),
            ],
            "env": [{"name": "NAMESPACE", "valueFrom": {"fieldRef": {"fieldPath": "metadata.namespace"}}}],
            "ports": [{"containerPort": 8443, "name": "oauth-proxy", "protocol": "TCP"}],
            "livenessProbe": http_health("/oauth/healthz", "oauth-proxy", "HTTPS", 30),
            "readinessProbe": http_health("/oauth/healthz", "oauth-proxy", "HTTPS", 5),
            "resources": {
                "limits": {"cpu": "100m", "memory": "64Mi"},
                "requests": {"cpu": "100m", "memory": "64Mi"},
            },
            "volumeMounts": [
                {"mountPath": "/etc/oauth/config", "name": "oauth-config"},
                {"mountPath": "/etc/tls/private", "name": "tls-certificates"},
            ],
        })
    }

    /// Notebook manifest: the Jupyter container and its OAuth proxy sidecar
    pub fn manifest(&self) -> Value {
        let name = &self.name;
        let mut annotations = json!({
            "notebooks.opendatahub.io/inject-oauth": "true",
            "opendatahub.io/accelerator-name": "",
            "opendatahub.io/service-mesh": "false",
            "notebooks.opendatahub.io/last-image-selection": self.image,
        });
        for (key, value) in &self.annotations {
            annotations[key] = json!(value);
        }
        let health = http_health(&format!("{}/api", self.base_url()), "notebook-port", "HTTP", 10);

        json!({
            "apiVersion": Notebook::API_VERSION,
            "kind": Notebook::KIND,
            "metadata": {
                "name": name,
                "namespace": self.namespace,
                "annotations": annotations,
                "labels": {
                    "app": name,
                    DASHBOARD_LABEL: "true",
                    "opendatahub.io/odh-managed": "true",
                    "sidecar.istio.io/inject": "false",
                },
            },
            "spec": {"template": {"spec": {
                "affinity": {},
                "enableServiceLinks": false,
                "serviceAccountName": name,
                "containers": [
                    {
                        "name": name,
                        "image": self.image_path,
                        "imagePullPolicy": "Always",
                        "env": [
                            {"name": "NOTEBOOK_ARGS", "value": self.notebook_args()},
                            {"name": "JUPYTER_IMAGE", "value": self.image_path},
                        ],
                        "ports": [{"containerPort": NOTEBOOK_PORT, "name": "notebook-port", "protocol": "TCP"}],
                        "livenessProbe": health,
                        "readinessProbe": health,
                        "resources": {
                            "limits": {"cpu": "2", "memory": "4Gi"},
                            "requests": {"cpu": "1", "memory": "1Gi"},
                        },
                        "volumeMounts": [
                            {"mountPath": "/opt/app-root/src", "name": name},
                            {"mountPath": "/dev/shm", "name": "shm"},
                        ],
                        "workingDir": "/opt/app-root/src",
                    },
                    self.oauth_proxy(),
                ],
                "volumes": [
                    {"name": name, "persistentVolumeClaim": {"claimName": name}},
                    {"name": "shm", "emptyDir": {"medium": "Memory"}},
                    {"name": "oauth-config", "secret": {"defaultMode": 420, "secretName": format!("{name}-oauth-config")}},
                    {"name": "tls-certificates", "secret": {"defaultMode": 420, "secretName": format!("{name}-tls")}},
                ],
            }}},
        })
    }
}

/// 10Gi ReadWriteOnce claim backing a workbench's home directory
pub fn notebook_pvc(name: &str, namespace: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(DASHBOARD_LABEL.to_string(), "true".to_string())])),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            volume_mode: Some("Filesystem".to_string()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity("10Gi".to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Name of the user the client authenticates as (`User ~`)
pub async fn current_username(client: &Client) -> Result<String, Error> {
    let ar = build_api_resource("user.openshift.io/v1", "User");
    let user = dynamic_api_cluster(client, &ar).get("~").await?;
    user.metadata
        .name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::validation("current user has no name"))
}

/// The image registry operator manages a running internal registry
pub fn image_registry_managed(config: &Value) -> bool {
    config.pointer("/spec/managementState").and_then(|s| s.as_str()) == Some("Managed")
}

/// Whether the cluster's internal image registry is available; clusters
/// without the image registry operator have none.
pub async fn internal_image_registry_available(client: &Client) -> Result<bool, Error> {
    let ar = build_api_resource("imageregistry.operator.openshift.io/v1", "Config");
    match dynamic_api_cluster(client, &ar).get("cluster").await {
        Ok(config) => Ok(image_registry_managed(&config.data)),
        Err(e) if is_not_found(&e) => {
            warn!("image registry operator config not found");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Wait for the workbench pod to be Ready, failing fast when it cannot
/// start (bad image, crashing init container).
pub async fn wait_for_notebook_pod_ready(
    client: &Client,
    namespace: &str,
    name: &str,
    timeout: Duration,
) -> Result<Pod, Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(&format!("{NOTEBOOK_NAME_LABEL}={name}"));
    info!(notebook = %name, namespace, "waiting for notebook pod");

    let (api, params) = (&api, &params);
    let mut failed = Vec::new();
    let pods = TimeoutSampler::new(
        format!("notebook {namespace}/{name} pod ready"),
        timeout,
        Duration::from_secs(5),
    )
    .wait_until(
        || async move { Ok(api.list(params).await?.items) },
        |pods: &Vec<Pod>| {
            if pods.first().is_some_and(is_pod_ready) {
                return true;
            }
            failed = find_failed_pods(pods, None);
            !failed.is_empty()
        },
    )
    .await?;

    if !failed.is_empty() {
        return Err(Error::FailedPods { pods: failed });
    }
    pods.into_iter()
        .next()
        .ok_or_else(|| Error::not_found("Pod", name, namespace))
}
