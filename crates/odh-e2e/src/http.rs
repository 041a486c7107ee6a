//! HTTP access to deployed endpoints (routes, port-forwards).
//!
//! Cluster routes use the ingress operator's self-signed certificates, so the
//! client accepts invalid certs. Requests carry an OpenShift bearer token
//! when one is given.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use odh_common::kube_utils::install_crypto_provider;
use odh_common::retry::{retry_with_backoff, RetryConfig};
use odh_common::Error;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::endpoint::{AccessEndpoint, AccessOutcome, InferenceEndpoint};

/// Per-request timeout for endpoint calls
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the HTTP client used for all endpoint calls
pub fn http_client(timeout: Duration) -> Result<Client, Error> {
    install_crypto_provider();
    Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(timeout)
        .build()
        .map_err(|e| Error::internal_with_context("http_client", e.to_string()))
}

/// Status and body of a completed request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status_code: u16,
    /// Response body
    pub body: String,
}

impl HttpResponse {
    /// Check if the response indicates success (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Check if the response is a 403 Forbidden
    pub fn is_forbidden(&self) -> bool {
        self.status_code == 403
    }

    /// Check if the response is a 401 Unauthorized
    pub fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }

    /// 4xx: the server understood and said no; asking again won't help
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code)
    }

    /// Parse the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_str(&self.body).map_err(|e| Error::serialization(e.to_string()))
    }

    /// The response if it is 2xx, otherwise an HTTP error
    pub fn error_for_status(self, url: &str) -> Result<Self, Error> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::http_status(url, self.status_code, self.body))
        }
    }
}

fn with_token(req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => req.bearer_auth(token),
        None => req,
    }
}

/// Send a request and read the whole body; connection failures are errors,
/// any status is a response.
pub async fn send(req: RequestBuilder, url: &str) -> Result<HttpResponse, Error> {
    let resp = req.send().await.map_err(|e| Error::http(url, e.to_string()))?;
    let status_code = resp.status().as_u16();
    let body = resp.text().await.map_err(|e| Error::http(url, e.to_string()))?;
    debug!(url, status = status_code, "http response");
    Ok(HttpResponse { status_code, body })
}

/// GET with an optional bearer token
pub async fn get(client: &Client, url: &str, token: Option<&str>) -> Result<HttpResponse, Error> {
    send(with_token(client.get(url), token), url).await
}

/// POST a JSON body with an optional bearer token
pub async fn post_json(
    client: &Client,
    url: &str,
    token: Option<&str>,
    body: &serde_json::Value,
) -> Result<HttpResponse, Error> {
    send(with_token(client.post(url), token).json(body), url).await
}

/// GET that retries connection failures and 5xx while a route comes up.
///
/// 2xx and 4xx come back as responses without retrying.
pub async fn http_get_with_retry(
    client: &Client,
    url: &str,
    token: Option<&str>,
) -> Result<HttpResponse, Error> {
    retry_with_backoff(&RetryConfig::route_warmup(), "http_get", || async move {
        let resp = get(client, url, token).await?;
        if resp.is_success() || resp.is_client_error() {
            Ok(resp)
        } else {
            Err(Error::http_status(url, resp.status_code, resp.body))
        }
    })
    .await
}

// =============================================================================
// Endpoints
// =============================================================================

/// Inference over REST: POST a fixed JSON body.
///
/// With `expected_output` set, a 2xx response only counts when its body
/// contains that text, which tells a canary model's answer apart from the
/// previous model's.
#[derive(Debug, Clone)]
pub struct RestInferenceEndpoint {
    client: Client,
    url: String,
    body: serde_json::Value,
    token: Option<String>,
    expected_output: Option<String>,
}

impl RestInferenceEndpoint {
    /// Endpoint posting `body` to `url`
    pub fn new(client: Client, url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            client,
            url: url.into(),
            body,
            token: None,
            expected_output: None,
        }
    }

    /// Send a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Require the response body to contain `expected`
    pub fn expect_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }
}

#[async_trait::async_trait]
impl InferenceEndpoint for RestInferenceEndpoint {
    async fn infer(&self) -> Result<(), Error> {
        let resp = post_json(&self.client, &self.url, self.token.as_deref(), &self.body)
            .await?
            .error_for_status(&self.url)?;

        match &self.expected_output {
            Some(expected) if !resp.body.contains(expected.as_str()) => Err(Error::validation(
                format!("response from {} does not contain {expected:?}", self.url),
            )),
            _ => Ok(()),
        }
    }
}

/// Authorization check: GET (or POST a JSON body) as a given user's token
#[derive(Debug, Clone)]
pub struct BearerAccessEndpoint {
    client: Client,
    url: String,
    token: String,
    body: Option<serde_json::Value>,
}

impl BearerAccessEndpoint {
    /// Endpoint GETting `url` with `token`
    pub fn new(client: Client, url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            token: token.into(),
            body: None,
        }
    }

    /// POST `body` instead, for endpoints that only answer inference requests
    pub fn with_json_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Classify a response for authorization purposes
pub fn access_outcome(resp: &HttpResponse) -> AccessOutcome {
    if resp.is_success() {
        AccessOutcome::Allowed
    } else if resp.is_forbidden() || resp.is_unauthorized() {
        AccessOutcome::Forbidden(resp.status_code)
    } else {
        AccessOutcome::Unavailable(format!("HTTP {}", resp.status_code))
    }
}

#[async_trait::async_trait]
impl AccessEndpoint for BearerAccessEndpoint {
    async fn check(&self) -> AccessOutcome {
        let resp = match &self.body {
            Some(body) => post_json(&self.client, &self.url, Some(&self.token), body).await,
            None => get(&self.client, &self.url, Some(&self.token)).await,
        };
        match resp {
            Ok(resp) => access_outcome(&resp),
            Err(e) => AccessOutcome::Unavailable(e.to_string()),
        }
    }
}

// =============================================================================
// Load generation
// =============================================================================

/// Result of a load burst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadReport {
    /// Requests that succeeded
    pub successes: usize,
    /// Requests that failed
    pub failures: usize,
}

/// Fire `requests` inference calls with at most `concurrency` in flight.
///
/// Used to push an autoscaler over its target; failures are counted rather
/// than returned because an overloaded predictor is the point.
pub async fn run_concurrent_load(
    endpoint: Arc<dyn InferenceEndpoint>,
    requests: usize,
    concurrency: usize,
) -> LoadReport {
    info!(requests, concurrency, "starting inference load");
    let report = stream::iter(0..requests)
        .map(|_| {
            let endpoint = endpoint.clone();
            async move { endpoint.infer().await.is_ok() }
        })
        .buffer_unordered(concurrency.max(1))
        .fold(LoadReport::default(), |mut report, ok| async move {
            if ok {
                report.successes += 1;
            } else {
                report.failures += 1;
            }
            report
        })
        .await;
    info!(successes = report.successes, failures = report.failures, "inference load finished");
    report
}
