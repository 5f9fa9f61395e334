//! HTTP client for the cluster API

use super::{ClusterResource, ClusterSource};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default request timeout for a single listing
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while polling the cluster API
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid cluster API endpoint {endpoint:?}: {source}")]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        source: reqwest::Error,
    },
    #[error("call to {url} returned {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },
}

/// Connection settings for the cluster API
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL, e.g. `https://kubernetes.default.svc`
    pub endpoint: String,
    /// Verify TLS certificates of the API server
    pub verify_tls: bool,
    /// Bearer token sent with every request
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8001".to_string(),
            verify_tls: true,
            token: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Read-only client for the cluster and metrics APIs
pub struct K8sApiClient {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl K8sApiClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        Url::parse(&config.endpoint).map_err(|source| ClientError::InvalidEndpoint {
            endpoint: config.endpoint.clone(),
            source,
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    /// Full URL of a resource listing
    pub fn url_for(&self, resource: ClusterResource) -> String {
        format!("{}{}", self.endpoint, resource.path())
    }
}

#[async_trait]
impl ClusterSource for K8sApiClient {
    async fn fetch(&self, resource: ClusterResource) -> Result<String, ClientError> {
        let url = self.url_for(resource);

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|source| ClientError::Request {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status { url, status, body });
        }

        response
            .text()
            .await
            .map_err(|source| ClientError::Request { url, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(server: &mockito::ServerGuard, token: Option<&str>) -> K8sApiClient {
        K8sApiClient::new(ClientConfig {
            endpoint: server.url(),
            token: token.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = K8sApiClient::new(ClientConfig {
            endpoint: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ClientError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_url_keeps_endpoint_path_prefix() {
        let client = K8sApiClient::new(ClientConfig {
            endpoint: "https://rancher.local/k8s/clusters/c-1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            client.url_for(ClusterResource::PodMetrics),
            "https://rancher.local/k8s/clusters/c-1/apis/metrics.k8s.io/v1beta1/pods"
        );
    }

    #[tokio::test]
    async fn test_fetch_sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/namespaces")
            .match_header("authorization", "Bearer secret-token")
            .with_status(200)
            .with_body(r#"{"items": []}"#)
            .create_async()
            .await;

        let client = client_for(&server, Some("secret-token"));
        let body = client.fetch(ClusterResource::Namespaces).await.unwrap();

        assert_eq!(body, r#"{"items": []}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_non_ok_status_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/apis/metrics.k8s.io/v1beta1/nodes")
            .with_status(503)
            .with_body("metrics unavailable")
            .create_async()
            .await;

        let client = client_for(&server, None);
        let err = client.fetch(ClusterResource::NodeMetrics).await.unwrap_err();

        match err {
            ClientError::Status { status, body, .. } => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(body, "metrics unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
