//! # HTTP Clients
//!
//! REST implementations of [`MeshControlPlane`] and [`ResourceDirectory`].
//!
//! ## Request Handling
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         HTTP Request Path                               │
//! │                                                                         │
//! │  build request (Bearer token, JSON, per-request timeout)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  send ──► status ──► 2xx        → decode body                          │
//! │              │      404        → NotFound (get association: absent)    │
//! │              │      429        → Throttled   ┐                         │
//! │              │      5xx/timeout→ Unavailable ├─► retry with backoff    │
//! │              │                               ┘   (max_retries)         │
//! │              │                 creates are sent once, never retried    │
//! │              └──── other 4xx   → Rejected                              │
//! │                                                                         │
//! │  Listings page with `nextToken` query parameter / response field.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Endpoints
//! ```text
//! Control plane                         Directory
//! GET    /networks                      GET    /invitations
//! GET    /networks/{id}/tags            POST   /invitations/{id}/accept
//! GET    /associations                  GET    /grants
//! POST   /associations                  POST   /grants
//! GET    /associations/{id}?kind=       DELETE /grants?grantArn=
//! DELETE /associations/{id}?kind=       GET    /resources
//! ```

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use meshstage_core::{
    Association, GrantInvitation, MemberResource, NetworkSummary, ResourceKind, TrustGrant,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::client::{
    AssociationFilter, CreateAssociation, CreateGrantRequest, GrantQuery, MeshControlPlane, Page,
    ResourceDirectory, ResourceQuery,
};
use crate::config::ControlPlaneSettings;
use crate::error::{ClientError, ClientResult, EngineError, EngineResult};

/// Upper bound on a single retry delay.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

type Query = Vec<(&'static str, String)>;

// =============================================================================
// API Client
// =============================================================================

/// JSON-over-HTTP plumbing shared by both clients.
#[derive(Debug, Clone)]
struct ApiClient {
    client: reqwest::Client,
    base_url: Url,
    max_retries: u32,
    initial_backoff: Duration,
}

impl ApiClient {
    fn new(base_url: &str, settings: &ControlPlaneSettings) -> EngineResult<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(EngineError::InvalidConfig(format!(
                "{} cannot be used as an API root",
                base_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &settings.api_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| EngineError::InvalidConfig("API token contains invalid characters".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| EngineError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;

        Ok(ApiClient {
            client,
            base_url,
            max_retries: settings.max_retries,
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
        })
    }

    /// Appends percent-encoded path segments to the API root.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            max_interval: MAX_BACKOFF,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Sends the request built by `build`, retrying throttled and
    /// unavailable responses up to `max_retries` times.
    async fn send<F>(&self, operation: &'static str, build: F) -> ClientResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        self.send_with_retries(operation, self.max_retries, build).await
    }

    /// Sends once; creates are not idempotent.
    async fn send_once<F>(&self, operation: &'static str, build: F) -> ClientResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        self.send_with_retries(operation, 0, build).await
    }

    async fn send_with_retries<F>(&self, operation: &'static str, max_retries: u32, build: F) -> ClientResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut backoff = self.create_backoff();
        let mut retry_count = 0u32;

        loop {
            let result = match build().send().await {
                Ok(response) => check_status(response).await,
                Err(e) => Err(ClientError::from(e)),
            };

            match result {
                Err(e) if e.is_retryable() && retry_count < max_retries => {
                    retry_count += 1;
                    let delay = backoff.next_backoff().unwrap_or(self.initial_backoff);
                    warn!(
                        operation,
                        attempt = retry_count,
                        max_retries,
                        ?delay,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &'static str, url: Url, query: Query) -> ClientResult<T> {
        debug!(operation, %url, "GET");
        let response = self
            .send(operation, || self.client.get(url.clone()).query(&query))
            .await?;
        decode(operation, response).await
    }

    async fn post_json<B, T>(&self, operation: &'static str, url: Url, body: &B) -> ClientResult<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        debug!(operation, %url, "POST");
        let response = self
            .send_once(operation, || self.client.post(url.clone()).json(body))
            .await?;
        decode(operation, response).await
    }

    async fn post_empty(&self, operation: &'static str, url: Url) -> ClientResult<()> {
        debug!(operation, %url, "POST");
        self.send(operation, || self.client.post(url.clone())).await?;
        Ok(())
    }

    async fn delete(&self, operation: &'static str, url: Url, query: Query) -> ClientResult<()> {
        debug!(operation, %url, "DELETE");
        self.send(operation, || self.client.delete(url.clone()).query(&query))
            .await?;
        Ok(())
    }
}

/// Maps non-2xx responses to [`ClientError`].
async fn check_status(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status.to_string()
    } else {
        body
    };

    Err(match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => ClientError::Throttled(message),
        s if s.is_server_error() => ClientError::Unavailable(message),
        s => ClientError::Rejected {
            status: s.as_u16(),
            message,
        },
    })
}

async fn decode<T: DeserializeOwned>(operation: &str, response: Response) -> ClientResult<T> {
    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::Decode(format!("{}: {}", operation, e)))
}

fn with_token(mut query: Query, next_token: Option<String>) -> Query {
    if let Some(token) = next_token {
        query.push(("nextToken", token));
    }
    query
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

// =============================================================================
// Mesh Control Plane
// =============================================================================

/// Control plane client.
#[derive(Debug, Clone)]
pub struct HttpMeshControlPlane {
    api: ApiClient,
}

impl HttpMeshControlPlane {
    pub fn new(settings: &ControlPlaneSettings) -> EngineResult<Self> {
        Ok(HttpMeshControlPlane {
            api: ApiClient::new(&settings.base_url, settings)?,
        })
    }
}

#[async_trait]
impl MeshControlPlane for HttpMeshControlPlane {
    async fn list_networks_page(&self, next_token: Option<String>) -> ClientResult<Page<NetworkSummary>> {
        self.api
            .get_json("list_networks", self.api.url(&["networks"]), with_token(Vec::new(), next_token))
            .await
    }

    async fn network_labels(&self, network: &NetworkSummary) -> ClientResult<BTreeMap<String, String>> {
        let response: TagsResponse = self
            .api
            .get_json("network_labels", self.api.url(&["networks", &network.id, "tags"]), Vec::new())
            .await?;
        Ok(response.tags)
    }

    async fn list_associations_page(
        &self,
        filter: &AssociationFilter,
        next_token: Option<String>,
    ) -> ClientResult<Page<Association>> {
        let mut query: Query = vec![("kind", filter.kind.as_str().to_string())];
        if let Some(resource_id) = &filter.resource_id {
            query.push(("resourceId", resource_id.clone()));
        }
        if let Some(network_id) = &filter.network_id {
            query.push(("networkId", network_id.clone()));
        }

        self.api
            .get_json("list_associations", self.api.url(&["associations"]), with_token(query, next_token))
            .await
    }

    async fn create_association(&self, request: &CreateAssociation) -> ClientResult<Association> {
        self.api
            .post_json("create_association", self.api.url(&["associations"]), request)
            .await
    }

    async fn delete_association(&self, kind: ResourceKind, association_id: &str) -> ClientResult<()> {
        self.api
            .delete(
                "delete_association",
                self.api.url(&["associations", association_id]),
                vec![("kind", kind.as_str().to_string())],
            )
            .await
    }

    async fn get_association(&self, kind: ResourceKind, association_id: &str) -> ClientResult<Option<Association>> {
        let result: ClientResult<Association> = self
            .api
            .get_json(
                "get_association",
                self.api.url(&["associations", association_id]),
                vec![("kind", kind.as_str().to_string())],
            )
            .await;

        match result {
            Ok(association) => Ok(Some(association)),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Resource Directory
// =============================================================================

/// Directory client.
#[derive(Debug, Clone)]
pub struct HttpResourceDirectory {
    api: ApiClient,
}

impl HttpResourceDirectory {
    pub fn new(settings: &ControlPlaneSettings) -> EngineResult<Self> {
        Ok(HttpResourceDirectory {
            api: ApiClient::new(&settings.directory_url, settings)?,
        })
    }
}

#[async_trait]
impl ResourceDirectory for HttpResourceDirectory {
    async fn list_invitations_page(&self, next_token: Option<String>) -> ClientResult<Page<GrantInvitation>> {
        self.api
            .get_json("list_invitations", self.api.url(&["invitations"]), with_token(Vec::new(), next_token))
            .await
    }

    async fn accept_invitation(&self, invitation_id: &str) -> ClientResult<()> {
        self.api
            .post_empty("accept_invitation", self.api.url(&["invitations", invitation_id, "accept"]))
            .await
    }

    async fn list_grants_page(&self, query: &GrantQuery, next_token: Option<String>) -> ClientResult<Page<TrustGrant>> {
        let mut params: Query = vec![("owner", query.owner.as_str().to_string())];
        if let Some(status) = query.status {
            params.push(("status", status.as_str().to_string()));
        }
        if let Some((key, value)) = &query.tag {
            params.push(("tagKey", key.clone()));
            params.push(("tagValue", value.clone()));
        }

        self.api
            .get_json("list_grants", self.api.url(&["grants"]), with_token(params, next_token))
            .await
    }

    async fn list_resources_page(
        &self,
        query: &ResourceQuery,
        next_token: Option<String>,
    ) -> ClientResult<Page<MemberResource>> {
        let mut params: Query = vec![("owner", query.owner.as_str().to_string())];
        params.extend(query.grant_arns.iter().map(|arn| ("grantArn", arn.clone())));
        if let Some(kind) = query.kind {
            params.push(("kind", kind.as_str().to_string()));
        }

        self.api
            .get_json("list_resources", self.api.url(&["resources"]), with_token(params, next_token))
            .await
    }

    async fn create_grant(&self, request: &CreateGrantRequest) -> ClientResult<TrustGrant> {
        self.api
            .post_json("create_grant", self.api.url(&["grants"]), request)
            .await
    }

    async fn delete_grant(&self, grant_arn: &str) -> ClientResult<()> {
        self.api
            .delete(
                "delete_grant",
                self.api.url(&["grants"]),
                vec![("grantArn", grant_arn.to_string())],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base: &str) -> ControlPlaneSettings {
        ControlPlaneSettings {
            base_url: base.to_string(),
            ..ControlPlaneSettings::default()
        }
    }

    #[test]
    fn test_url_joins_segments() {
        let api = ApiClient::new("https://mesh.internal/api/v1/", &settings("unused")).unwrap();
        assert_eq!(
            api.url(&["associations", "a/1"]).as_str(),
            "https://mesh.internal/api/v1/associations/a%2F1"
        );

        let api = ApiClient::new("https://mesh.internal/api/v1", &settings("unused")).unwrap();
        assert_eq!(
            api.url(&["networks"]).as_str(),
            "https://mesh.internal/api/v1/networks"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(HttpMeshControlPlane::new(&settings("not a url")).is_err());
        assert!(HttpMeshControlPlane::new(&settings("mailto:ops@example.com")).is_err());
    }

    #[test]
    fn test_backoff_shape() {
        let api = ApiClient::new("http://127.0.0.1:1/api", &settings("unused")).unwrap();
        let backoff = api.create_backoff();
        assert_eq!(backoff.initial_interval, Duration::from_millis(200));
        assert_eq!(backoff.max_elapsed_time, None);
    }
}
