//! HTTP provider for a deployment gateway.
//!
//! Units are sent as JSON to a gateway that owns the cloud credentials:
//!
//! - `POST {endpoint}/units/{region}/{unit}/apply`
//! - `POST {endpoint}/units/{region}/{unit}/rollback`
//! - `DELETE {endpoint}/units/{region}/{unit}`

use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::ResourceDescriptor;
use crate::error::{ProviderError, Result, StrataError};
use crate::planner::DeploymentUnit;
use crate::state::{ProviderHandle, UnitKey};

use super::{ProviderResult, ResourceProvider};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Gateway-backed resource provider.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Gateway base URL, without trailing slash.
    endpoint: String,
    /// Optional bearer token.
    token: Option<String>,
}

/// Body of an apply or rollback request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnitRequest<'a> {
    unit_id: &'a str,
    region: &'a str,
    account: &'a str,
    resources: &'a [ResourceDescriptor],
}

/// Body of a successful apply response.
#[derive(Debug, Deserialize)]
struct ApplyResponse {
    reference: String,
    #[serde(default)]
    outputs: BTreeMap<String, String>,
}

impl HttpProvider {
    /// Creates a new provider for the given gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, timeout_secs: u64, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| StrataError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Returns the URL of a unit resource.
    fn unit_url(&self, key: &UnitKey) -> String {
        format!("{}/units/{}/{}", self.endpoint, key.region, key.unit_id)
    }

    /// Attaches the bearer token when one is configured.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {token}")),
            None => request,
        }
    }

    /// Sends a unit body to one of the unit endpoints.
    async fn post_unit(&self, unit: &DeploymentUnit, action: &str) -> ProviderResult<Response> {
        let url = format!("{}/{action}", self.unit_url(&unit.key()));
        trace!("POST {url}");

        let body = UnitRequest {
            unit_id: &unit.id,
            region: &unit.region,
            account: &unit.account,
            resources: &unit.descriptors,
        };

        self.authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("Request to {url} failed: {e}")))
    }
}

/// Maps a non-success status to a provider error.
///
/// Timeouts, throttling and server errors are worth retrying; any other
/// client error means the request itself is wrong.
fn classify(status: StatusCode, body: &str) -> ProviderError {
    let message = if body.is_empty() {
        format!("gateway returned {status}")
    } else {
        format!("gateway returned {status}: {body}")
    };

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        ProviderError::transient(message)
    } else {
        ProviderError::permanent(message)
    }
}

async fn expect_success(response: Response, allow_not_found: bool) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() || (allow_not_found && status == StatusCode::NOT_FOUND) {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify(status, &body))
}

#[async_trait]
impl ResourceProvider for HttpProvider {
    async fn apply(&self, unit: &DeploymentUnit) -> ProviderResult<ProviderHandle> {
        debug!("Applying unit {} through gateway", unit.key());

        let response = expect_success(self.post_unit(unit, "apply").await?, false).await?;
        let parsed: ApplyResponse = response.json().await.map_err(|e| {
            ProviderError::permanent(format!("Invalid apply response for {}: {e}", unit.id))
        })?;

        Ok(ProviderHandle {
            reference: parsed.reference,
            outputs: parsed.outputs,
        })
    }

    async fn rollback(&self, unit: &DeploymentUnit) -> ProviderResult<()> {
        debug!("Rolling back unit {} through gateway", unit.key());
        expect_success(self.post_unit(unit, "rollback").await?, true).await?;
        Ok(())
    }

    async fn decommission(&self, key: &UnitKey) -> ProviderResult<()> {
        let url = self.unit_url(key);
        debug!("DELETE {url}");

        let response = self
            .authorize(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| ProviderError::transient(format!("Request to {url} failed: {e}")))?;

        expect_success(response, true).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
