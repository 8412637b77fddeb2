//! Pairing code claim over HTTP.

use async_trait::async_trait;
use desktop_agent_core::{Credential, DeviceProfile, PairingCode, PairingError, PairingService};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::EndpointError;

/// Path of the claim endpoint, relative to the API base.
pub const CLAIM_PATH: &str = "v1/desktop-agent/pair";

#[derive(Debug, Serialize)]
struct ClaimRequest<'a> {
    code: &'a str,
    device_name: &'a str,
    platform: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClaimResponse {
    device_token: String,
}

#[derive(Debug, Default, Deserialize)]
struct ClaimFailure {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Claims pairing codes against the service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpPairingService {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpPairingService {
    /// Create a service rooted at `api_base` (e.g. `https://api.example.com`).
    ///
    /// # Errors
    /// Returns an error if the base URL is invalid.
    pub fn new(api_base: &Url) -> Result<Self, EndpointError> {
        let mut base = api_base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join(CLAIM_PATH)
            .map_err(|e| EndpointError::InvalidUrl(e.to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl PairingService for HttpPairingService {
    async fn claim(
        &self,
        code: &PairingCode,
        device: &DeviceProfile,
    ) -> Result<Credential, PairingError> {
        let body = ClaimRequest {
            code: code.as_str(),
            device_name: &device.name,
            platform: &device.platform,
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| PairingError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PairingError::Network(e.to_string()))?;
        interpret_claim(status.as_u16(), &text)
    }
}

/// Turn a claim response into a credential or a uniform rejection.
///
/// # Errors
/// [`PairingError::Rejected`] for any non-success status (carrying the
/// service's reason when it sent one) or a success body without a token.
pub fn interpret_claim(status: u16, body: &str) -> Result<Credential, PairingError> {
    if (200..300).contains(&status) {
        let parsed: ClaimResponse = serde_json::from_str(body)
            .map_err(|e| PairingError::Rejected(format!("malformed response: {e}")))?;
        if parsed.device_token.trim().is_empty() {
            return Err(PairingError::Rejected("empty device token".into()));
        }
        return Ok(Credential::device(parsed.device_token));
    }

    let failure: ClaimFailure = serde_json::from_str(body).unwrap_or_default();
    let reason = failure
        .detail
        .or(failure.error)
        .unwrap_or_else(|| format!("HTTP {status}"));
    Err(PairingError::Rejected(reason))
}
