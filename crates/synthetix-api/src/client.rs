// REST client for the Synthetix hub.
//
// Wraps `reqwest::Client` with hub-specific URL construction, bearer
// auth, and response decoding. One client is built per session; the
// credential is fixed for the client's lifetime.

use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;
use crate::types::{CommandRequest, DeviceRecord};

/// HTTP client for the hub's device endpoints.
///
/// The bearer credential is attached to every request. Create a fresh
/// client when the session changes — credentials are not mutable.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: SecretString,
}

impl ApiClient {
    /// Create a client from a `TransportConfig` and a session credential.
    ///
    /// `base_url` is the API root, e.g. `https://hub.example.com/api`.
    pub fn new(
        base_url: Url,
        token: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, token: SecretString) -> Self {
        Self {
            http,
            base_url,
            token,
        }
    }

    /// The API base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL under the API root: `{base}/{path}`.
    fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Fetch the complete device list for the session, in hub order.
    pub async fn list_devices(&self) -> Result<Vec<DeviceRecord>, Error> {
        let url = self.api_url("devices")?;
        debug!(%url, "GET devices");

        let resp = self
            .http
            .get(url)
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;

        let resp = Self::check_status(resp).await?;
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    /// Submit a command to a single device.
    ///
    /// On success the hub replies with the updated device record, which
    /// carries the authoritative post-command state. Older hub builds
    /// reply with an empty body — that is not an error.
    pub async fn send_command(
        &self,
        device_id: &str,
        request: &CommandRequest,
    ) -> Result<Option<DeviceRecord>, Error> {
        let url = self.api_url(&format!("devices/{device_id}/command"))?;
        debug!(%url, command = %request.command, "POST command");

        let resp = self
            .http
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .json(request)
            .send()
            .await?;

        let resp = Self::check_status(resp).await?;
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            })
    }

    // ── Response handling ────────────────────────────────────────────

    /// Map non-success statuses into the crate error taxonomy.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = resp.text().await.unwrap_or_default();
        Err(Error::from_status(status.as_u16(), message))
    }
}
