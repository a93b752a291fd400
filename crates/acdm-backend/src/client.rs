//! vACDM backend HTTP client.

use acdm_core::models::Pilot;
use acdm_core::PilotUpdate;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::RwLock;
use std::time::Duration;

use crate::wire::{self, ApiCheck, BackendWrite};

pub const DEFAULT_SERVER_URL: &str = "https://app.vacdm.net";

/// Timeout for reads and deletes; the update cycle must not stall on them.
const READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of validating the stored bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Valid,
    Expired,
    /// Backend could not be reached
    Inaccessible,
    NotFound,
}

/// Handshake data for the browser based token flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStart {
    pub redirect_url: String,
    pub polling_url: String,
    pub polling_secret: String,
}

/// HTTP client for the vACDM backend.
///
/// The server address and token can be swapped while the client is shared.
pub struct BackendClient {
    client: Client,
    base_url: RwLock<String>,
    auth_token: RwLock<Option<String>>,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: RwLock::new(normalize_url(base_url.into())),
            auth_token: RwLock::new(clean_token(token)),
        }
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .read()
            .map(|url| url.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn set_base_url(&self, url: impl Into<String>) {
        let url = normalize_url(url.into());
        match self.base_url.write() {
            Ok(mut current) => *current = url,
            Err(poisoned) => *poisoned.into_inner() = url,
        }
    }

    pub fn auth_token(&self) -> Option<String> {
        self.auth_token
            .read()
            .map(|token| token.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Update the bearer token at runtime (fresh login, logout).
    pub fn set_auth_token(&self, token: Option<String>) {
        let token = clean_token(token);
        match self.auth_token.write() {
            Ok(mut current) => *current = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json(&self, path: &str, query: &[(&str, &str)], what: &str) -> Result<Value> {
        let response = self
            .authorize(self.client.get(self.url(path)))
            .query(query)
            .timeout(READ_TIMEOUT)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} request failed: {} {}", what, status, body));
        }

        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read {} response", what))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).with_context(|| format!("Failed to parse {} response", what))
    }

    async fn write_json(&self, request: RequestBuilder, body: &Value, what: &str) -> Result<()> {
        let response = self
            .authorize(request)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to send {}", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} failed: {} {}", what, status, body));
        }
        Ok(())
    }

    /// Compare the backend version with the client's major version.
    pub async fn check_web_api(&self, plugin_major: i64) -> Result<ApiCheck> {
        let response = self
            .read_json(wire::CONFIG_PATH, &[], "backend configuration")
            .await?;
        Ok(ApiCheck::evaluate(&response, plugin_major))
    }

    /// Fetch all backend pilots departing one of the given airports.
    pub async fn fetch_pilots(&self, airports: &[String]) -> Result<Vec<Pilot>> {
        let query: Vec<(&str, &str)> = airports
            .iter()
            .map(|airport| ("adep", airport.as_str()))
            .collect();
        let path = format!("{}/", wire::PILOTS_PATH);
        let response = self.read_json(&path, &query, "pilots").await?;
        wire::parse_pilots(&response, Utc::now())
    }

    pub async fn post_initial_pilot(&self, pilot: &Pilot) -> Result<()> {
        let body = wire::initial_pilot_body(pilot);
        self.write_json(
            self.client.post(self.url(wire::PILOTS_PATH)),
            &body,
            "Initial pilot data",
        )
        .await
    }

    pub async fn patch_pilot(&self, callsign: &str, body: &Value) -> Result<()> {
        self.write_json(
            self.client.patch(self.url(&wire::pilot_path(callsign))),
            body,
            "Pilot update",
        )
        .await
    }

    pub async fn delete_pilot(&self, callsign: &str) -> Result<()> {
        let response = self
            .authorize(self.client.delete(self.url(&wire::pilot_path(callsign))))
            .timeout(READ_TIMEOUT)
            .send()
            .await
            .context("Failed to delete pilot")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Pilot delete failed: {} {}", status, body));
        }
        Ok(())
    }

    /// Forward one queued update, using `pilot` as the consolidated record.
    pub async fn send_update(&self, pilot: &Pilot, update: &PilotUpdate) -> Result<()> {
        match wire::backend_write(pilot, update) {
            BackendWrite::Patch { path, body } => {
                self.write_json(self.client.patch(self.url(&path)), &body, "Pilot update")
                    .await
            }
            BackendWrite::Message { message, body } => {
                self.write_json(
                    self.client.patch(self.url(&message.path())),
                    &body,
                    "DPI message",
                )
                .await
            }
            BackendWrite::Delete { .. } => self.delete_pilot(&pilot.callsign).await,
        }
    }

    /// Check whether the stored token is still accepted.
    pub async fn validate_token(&self) -> TokenState {
        let Some(token) = self.auth_token() else {
            return TokenState::NotFound;
        };

        let result = self
            .client
            .get(self.url(wire::PROFILE_PATH))
            .bearer_auth(token)
            .timeout(READ_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) if response.status() == StatusCode::OK => TokenState::Valid,
            Ok(_) => TokenState::Expired,
            Err(err) => {
                tracing::debug!("Token validation request failed: {}", err);
                TokenState::Inaccessible
            }
        }
    }

    /// Begin the browser login; the operator opens `redirect_url`.
    pub async fn start_auth(&self) -> Result<AuthStart> {
        let response = self
            .client
            .post(self.url(wire::TOKEN_START_PATH))
            .json(&json!({}))
            .send()
            .await
            .context("Failed to start authentication")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Authentication start failed: {} {}", status, body));
        }

        let payload = response
            .json::<Value>()
            .await
            .context("Failed to parse authentication start response")?;
        parse_auth_start(&payload)
    }

    /// Poll once for the token; `None` while the login is not finished.
    pub async fn poll_auth(&self, start: &AuthStart) -> Result<Option<String>> {
        let response = self
            .client
            .post(&start.polling_url)
            .json(&json!({ "secret": start.polling_secret }))
            .send()
            .await
            .context("Failed to poll authentication")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Authentication poll failed: {} {}", status, body));
        }

        let payload = response
            .json::<Value>()
            .await
            .context("Failed to parse authentication poll response")?;
        if !payload.get("ready").and_then(Value::as_bool).unwrap_or(false) {
            return Ok(None);
        }
        let token = payload
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| anyhow!("Authentication poll missing token"))?;
        Ok(Some(token.to_string()))
    }
}

fn parse_auth_start(payload: &Value) -> Result<AuthStart> {
    let field = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Authentication start response missing {}", key))
    };
    Ok(AuthStart {
        redirect_url: field("userRedirectUrl")?,
        polling_url: field("pollingUrl")?,
        polling_secret: field("pollingSecret")?,
    })
}

fn normalize_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn clean_token(token: Option<String>) -> Option<String> {
    token
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Query,
        http::{HeaderMap, StatusCode as HttpStatus},
        routing::{get, post},
        Json, Router,
    };
    use std::collections::HashMap;

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route(
                "/api/v1/config/plugin",
                get(|| async {
                    Json(json!({
                        "version": { "version": "3.0.1", "major": 3, "minor": 0, "patch": 1 },
                        "config": { "serverName": "test", "allowSimSession": false, "allowObsMaster": true },
                        "supportedAirports": ["LOWW"],
                    }))
                }),
            )
            .route(
                "/api/v1/pilots/",
                get(|Query(query): Query<HashMap<String, String>>| async move {
                    let adep = query.get("adep").cloned().unwrap_or_default();
                    Json(json!({
                        "pilots": [{
                            "callsign": "AUA101",
                            "flightplan": { "adep": adep, "ades": "EDDF" },
                            "vacdm": { "exot": 7 },
                        }]
                    }))
                }),
            )
            .route(
                "/api/auth/profile",
                get(|headers: HeaderMap| async move {
                    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                        Some("Bearer good") => HttpStatus::OK,
                        _ => HttpStatus::UNAUTHORIZED,
                    }
                }),
            )
            .route(
                "/api/plugin-token/start",
                post(|| async { Json(json!({ "userRedirectUrl": "https://login" })) }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn checks_api_and_fetches_pilots() {
        let url = spawn_backend().await;
        let client = BackendClient::new(url, None);

        let check = client.check_web_api(3).await.unwrap();
        assert!(check.is_valid());
        assert_eq!(
            client.check_web_api(2).await.unwrap(),
            ApiCheck::Incompatible { required: 3 }
        );

        let pilots = client.fetch_pilots(&["LOWW".to_string()]).await.unwrap();
        assert_eq!(pilots.len(), 1);
        assert_eq!(pilots[0].origin, "LOWW");
        assert_eq!(pilots[0].exot, Some(7));
    }

    #[tokio::test]
    async fn validates_tokens() {
        let url = spawn_backend().await;
        let client = BackendClient::new(url, None);
        assert_eq!(client.validate_token().await, TokenState::NotFound);

        client.set_auth_token(Some("good".to_string()));
        assert_eq!(client.validate_token().await, TokenState::Valid);

        client.set_auth_token(Some("stale".to_string()));
        assert_eq!(client.validate_token().await, TokenState::Expired);

        client.set_base_url("http://127.0.0.1:1");
        assert_eq!(client.validate_token().await, TokenState::Inaccessible);
    }

    #[tokio::test]
    async fn auth_start_requires_polling_fields() {
        let url = spawn_backend().await;
        let client = BackendClient::new(url, None);
        let err = client.start_auth().await.unwrap_err();
        assert!(err.to_string().contains("pollingUrl"));
    }

    #[test]
    fn normalizes_base_url() {
        let client = BackendClient::new(" https://app.vacdm.net/ ", Some("  ".to_string()));
        assert_eq!(client.base_url(), DEFAULT_SERVER_URL);
        assert!(client.auth_token().is_none());
    }
}
