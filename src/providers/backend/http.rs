//! JSON-over-HTTP backend client.
//!
//! Responses are accepted bare or wrapped in the envelope the capsule API
//! uses (`{"success": true, "email": {...}}`, `{"emails": [...]}` and so on).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use super::traits::{BackendError, BackendResult, CapsuleBackend};
use crate::config::BackendSettings;
use crate::domain::{Capsule, CapsuleId, Email, EmailId, FlagPatch, Session};
use crate::error::RecordKind;

/// Default base URL for a locally running capsule API.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

#[derive(Debug, Serialize)]
struct ProcessRequest {
    max_emails: usize,
}

/// HTTP client for the capsule API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpBackend {
    /// Creates a client for the API rooted at `base_url`.
    pub fn new(base_url: &str) -> BackendResult<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(format!(
                "{} cannot be used as a base URL",
                base_url
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    /// Creates a client from settings, applying the request timeout.
    pub fn from_settings(settings: &BackendSettings) -> BackendResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        Ok(Self::new(&settings.base_url)?.with_client(client))
    }

    /// Overrides the HTTP client (useful for custom timeouts or proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// The API root.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds `{base}/{segments...}`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn build_headers(&self, session: &Session) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(token) = session.token() {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }

    /// Sends a request and returns the parsed body (`Null` for empty bodies).
    ///
    /// `record` names what a 404 refers to.
    async fn send(
        &self,
        request: RequestBuilder,
        session: &Session,
        record: Option<(RecordKind, &str)>,
    ) -> BackendResult<Value> {
        let response = request.headers(self.build_headers(session)).send().await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response, record).await);
        }

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&body)
            .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }

    async fn handle_error_response(
        response: reqwest::Response,
        record: Option<(RecordKind, &str)>,
    ) -> BackendError {
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            if let Some((kind, id)) = record {
                return BackendError::NotFound {
                    kind,
                    id: id.to_string(),
                };
            }
        }

        let message = match response.json::<Value>().await {
            Ok(body) => envelope_message(&body).unwrap_or_else(|| format!("HTTP {}", status)),
            Err(_) => format!("HTTP {}", status),
        };

        BackendError::ApiError {
            status: status.as_u16(),
            message,
        }
    }
}

/// Error text from an envelope, if it carries one.
fn envelope_message(body: &Value) -> Option<String> {
    body.get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Strips the response envelope, returning the payload stored under `key`.
///
/// Bodies without an envelope are returned as they are. An envelope with
/// `"success": false` is an error even when the status was 2xx.
fn unwrap_envelope(body: Value, key: &str) -> BackendResult<Value> {
    match body {
        Value::Object(mut map) => {
            if map.get("success") == Some(&Value::Bool(false)) {
                let message = envelope_message(&Value::Object(map.clone()))
                    .unwrap_or_else(|| "request failed".to_string());
                return Err(BackendError::Rejected(message));
            }
            match map.remove(key) {
                Some(payload) => Ok(payload),
                None => Ok(Value::Object(map)),
            }
        }
        other => Ok(other),
    }
}

fn decode<T: DeserializeOwned>(body: Value, key: &str) -> BackendResult<T> {
    let payload = unwrap_envelope(body, key)?;
    serde_json::from_value(payload)
        .map_err(|e| BackendError::InvalidResponse(format!("Failed to parse {}: {}", key, e)))
}

#[async_trait]
impl CapsuleBackend for HttpBackend {
    async fn list_emails(&self, session: &Session) -> BackendResult<Vec<Email>> {
        let url = self.endpoint(&["emails"])?;
        let body = self.send(self.client.get(url), session, None).await?;
        decode(body, "emails")
    }

    async fn get_email(&self, session: &Session, id: &EmailId) -> BackendResult<Email> {
        let url = self.endpoint(&["emails", &id.0])?;
        let body = self
            .send(self.client.get(url), session, Some((RecordKind::Email, &id.0)))
            .await?;
        decode(body, "email")
    }

    async fn update_email(
        &self,
        session: &Session,
        id: &EmailId,
        patch: &FlagPatch,
    ) -> BackendResult<Email> {
        let url = self.endpoint(&["emails", &id.0])?;
        let body = self
            .send(
                self.client.put(url).json(patch),
                session,
                Some((RecordKind::Email, &id.0)),
            )
            .await?;
        decode(body, "email")
    }

    async fn process_emails(&self, session: &Session, max_emails: usize) -> BackendResult<usize> {
        let url = self.endpoint(&["emails", "process"])?;
        let body = self
            .send(
                self.client.post(url).json(&ProcessRequest { max_emails }),
                session,
                None,
            )
            .await?;
        decode(body, "processed_emails")
    }

    async fn list_capsules(&self, session: &Session) -> BackendResult<Vec<Capsule>> {
        let url = self.endpoint(&["capsules"])?;
        let body = self.send(self.client.get(url), session, None).await?;
        decode(body, "capsules")
    }

    async fn get_capsule(&self, session: &Session, id: &CapsuleId) -> BackendResult<Capsule> {
        let url = self.endpoint(&["capsules", &id.0])?;
        let body = self
            .send(
                self.client.get(url),
                session,
                Some((RecordKind::Capsule, &id.0)),
            )
            .await?;
        decode(body, "capsule")
    }

    async fn create_capsule(
        &self,
        session: &Session,
        capsule: &Capsule,
    ) -> BackendResult<Capsule> {
        let url = self.endpoint(&["capsules"])?;
        let body = self
            .send(self.client.post(url).json(capsule), session, None)
            .await?;
        decode(body, "capsule")
    }

    async fn update_capsule(
        &self,
        session: &Session,
        capsule: &Capsule,
    ) -> BackendResult<Capsule> {
        let url = self.endpoint(&["capsules", &capsule.id.0])?;
        let body = self
            .send(
                self.client.put(url).json(capsule),
                session,
                Some((RecordKind::Capsule, &capsule.id.0)),
            )
            .await?;
        decode(body, "capsule")
    }

    async fn delete_capsule(&self, session: &Session, id: &CapsuleId) -> BackendResult<()> {
        let url = self.endpoint(&["capsules", &id.0])?;
        self.send(
            self.client.delete(url),
            session,
            Some((RecordKind::Capsule, &id.0)),
        )
        .await?;
        Ok(())
    }
}
