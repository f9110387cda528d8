// API client module: a small blocking HTTP client that talks to the weight
// backend. One reqwest client is built at startup and reused for the login
// call and every upload, so connections stay pooled for the process lifetime.

use crate::config::ApiSettings;
use crate::error::{Error, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-request timeout for login and upload calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking API client holding the reqwest client and the base URL of the
/// backend (e.g. `http://192.168.1.165/api`).
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

/// Login request payload.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AuthRequest {
    pub email: String,
    pub password: String,
}

impl From<&ApiSettings> for AuthRequest {
    fn from(settings: &ApiSettings) -> Self {
        AuthRequest {
            email: settings.email.clone(),
            password: settings.password.clone(),
        }
    }
}

/// Login response. Only the token matters; the backend may send more.
#[derive(Deserialize, Debug)]
pub struct AuthResponse {
    pub token: Option<String>,
}

/// Upload payload for `/weight`.
#[derive(Serialize, Debug)]
pub struct WeightPayload {
    pub weight_kg: f64,
}

/// Status and body of an answered request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: StatusCode,
    pub body: String,
}

impl ApiClient {
    /// Create an ApiClient for the configured backend URL.
    pub fn new(settings: &ApiSettings) -> Result<Self> {
        Self::with_base_url(&settings.url)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(json_headers())
            .build()?;
        Ok(ApiClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Perform one login attempt and return the token. A non-200 answer
    /// and a 200 answer without a usable token are both errors.
    pub fn login(&self, req: &AuthRequest) -> Result<String> {
        let url = format!("{}/auth/login", &self.base_url);
        let res = self.client.post(&url).json(req).send()?;
        let status = res.status();
        tracing::info!("API answered: {}", status.as_u16());

        if status != StatusCode::OK {
            let body = res.text().unwrap_or_default();
            return Err(Error::Status { status, body });
        }

        let resp: AuthResponse = res.json()?;
        match resp.token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(Error::MissingToken),
        }
    }

    /// Send a weight with the bearer token. Any HTTP answer is returned as
    /// an [`ApiReply`]; only transport failures are errors.
    pub fn put_weight(&self, token: &str, weight: f64) -> Result<ApiReply> {
        let url = format!("{}/weight", &self.base_url);
        let res = self
            .client
            .put(&url)
            .headers(bearer_headers(token)?)
            .json(&WeightPayload { weight_kg: weight })
            .send()?;
        let status = res.status();
        let body = res.text()?;
        Ok(ApiReply { status, body })
    }
}

/// `Content-Type` and `Accept` headers every backend call carries.
pub(crate) fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers
}

fn bearer_headers(token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}
