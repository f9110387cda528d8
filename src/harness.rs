// Harness backend: a cookie/CSRF protected endpoint used to exercise the
// relay without a scale. The header reconstruction below matches that one
// backend (XSRF-TOKEN cookie + named session cookie) and is not meant as a
// general CSRF client.

use crate::api::{json_headers, ApiReply, WeightPayload};
use crate::error::{Error, Result};
use crate::upload::Uploader;
use reqwest::blocking::Client;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderName, HeaderValue, COOKIE};
use reqwest::Url;
use std::sync::Arc;
use tracing::{debug, error, info};

pub const CSRF_COOKIE: &str = "XSRF-TOKEN";
const CSRF_HEADER: &str = "x-xsrf-token";

/// Client that keeps the backend's cookies between calls.
pub struct CsrfClient {
    client: Client,
    jar: Arc<Jar>,
    base_url: String,
    session_cookie: String,
}

impl CsrfClient {
    pub fn new(base_url: &str, session_cookie: &str) -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(crate::api::REQUEST_TIMEOUT)
            .build()?;
        Ok(CsrfClient {
            client,
            jar,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_cookie: session_cookie.to_string(),
        })
    }

    /// Value of a cookie the jar would send to the API.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let url = Url::parse(&self.base_url).ok()?;
        let header = self.jar.cookies(&url)?;
        let header = header.to_str().ok()?;
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }

    /// Fetch the CSRF cookie unless the jar already holds one.
    pub fn ensure_csrf(&self) -> Result<()> {
        if self.cookie(CSRF_COOKIE).is_some() {
            return Ok(());
        }
        let url = format!("{}/csrf-token", self.base_url);
        let res = self.client.get(&url).send()?;
        info!("GET /csrf-token status: {}", res.status().as_u16());
        debug!(
            "Cookies after GET: {:?}",
            Url::parse(&self.base_url)
                .ok()
                .and_then(|u| self.jar.cookies(&u))
        );
        Ok(())
    }

    /// POST a weight with the CSRF header and the rebuilt `Cookie` header.
    pub fn post_weight(&self, weight: f64) -> Result<ApiReply> {
        self.ensure_csrf()?;

        let csrf = self.cookie(CSRF_COOKIE);
        let session = self.cookie(&self.session_cookie);
        let (Some(csrf), Some(session)) = (csrf, session) else {
            return Err(Error::Csrf(format!(
                "missing {} or {} cookie",
                CSRF_COOKIE, self.session_cookie
            )));
        };
        let csrf = urlencoding::decode(&csrf)
            .map_err(|e| Error::Csrf(format!("undecodable CSRF token: {}", e)))?
            .into_owned();

        let mut headers = json_headers();
        headers.insert(
            HeaderName::from_static(CSRF_HEADER),
            HeaderValue::from_str(&csrf)?,
        );
        headers.insert(COOKIE, cookie_header(&csrf, &self.session_cookie, &session)?);

        let url = format!("{}/weight", self.base_url);
        let res = self
            .client
            .post(&url)
            .headers(headers)
            .json(&WeightPayload { weight_kg: weight })
            .send()?;
        let status = res.status();
        let body = res.text()?;
        Ok(ApiReply { status, body })
    }
}

fn cookie_header(csrf: &str, session_name: &str, session: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!(
        "{}={}; {}={}",
        CSRF_COOKIE, csrf, session_name, session
    ))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Uploader over [`CsrfClient`]; logs what the backend answers.
pub struct CsrfUploader {
    client: CsrfClient,
}

impl CsrfUploader {
    pub fn new(client: CsrfClient) -> Self {
        CsrfUploader { client }
    }
}

impl Uploader for CsrfUploader {
    fn upload(&mut self, weight: f64) {
        match self.client.post_weight(weight) {
            Ok(reply) => info!("POST status: {} response: {}", reply.status.as_u16(), reply.body.trim()),
            Err(Error::Csrf(reason)) => error!("Missing CSRF token or session cookie: {}", reason),
            Err(e) => error!("Error while sending to the API: {}", e),
        }
    }
}

