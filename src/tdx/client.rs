//! OAuth-authenticated TDX REST client with retries and client-side pacing.

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::rate_limit::clamped_secs;
use super::RateLimiter;
use crate::config::TdxConfig;

pub const CLIENT_ID_ENV: &str = "TDX_CLIENT_ID";
pub const CLIENT_SECRET_ENV: &str = "TDX_CLIENT_SECRET";
const USER_AGENT: &str = concat!("metrobikeatlas/", env!("CARGO_PKG_VERSION"));
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);
const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(86_400);
/// Upper bound for any single retry sleep
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum TdxError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited by TDX (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<f64> },

    #[error("TDX request failed with status {status}: {body}")]
    Request { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response shape: {0}")]
    Shape(String),

    #[error("invalid request: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct TdxCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for TdxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TdxCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl TdxCredentials {
    pub fn from_env() -> Result<Self, TdxError> {
        let read = |key: &str| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| TdxError::Auth(format!("environment variable {} is not set", key)))
        };
        Ok(Self {
            client_id: read(CLIENT_ID_ENV)?,
            client_secret: read(CLIENT_SECRET_ENV)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct TdxClient {
    http: Client,
    base_url: String,
    token_url: String,
    credentials: TdxCredentials,
    max_retries: u32,
    backoff: Duration,
    token: Mutex<Option<CachedToken>>,
    limiter: Mutex<RateLimiter>,
}

impl TdxClient {
    pub fn new(config: &TdxConfig, credentials: TdxCredentials) -> Result<Self, TdxError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_s.max(1)))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token_url: config.token_url.clone(),
            credentials,
            max_retries: config.max_retries,
            backoff: clamped_secs(config.backoff_s, MAX_BACKOFF),
            token: Mutex::new(None),
            limiter: Mutex::new(RateLimiter::new(
                config.min_request_interval_s,
                config.request_jitter_s,
            )),
        })
    }

    async fn access_token(&self) -> Result<String, TdxError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting TDX access token");
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "client_credentials")
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("client_secret", &self.credentials.client_secret)
            .finish();

        let response = self
            .http
            .post(&self.token_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TdxError::Auth(format!("token endpoint returned {}: {}", status, text)));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| TdxError::Auth(format!("invalid token response: {}", e)))?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600)).min(MAX_TOKEN_LIFETIME);
        let cached = CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_SKEW),
        };
        let value = cached.value.clone();
        *guard = Some(cached);
        Ok(value)
    }

    async fn clear_token(&self) {
        *self.token.lock().await = None;
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        backoff_delay(self.backoff, attempt)
    }

    /// GET a JSON document. Relative paths are joined to the configured base URL.
    pub async fn get_json(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, TdxError> {
        let url = build_url(&self.base_url, path, params)?;
        let mut refreshed_token = false;
        let mut attempt: u32 = 0;

        loop {
            self.limiter.lock().await.wait().await;
            let token = self.access_token().await?;

            let result = self
                .http
                .get(url.clone())
                .header(AUTHORIZATION, format!("Bearer {}", token))
                .header(ACCEPT, "application/json")
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) => {
                    if attempt < self.max_retries {
                        let delay = self.backoff_for(attempt);
                        warn!(
                            "TDX request failed (attempt {}/{}): {}; retrying in {:?}",
                            attempt + 1,
                            self.max_retries + 1,
                            e,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(TdxError::Transport(e));
                }
            };

            let status = response.status();
            if status.is_success() {
                return response
                    .json::<Value>()
                    .await
                    .map_err(|e| TdxError::Shape(format!("invalid JSON from {}: {}", url, e)));
            }

            if status == StatusCode::UNAUTHORIZED && !refreshed_token {
                info!("TDX returned 401, refreshing access token");
                self.clear_token().await;
                refreshed_token = true;
                continue;
            }

            if is_retryable(status) {
                let retry_after = parse_retry_after(response.headers());
                if attempt < self.max_retries {
                    let delay = retry_after
                        .map(|s| clamped_secs(s, MAX_BACKOFF))
                        .unwrap_or_else(|| self.backoff_for(attempt));
                    warn!(
                        "TDX returned {} for {} (attempt {}/{}); retrying in {:?}",
                        status,
                        url.path(),
                        attempt + 1,
                        self.max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                if status == StatusCode::TOO_MANY_REQUESTS {
                    return Err(TdxError::RateLimited { retry_after });
                }
            }

            let body = response.text().await.unwrap_or_default();
            return Err(TdxError::Request {
                status: status.as_u16(),
                body: truncate(&body, 500),
            });
        }
    }

    /// GET every record of a listing, following OData `nextLink` pages.
    pub async fn get_json_all(
        &self,
        path: &str,
        params: &[(&str, &str)],
        max_pages: usize,
    ) -> Result<Vec<Value>, TdxError> {
        if max_pages < 1 {
            return Err(TdxError::Invalid("max_pages must be >= 1".to_string()));
        }

        let first = self.get_json(path, params).await?;
        let (mut items, mut next) = split_page(first)?;
        let mut pages = 1;

        while let Some(link) = next {
            if pages >= max_pages {
                return Err(TdxError::Shape(format!(
                    "exceeded max_pages={} while paging {}",
                    max_pages, path
                )));
            }
            debug!("Following TDX nextLink (page {})", pages + 1);
            let page = self.get_json(&link, &[]).await?;
            let (more, following) = split_page(page)?;
            items.extend(more);
            next = following;
            pages += 1;
        }

        Ok(items)
    }
}

/// Exponential backoff from `base`, capped at [`MAX_BACKOFF`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

fn parse_retry_after(headers: &HeaderMap) -> Option<f64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Absolute URLs pass through untouched; everything else is joined to `base`.
pub fn build_url(base: &str, path: &str, params: &[(&str, &str)]) -> Result<Url, TdxError> {
    let raw = if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };
    let mut url = Url::parse(&raw).map_err(|e| TdxError::Invalid(format!("{}: {}", raw, e)))?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter().copied());
    }
    Ok(url)
}

/// Split a response into records plus the next page link, if any.
///
/// Accepts a bare JSON array or an OData envelope `{"value": [...]}`.
pub fn split_page(payload: Value) -> Result<(Vec<Value>, Option<String>), TdxError> {
    match payload {
        Value::Array(items) => Ok((items, None)),
        Value::Object(mut map) => {
            let items = match map.remove("value") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(TdxError::Shape(
                        "object response without a 'value' array".to_string(),
                    ))
                }
            };
            let next = ["@odata.nextLink", "odata.nextLink"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .map(str::to_string)
                .filter(|s| !s.is_empty());
            Ok((items, next))
        }
        other => Err(TdxError::Shape(format!(
            "expected array or object, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
