use anyhow::Context;
use reqwest::{header, Client, Request, Response, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthManager;
use crate::error::{Result, ToolError};

/// Google Drive v3 REST base
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Google Sheets v4 REST base
pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4";

/// Which Google API a path belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    Drive,
    Sheets,
}

/// HTTP client options
#[derive(Debug, Clone)]
pub struct HttpClientOptions {
    pub drive_api_base: String,
    pub sheets_api_base: String,
    pub connect_timeout: u64,
    pub request_timeout: u64,
    pub max_retries: u32,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            drive_api_base: DRIVE_API_BASE.to_string(),
            sheets_api_base: SHEETS_API_BASE.to_string(),
            connect_timeout: 10,
            request_timeout: 60,
            max_retries: 3,
        }
    }
}

/// HTTP client for Google APIs with retry logic
pub struct GoogleHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Source of bearer tokens
    auth_manager: Arc<AuthManager>,

    drive_base: Url,
    sheets_base: Url,

    /// Maximum number of retries
    max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    base_delay_ms: u64,
}

impl GoogleHttpClient {
    /// Create a new HTTP client
    pub fn new(auth_manager: Arc<AuthManager>, options: HttpClientOptions) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(options.connect_timeout))
            .timeout(Duration::from_secs(options.request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let drive_base = Url::parse(&options.drive_api_base)
            .with_context(|| format!("Invalid Drive API base: {}", options.drive_api_base))?;
        let sheets_base = Url::parse(&options.sheets_api_base)
            .with_context(|| format!("Invalid Sheets API base: {}", options.sheets_api_base))?;

        Ok(Self {
            client,
            auth_manager,
            drive_base,
            sheets_base,
            max_retries: options.max_retries,
            base_delay_ms: 500,
        })
    }

    /// Build an API URL; each segment is percent-encoded on its own
    pub fn url(&self, api: Api, segments: &[&str]) -> Result<Url> {
        let mut url = match api {
            Api::Drive => self.drive_base.clone(),
            Api::Sheets => self.sheets_base.clone(),
        };
        url.path_segments_mut()
            .map_err(|_| ToolError::Internal(anyhow::anyhow!("API base URL cannot have a path")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T> {
        let request = self
            .client
            .get(url)
            .query(query)
            .build()
            .map_err(|e| ToolError::Internal(e.into()))?;

        let response = self.request_with_retry(request).await?;
        decode_json(response).await
    }

    /// PUT a JSON body and decode the JSON answer
    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<T> {
        let request = self
            .client
            .put(url)
            .query(query)
            .json(body)
            .build()
            .map_err(|e| ToolError::Internal(e.into()))?;

        let response = self.request_with_retry(request).await?;
        decode_json(response).await
    }

    /// GET raw bytes, rejecting bodies over `limit`
    pub async fn get_bytes(
        &self,
        url: Url,
        query: &[(&str, String)],
        limit: u64,
    ) -> Result<(Vec<u8>, Option<String>)> {
        let request = self
            .client
            .get(url)
            .query(query)
            .build()
            .map_err(|e| ToolError::Internal(e.into()))?;

        let mut response = self.request_with_retry(request).await?;

        if let Some(length) = response.content_length() {
            if length > limit {
                return Err(ToolError::Unsupported(format!(
                    "file is {} bytes, larger than the {} byte limit",
                    length, limit
                )));
            }
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        // Chunked bodies carry no length, so enforce the limit while reading
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ToolError::Internal(anyhow::anyhow!("Failed to read response body: {}", e)))?
        {
            if bytes.len() as u64 + chunk.len() as u64 > limit {
                return Err(ToolError::Unsupported(format!(
                    "file is larger than the {} byte limit",
                    limit
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok((bytes, content_type))
    }

    /// Execute a request with retry logic
    /// Automatically handles:
    /// - 401: invalidates the token, refreshes and retries once
    /// - 429: exponential backoff
    /// - 5xx: exponential backoff
    pub async fn request_with_retry(&self, mut request: Request) -> Result<Response> {
        let mut attempt = 0;
        let mut reauthorized = false;

        let method = request.method().clone();
        let url = request.url().clone();
        tracing::debug!(
            method = %method,
            url = %url,
            "Sending HTTP request"
        );

        loop {
            let credential = self.auth_manager.get_valid_credentials().await?;
            let auth_value: header::HeaderValue = credential
                .authorization_header()
                .parse()
                .map_err(|_| ToolError::Internal(anyhow::anyhow!("Access token is not a valid header value")))?;
            request.headers_mut().insert(header::AUTHORIZATION, auth_value);

            let req = request.try_clone().ok_or_else(|| {
                ToolError::Internal(anyhow::anyhow!("Request body is not cloneable"))
            })?;

            match self.client.execute(req).await {
                Ok(response) => {
                    let status = response.status();
                    tracing::debug!(status = %status, "Received HTTP response");

                    if status.is_success() {
                        return Ok(response);
                    }

                    match status.as_u16() {
                        // 401: token was revoked or expired early
                        401 if !reauthorized => {
                            tracing::warn!("Received 401, refreshing token and retrying...");
                            self.auth_manager.invalidate(&credential).await;
                            reauthorized = true;
                            continue;
                        }

                        // 429 or 5xx: Exponential backoff
                        429 | 500..=599 if attempt < self.max_retries => {
                            let delay = self.calculate_backoff_delay(attempt);
                            tracing::warn!(
                                "Received {}, retrying after {}ms (attempt {}/{})",
                                status,
                                delay,
                                attempt + 1,
                                self.max_retries
                            );
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                            attempt += 1;
                            continue;
                        }

                        _ => {}
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    let message = google_error_message(&error_text);

                    tracing::error!(
                        status = status.as_u16(),
                        url = %url,
                        response_body = %error_text,
                        attempt = attempt + 1,
                        "HTTP request failed with error response"
                    );
                    return Err(ToolError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }

                Err(e) => {
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_request() {
                        "request_error"
                    } else if e.is_body() {
                        "body_error"
                    } else {
                        "unknown"
                    };

                    if attempt < self.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            error_kind = error_kind,
                            error = %e,
                            url = %url,
                            "Request failed, retrying after {}ms (attempt {}/{})",
                            delay,
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(
                        error_kind = error_kind,
                        error = %e,
                        url = %url,
                        total_attempts = attempt + 1,
                        "HTTP request failed after all retries"
                    );

                    return Err(ToolError::Internal(anyhow::anyhow!(
                        "HTTP request failed: {} (kind: {})",
                        e,
                        error_kind
                    )));
                }
            }
        }
    }

    /// Calculate exponential backoff delay
    fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        // Exponential backoff: base_delay * 2^attempt, plus up to 10% jitter
        let delay = self.base_delay_ms * 2_u64.pow(attempt);
        let jitter = (delay as f64 * 0.1 * jitter::random()) as u64;
        delay + jitter
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response
        .text()
        .await
        .map_err(|e| ToolError::Internal(anyhow::anyhow!("Failed to read response body: {}", e)))?;
    serde_json::from_str(&body)
        .map_err(|e| ToolError::Internal(anyhow::anyhow!("Unexpected API response: {}", e)))
}

/// Pull `error.message` out of a Google error body, falling back to the raw text
fn google_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

// Cheap jitter source
mod jitter {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hash, Hasher};

    pub fn random() -> f64 {
        let state = RandomState::new();
        let mut hasher = state.build_hasher();
        std::time::SystemTime::now().hash(&mut hasher);
        (hasher.finish() % 1000) as f64 / 1000.0
    }
}
