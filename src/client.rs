use std::env;
use std::pin::Pin;
use std::time::{Duration, Instant};

use futures::Stream;
use futures::stream::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response, header};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS, STREAM_TTFB,
};
use crate::sse::process_sse;
use crate::types::{ChatCompletionChunk, ChatCompletionRequest};

/// Default endpoint: DashScope's OpenAI-compatible mode.
pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1/";

/// Environment variable consulted when no API key is passed explicitly.
pub const API_KEY_ENV: &str = "DASHSCOPE_API_KEY";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// A boxed stream of parsed completion chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk>> + Send>>;

/// Anything that can turn a request snapshot into a stream of completion chunks.
///
/// The HTTP client is the production implementation; tests substitute scripted
/// transports.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a streaming completion for `request`.
    async fn stream(&self, request: ChatCompletionRequest) -> Result<ChunkStream>;
}

/// Client for an OpenAI-compatible streaming chat completions endpoint.
#[derive(Debug, Clone)]
pub struct OmniClient {
    api_key: String,
    client: ReqwestClient,
    base_url: String,
    timeout: Duration,
}

impl OmniClient {
    /// Create a new client against the default endpoint.
    ///
    /// The API key can be provided directly or read from the DASHSCOPE_API_KEY
    /// environment variable.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        Self::with_options(api_key, None, None)
    }

    /// Create a new client with custom settings.
    pub fn with_options(
        api_key: Option<String>,
        base_url: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let api_key = match api_key {
            Some(key) => key,
            None => env::var(API_KEY_ENV).map_err(|_| {
                Error::authentication(format!(
                    "API key not provided and {API_KEY_ENV} environment variable not set"
                ))
            })?,
        };
        if api_key.trim().is_empty() {
            return Err(Error::authentication("API key is empty"));
        }

        let base_url = normalize_base_url(base_url.as_deref().unwrap_or(DEFAULT_BASE_URL))?;
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = ReqwestClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            api_key: api_key.trim().to_string(),
            client,
            base_url,
            timeout,
        })
    }

    /// The endpoint root, always ending in `/`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/event-stream"),
        );
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::authentication("API key contains invalid header characters"))?;
        headers.insert(header::AUTHORIZATION, bearer);
        Ok(headers)
    }

    /// Process API response errors and convert to our Error type
    async fn process_error_response(response: Response) -> Error {
        let status_code = response.status().as_u16();

        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|val| val.to_str().ok())
            .map(String::from);

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());

        let error_body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Error::http_client(
                    format!("Failed to read error response: {e}"),
                    Some(Box::new(e)),
                );
            }
        };

        error_from_body(status_code, &error_body, request_id, retry_after)
    }

    /// Send a request and get a stream of completion chunks.
    pub async fn stream(&self, mut request: ChatCompletionRequest) -> Result<ChunkStream> {
        request.stream = true;
        request.stream_options.include_usage = true;

        let url = format!("{}chat/completions", self.base_url);
        CLIENT_REQUESTS.click();
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            audio = request.wants_audio(),
            "sending chat completion request"
        );

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .headers(self.default_headers()?)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                CLIENT_REQUEST_ERRORS.click();
                if e.is_timeout() {
                    Error::timeout(
                        format!("Request timed out: {e}"),
                        Some(self.timeout.as_secs_f64()),
                    )
                } else if e.is_connect() {
                    Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
                } else {
                    Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
                }
            })?;
        let elapsed = start.elapsed().as_secs_f64();
        CLIENT_REQUEST_DURATION.add(elapsed);
        STREAM_TTFB.add(elapsed);

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            let err = Self::process_error_response(response).await;
            tracing::warn!(error = %err, "chat completion request rejected");
            return Err(err);
        }

        let bytes = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });
        Ok(Box::pin(process_sse(bytes)))
    }
}

#[async_trait::async_trait]
impl ChatTransport for OmniClient {
    async fn stream(&self, request: ChatCompletionRequest) -> Result<ChunkStream> {
        OmniClient::stream(self, request).await
    }
}

fn normalize_base_url(base_url: &str) -> Result<String> {
    let parsed = url::Url::parse(base_url.trim())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::url(
            format!("unsupported scheme in base URL: {}", parsed.scheme()),
            None,
        ));
    }
    let mut normalized = parsed.to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Map an HTTP error status and body onto the error taxonomy.
///
/// Understands both the OpenAI-compatible body (`{"error": {...}}`) and DashScope's native
/// body (`{"code", "message", "request_id"}`); anything else is surfaced verbatim.
fn error_from_body(
    status_code: u16,
    body: &str,
    request_id: Option<String>,
    retry_after: Option<u64>,
) -> Error {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<ErrorDetail>,
        code: Option<String>,
        message: Option<String>,
        request_id: Option<String>,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        #[serde(rename = "type")]
        error_type: Option<String>,
        code: Option<serde_json::Value>,
        message: Option<String>,
        param: Option<String>,
    }

    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    let detail = parsed.as_ref().and_then(|e| e.error.as_ref());
    let error_type = detail
        .and_then(|d| d.error_type.clone())
        .or_else(|| {
            detail
                .and_then(|d| d.code.as_ref())
                .and_then(|c| c.as_str().map(String::from))
        })
        .or_else(|| parsed.as_ref().and_then(|e| e.code.clone()));
    let message = detail
        .and_then(|d| d.message.clone())
        .or_else(|| parsed.as_ref().and_then(|e| e.message.clone()))
        .unwrap_or_else(|| body.to_string());
    let param = detail.and_then(|d| d.param.clone());
    let request_id = request_id.or_else(|| parsed.as_ref().and_then(|e| e.request_id.clone()));

    match status_code {
        400 => Error::bad_request(message, param),
        401 => Error::authentication(message),
        403 => Error::permission(message),
        404 => Error::not_found(message),
        408 => Error::timeout(message, None),
        429 => Error::rate_limit(message, retry_after),
        500 => Error::internal_server(message, request_id),
        502..=504 => Error::service_unavailable(message, retry_after),
        _ => Error::api(status_code, error_type, message, request_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = OmniClient::new(Some("test-key".to_string())).unwrap();
        assert_eq!(client.api_key, "test-key");
        assert_eq!(client.base_url, DEFAULT_BASE_URL);
        assert_eq!(client.timeout, DEFAULT_TIMEOUT);

        let client = OmniClient::with_options(
            Some("test-key".to_string()),
            Some("http://localhost:8080/v1".to_string()),
            Some(Duration::from_secs(30)),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/v1/");
        assert_eq!(client.timeout, Duration::from_secs(30));
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = OmniClient::new(Some("  ".to_string())).unwrap_err();
        assert!(err.is_authentication());
    }

    #[test]
    fn bad_base_url_is_rejected() {
        assert!(
            OmniClient::with_options(Some("k".to_string()), Some("not a url".to_string()), None)
                .is_err()
        );
        assert!(
            OmniClient::with_options(
                Some("k".to_string()),
                Some("ftp://example.com/".to_string()),
                None
            )
            .is_err()
        );
    }

    #[test]
    fn bearer_header() {
        let client = OmniClient::new(Some("sk-123".to_string())).unwrap();
        let headers = client.default_headers().unwrap();
        assert_eq!(headers[header::AUTHORIZATION], "Bearer sk-123");
        assert_eq!(headers[header::ACCEPT], "text/event-stream");
    }

    #[test]
    fn openai_style_error_body() {
        let body = r#"{"error":{"message":"Incorrect API key provided.","type":"invalid_request_error","param":null,"code":"invalid_api_key"},"request_id":"abc"}"#;
        let err = error_from_body(401, body, None, None);
        assert!(err.is_authentication());
        assert!(err.to_string().contains("Incorrect API key"));

        let err = error_from_body(418, body, None, None);
        assert_eq!(err.status_code(), Some(418));
        assert_eq!(err.request_id(), Some("abc"));
    }

    #[test]
    fn dashscope_style_error_body() {
        let body = r#"{"code":"Throttling.RateQuota","message":"Requests rate limit exceeded.","request_id":"r-1"}"#;
        let err = error_from_body(429, body, None, Some(3));
        assert!(err.is_rate_limit());
        assert!(err.to_string().contains("retry after 3 seconds"));

        let err = error_from_body(500, body, None, None);
        assert_eq!(err.request_id(), Some("r-1"));
    }

    #[test]
    fn unparseable_error_body_is_kept() {
        let err = error_from_body(502, "<html>bad gateway</html>", None, None);
        assert!(err.is_server_error());
        assert!(err.to_string().contains("bad gateway"));
    }
}
