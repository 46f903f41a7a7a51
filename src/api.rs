// REST transport
// Every backend call returns the same envelope: { success, data, message }

use std::collections::VecDeque;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    // No response was received
    #[error("Network error: {0}")]
    Network(String),

    // A response arrived but it was non-2xx or carried success: false
    #[error("Request rejected: {message}")]
    Rejected { status: Option<u16>, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

// Fixed request quota per rolling window
#[derive(Debug, Clone, PartialEq)]
pub struct PacingConfig {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            max_requests: 20,
            window_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout_ms: u64,
    pub pacing: PacingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            auth_token: None,
            timeout_ms: 30_000,
            pacing: PacingConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ClientError> {
        let defaults = Self::default();
        let config = Self {
            base_url: env::var("BOOKING_API_URL").unwrap_or_else(|_| {
                info!(default = %defaults.base_url, "BOOKING_API_URL not set, using default");
                defaults.base_url.clone()
            }),
            auth_token: env::var("BOOKING_API_TOKEN").ok(),
            timeout_ms: env_or("BOOKING_API_TIMEOUT_MS", defaults.timeout_ms)?,
            pacing: PacingConfig {
                max_requests: env_or("BOOKING_API_MAX_REQUESTS", defaults.pacing.max_requests)?,
                window_ms: env_or("BOOKING_API_WINDOW_MS", defaults.pacing.window_ms)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::ConfigError("base_url is empty".to_string()));
        }
        if self.pacing.max_requests == 0 || self.pacing.window_ms == 0 {
            return Err(ClientError::ConfigError(
                "pacing quota and window must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, ClientError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ClientError::ConfigError(format!("invalid {key} value '{raw}': {e}"))),
        Err(_) => {
            info!(%default, "{key} not set, using default");
            Ok(default)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }
}

// A file sent as one multipart field
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl Attachment {
    pub fn image(file_name: &str, content_type: &str, bytes: impl Into<Bytes>) -> Self {
        Self {
            field: "images".to_string(),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            bytes: bytes.into(),
        }
    }

    pub fn with_field(mut self, field: &str) -> Self {
        self.field = field.to_string();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Vec<Attachment>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: RequestBody::Json(body),
        }
    }

    pub fn put_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Put,
            path: path.into(),
            body: RequestBody::Json(body),
        }
    }

    pub fn multipart(path: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: RequestBody::Multipart(attachments),
        }
    }
}

// Transport seam: implementations return the envelope's `data` on success
#[async_trait]
pub trait ResourceApi: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<Value, ApiError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    message: Option<String>,
}

pub fn fallback_message(status: u16) -> &'static str {
    match status {
        400 => "The request was invalid",
        401 => "Please sign in to continue",
        403 => "You are not allowed to perform this action",
        404 => "The requested resource was not found",
        409 => "This resource already exists",
        413 => "The uploaded file is too large",
        422 => "Some of the submitted fields are invalid",
        429 => "Too many requests, please slow down",
        500..=599 => "The server ran into a problem, please try again later",
        _ => "The request failed",
    }
}

/// Maps a raw HTTP response onto the envelope contract.
///
/// A non-2xx status or `success: false` is a rejection carrying the body's
/// `message`, or [`fallback_message`] when the body has none. A 2xx body that
/// is not an envelope is a decode error.
pub fn interpret_response(status: u16, body: &[u8]) -> Result<Value, ApiError> {
    let envelope = serde_json::from_slice::<Envelope>(body);
    let is_success_status = (200..300).contains(&status);

    match envelope {
        Ok(envelope) if is_success_status && envelope.success => Ok(envelope.data),
        Ok(envelope) => Err(ApiError::Rejected {
            status: Some(status),
            message: envelope
                .message
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| fallback_message(status).to_string()),
        }),
        Err(_) if !is_success_status => Err(ApiError::Rejected {
            status: Some(status),
            message: fallback_message(status).to_string(),
        }),
        Err(error) => Err(ApiError::Decode(error.to_string())),
    }
}

/// Client-side request pacing: at most `max_requests` dispatches per rolling
/// `window_ms`. Callers beyond the quota wait for the oldest dispatch to age
/// out of the window.
pub struct RequestPacer {
    config: PacingConfig,
    recent: Mutex<VecDeque<Instant>>,
}

impl RequestPacer {
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    // Time until a dispatch slot frees up, or None after claiming one
    fn try_claim(&self, now: Instant) -> Option<Duration> {
        let window = Duration::from_millis(self.config.window_ms);
        let mut recent = self.recent.lock();

        while let Some(oldest) = recent.front() {
            if now.duration_since(*oldest) >= window {
                recent.pop_front();
            } else {
                break;
            }
        }

        if recent.len() < self.config.max_requests as usize {
            recent.push_back(now);
            return None;
        }
        recent
            .front()
            .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
    }

    // Returns how long the caller was held back
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        while let Some(wait) = self.try_claim(Instant::now()) {
            debug!(wait_ms = wait.as_millis() as u64, "request paced");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
        started.elapsed()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ClientStats {
    pub requests_sent: usize,
    pub requests_succeeded: usize,
    pub requests_failed: usize,
    pub requests_paced: usize,
}

pub struct HttpResourceApi {
    config: ClientConfig,
    http: reqwest::Client,
    pacer: RequestPacer,
    stats: Mutex<ClientStats>,
}

impl HttpResourceApi {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            pacer: RequestPacer::new(config.pacing.clone()),
            config,
            http,
            stats: Mutex::new(ClientStats::default()),
        })
    }

    pub fn stats(&self) -> ClientStats {
        self.stats.lock().clone()
    }

    fn build(&self, request: ApiRequest) -> Result<reqwest::RequestBuilder, ApiError> {
        let url = self.config.url(&request.path);
        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(url),
            HttpMethod::Post => self.http.post(url),
            HttpMethod::Put => self.http.put(url),
        };
        if let Some(token) = &self.config.auth_token {
            builder = builder.bearer_auth(token);
        }

        let builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Multipart(attachments) => {
                let mut form = reqwest::multipart::Form::new();
                for attachment in attachments {
                    let part = reqwest::multipart::Part::bytes(attachment.bytes.to_vec())
                        .file_name(attachment.file_name)
                        .mime_str(&attachment.content_type)
                        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
                    form = form.part(attachment.field, part);
                }
                builder.multipart(form)
            }
        };
        Ok(builder)
    }
}

#[async_trait]
impl ResourceApi for HttpResourceApi {
    async fn send(&self, request: ApiRequest) -> Result<Value, ApiError> {
        let method = request.method;
        let path = request.path.clone();
        let builder = self.build(request)?;

        let waited = self.pacer.acquire().await;
        {
            let mut stats = self.stats.lock();
            stats.requests_sent += 1;
            if !waited.is_zero() {
                stats.requests_paced += 1;
            }
        }

        let outcome = match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.bytes().await {
                    Ok(body) => interpret_response(status, &body),
                    Err(e) => Err(ApiError::Network(e.to_string())),
                }
            }
            Err(e) => Err(ApiError::Network(e.to_string())),
        };

        let mut stats = self.stats.lock();
        match &outcome {
            Ok(_) => {
                stats.requests_succeeded += 1;
                debug!(?method, %path, "request succeeded");
            }
            Err(error) => {
                stats.requests_failed += 1;
                warn!(?method, %path, %error, "request failed");
            }
        }
        outcome
    }
}

// Scripted transport for tests
#[cfg(test)]
pub mod mock_api {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Notify;

    // Holds every response until released, so tests can inspect in-flight state
    #[derive(Clone, Default)]
    pub struct Gate {
        pub arrived: Arc<Notify>,
        pub release: Arc<Notify>,
    }

    #[derive(Default)]
    pub struct MockApi {
        responses: Mutex<HashMap<(HttpMethod, String), VecDeque<Result<Value, ApiError>>>>,
        requests: Mutex<Vec<ApiRequest>>,
        gate: Mutex<Option<Gate>>,
    }

    impl MockApi {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(&self, method: HttpMethod, path: &str, response: Result<Value, ApiError>) {
            self.responses
                .lock()
                .entry((method, path.to_string()))
                .or_default()
                .push_back(response);
        }

        pub fn hold_responses(&self) -> Gate {
            let gate = Gate::default();
            *self.gate.lock() = Some(gate.clone());
            gate
        }

        pub fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().clone()
        }

        pub fn count(&self, method: HttpMethod, path: &str) -> usize {
            self.requests
                .lock()
                .iter()
                .filter(|request| request.method == method && request.path == path)
                .count()
        }
    }

    #[async_trait]
    impl ResourceApi for MockApi {
        async fn send(&self, request: ApiRequest) -> Result<Value, ApiError> {
            let key = (request.method, request.path.clone());
            self.requests.lock().push(request);

            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                gate.arrived.notify_one();
                gate.release.notified().await;
            }

            self.responses
                .lock()
                .get_mut(&key)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| {
                    Err(ApiError::Rejected {
                        status: Some(404),
                        message: format!("no scripted response for {} {}", key.0.as_str(), key.1),
                    })
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    #[test]
    fn test_success_envelope_yields_data() {
        let body = json!({"success": true, "data": {"_id": "r1"}, "message": "created"});
        let data = interpret_response(201, body.to_string().as_bytes()).unwrap();
        assert_eq!(data, json!({"_id": "r1"}));
    }

    #[test]
    fn test_success_false_is_rejection_with_server_message() {
        let body = json!({"success": false, "message": "Service already has a room"});
        let err = interpret_response(200, body.to_string().as_bytes()).unwrap_err();
        assert_eq!(
            err,
            ApiError::Rejected {
                status: Some(200),
                message: "Service already has a room".to_string()
            }
        );
    }

    #[test_case(400, "The request was invalid" ; "bad request")]
    #[test_case(401, "Please sign in to continue" ; "unauthorized")]
    #[test_case(409, "This resource already exists" ; "conflict")]
    #[test_case(503, "The server ran into a problem, please try again later" ; "server error")]
    #[test_case(418, "The request failed" ; "other status")]
    fn test_fallback_message_for_bare_error_status(status: u16, expected: &str) {
        let err = interpret_response(status, b"<html>oops</html>").unwrap_err();
        assert_eq!(
            err,
            ApiError::Rejected {
                status: Some(status),
                message: expected.to_string()
            }
        );
    }

    #[test]
    fn test_blank_server_message_uses_fallback() {
        let body = json!({"success": false, "message": "  "});
        let err = interpret_response(422, body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, ApiError::Rejected { message, .. } if message == fallback_message(422)));
    }

    #[test]
    fn test_unparsable_success_body_is_decode_error() {
        let err = interpret_response(200, b"not json").unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn test_config_validation_and_url() {
        let config = ClientConfig {
            base_url: "https://api.example.com/v1/".to_string(),
            ..ClientConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.url("/rooms"), "https://api.example.com/v1/rooms");

        let no_quota = ClientConfig {
            pacing: PacingConfig {
                max_requests: 0,
                window_ms: 1000,
            },
            ..ClientConfig::default()
        };
        assert!(matches!(no_quota.validate(), Err(ClientError::ConfigError(_))));

        let no_url = ClientConfig {
            base_url: " ".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(HttpResourceApi::new(no_url), Err(ClientError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_pacer_holds_requests_beyond_quota() {
        let pacer = RequestPacer::new(PacingConfig {
            max_requests: 2,
            window_ms: 200,
        });

        assert!(pacer.acquire().await < Duration::from_millis(50));
        assert!(pacer.acquire().await < Duration::from_millis(50));

        let waited = pacer.acquire().await;
        assert!(
            waited >= Duration::from_millis(150),
            "third request should wait for the window, waited {:?}",
            waited
        );
    }

    #[tokio::test]
    async fn test_pacer_window_rolls() {
        let pacer = RequestPacer::new(PacingConfig {
            max_requests: 1,
            window_ms: 50,
        });
        pacer.acquire().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(pacer.acquire().await < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        let api = HttpResourceApi::new(ClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            timeout_ms: 2000,
            ..ClientConfig::default()
        })
        .unwrap();

        let err = api.send(ApiRequest::get("rooms")).await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)), "got {err:?}");

        let stats = api.stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.requests_failed, 1);
    }
}
