//! HTTP backend seam for the request gateway
//!
//! [`HttpBackend`] performs one request/response exchange and nothing else:
//! it neither retries nor refreshes. [`ReqwestBackend`] is the production
//! implementation.

use std::time::Duration;

use serde_json::Value;
use url::Url;

use chatwire_core::prelude::*;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// HTTP status the refresh guard reacts to.
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// HTTP verb of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A request against the remote service, relative to the backend's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// Set once the request has been replayed after a credential refresh.
    /// A retried request is never retried again.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Put, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Mark this request so it is never retried after an authorization failure.
    pub fn mark_retried(mut self) -> Self {
        self.retried = true;
        self
    }
}

/// Raw status and JSON body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == STATUS_UNAUTHORIZED
    }

    /// Unwrap the service envelope into the payload or an [`Error::Api`].
    pub fn into_result(self) -> Result<Value> {
        unwrap_envelope(self.status, self.body)
    }
}

/// Unwrap `{ success, data, message, error, code }` envelopes.
///
/// Bodies without a `success` flag are passed through as-is when the status
/// is 2xx.
pub fn unwrap_envelope(status: u16, body: Value) -> Result<Value> {
    let ok_status = (200..300).contains(&status);

    match body.get("success").and_then(Value::as_bool) {
        Some(true) if ok_status => Ok(body.get("data").cloned().unwrap_or(Value::Null)),
        Some(_) => Err(envelope_error(status, &body)),
        None if ok_status => Ok(body),
        None => Err(envelope_error(status, &body)),
    }
}

fn envelope_error(status: u16, body: &Value) -> Error {
    let message = body
        .get("error")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| body.as_str().map(str::to_string))
        .unwrap_or_else(|| "request failed".to_string());
    let code = body.get("code").and_then(Value::as_str).map(str::to_string);
    Error::api(status, message, code)
}

/// Performs a single HTTP exchange.
#[trait_variant::make(HttpBackend: Send)]
pub trait LocalHttpBackend {
    /// Execute `request`, attaching `bearer` as the `Authorization` header.
    ///
    /// Non-2xx statuses are returned as responses, not errors; only transport
    /// failures produce [`Error::Http`].
    async fn execute(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse>;
}

/// [`HttpBackend`] built on `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestBackend {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestBackend {
    /// Create a backend rooted at `base_url` (e.g. `http://localhost:3001/api`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigInvalid`] if `base_url` is not a valid URL and
    /// [`Error::Http`] if the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Url::parse(base_url)
            .map_err(|e| Error::config_invalid(format!("api url '{base_url}': {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve `path` against the base URL, keeping the base path prefix.
    fn endpoint(&self, path: &str) -> Result<Url> {
        let joined = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&joined).map_err(|e| Error::http(format!("invalid endpoint '{joined}': {e}")))
    }
}

impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse> {
        let url = self.endpoint(&request.path)?;
        trace!("HTTP {} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method.into(), url)
            .query(&request.query);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::http(format!("{} {} failed: {e}", request.method, request.path)))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::http(format!("reading response body: {e}")))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        debug!("HTTP {} {} -> {}", request.method, request.path, status);
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_success_returns_data() {
        let body = json!({ "success": true, "data": { "token": "t" } });
        assert_eq!(unwrap_envelope(200, body).unwrap(), json!({ "token": "t" }));
    }

    #[test]
    fn test_envelope_success_without_data_is_null() {
        let body = json!({ "success": true, "message": "ok" });
        assert_eq!(unwrap_envelope(200, body).unwrap(), Value::Null);
    }

    #[test]
    fn test_envelope_failure_maps_to_api_error() {
        let body = json!({ "success": false, "error": "Room not found", "code": "NOT_FOUND" });
        let err = unwrap_envelope(404, body).unwrap_err();
        match err {
            Error::Api {
                status,
                message,
                code,
            } => {
                assert_eq!(status, 404);
                assert_eq!(message, "Room not found");
                assert_eq!(code.as_deref(), Some("NOT_FOUND"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_envelope_success_flag_with_error_status_fails() {
        let body = json!({ "success": true, "data": {} });
        assert!(unwrap_envelope(500, body).is_err());
    }

    #[test]
    fn test_plain_body_passes_through() {
        let body = json!([1, 2, 3]);
        assert_eq!(unwrap_envelope(200, body.clone()).unwrap(), body);
        assert!(unwrap_envelope(502, Value::String("Bad Gateway".into())).is_err());
    }

    #[test]
    fn test_response_classification() {
        assert!(ApiResponse::new(401, Value::Null).is_unauthorized());
        assert!(!ApiResponse::new(403, Value::Null).is_unauthorized());
        assert!(ApiResponse::new(204, Value::Null).is_success());
    }

    #[test]
    fn test_request_builders() {
        let req = ApiRequest::get("/chat/messages/r1")
            .with_query("page", 2)
            .with_query("limit", 50);
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.query.len(), 2);
        assert!(!req.retried);
        assert!(req.clone().mark_retried().retried);
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let backend = ReqwestBackend::new("http://localhost:3001/api/", DEFAULT_REQUEST_TIMEOUT)
            .unwrap();
        let url = backend.endpoint("/auth/login").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3001/api/auth/login");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = ReqwestBackend::new("not a url", DEFAULT_REQUEST_TIMEOUT).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }
}
