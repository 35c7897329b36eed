use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

pub type HttpResult<T> = Result<T, HttpError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("{service} rate limit exceeded")]
    RateLimited { service: String },

    #[error("{service} resource not found")]
    NotFound { service: String },

    #[error("{service} responded with HTTP {status}")]
    Status { service: String, status: u16 },

    #[error("{service} network error: {message}")]
    Network { service: String, message: String },

    #[error("{service} request timed out after {seconds} seconds")]
    Timeout { service: String, seconds: u64 },

    #[error("{service} returned an unreadable response: {message}")]
    Decode { service: String, message: String },
}

impl HttpError {
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::RateLimited { .. }
            | HttpError::Network { .. }
            | HttpError::Timeout { .. } => true,
            HttpError::Status { status, .. } => *status >= 500,
            HttpError::NotFound { .. } | HttpError::Decode { .. } => false,
        }
    }
}

/// Raw response as seen after retries are exhausted
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

/// HTTP client shared by the chain adapters, the price oracle and the exchange.
///
/// Every request carries an explicit timeout. 429, 5xx and transport failures
/// are retried with `1 << attempt` second backoff up to `max_retries`, except
/// on the `*_once` paths.
#[derive(Debug, Clone)]
pub struct ApiHttpClient {
    client: Client,
    service: &'static str,
    timeout: Duration,
    max_retries: u32,
}

impl ApiHttpClient {
    pub fn new(service: &'static str, request_timeout: Duration, max_retries: u32) -> HttpResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(20)
            .user_agent("CrossPay-Backend/1.0")
            .build()
            .map_err(|e| HttpError::Network {
                service: service.to_string(),
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            service,
            timeout: request_timeout,
            max_retries,
        })
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    /// Send a request, retrying transient failures, and hand back the final response
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
        headers: &[(&str, &str)],
    ) -> HttpResult<RawResponse> {
        self.send_with_retries(method, url, body, headers, self.max_retries)
            .await
    }

    /// Exactly one attempt. Non-idempotent calls go through here: a timeout
    /// or 5xx may still have taken effect upstream.
    pub async fn send_once(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
        headers: &[(&str, &str)],
    ) -> HttpResult<RawResponse> {
        self.send_with_retries(method, url, body, headers, 0).await
    }

    async fn send_with_retries(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
        headers: &[(&str, &str)],
        max_retries: u32,
    ) -> HttpResult<RawResponse> {
        let mut last_error = None;

        for attempt in 0..=max_retries {
            let mut request = self.client.request(method.clone(), url);
            for (name, value) in headers {
                request = request.header(*name, *value);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let outcome = match timeout(self.timeout, request.send()).await {
                Err(_) => Err(HttpError::Timeout {
                    service: self.service.to_string(),
                    seconds: self.timeout.as_secs(),
                }),
                Ok(Err(e)) => Err(HttpError::Network {
                    service: self.service.to_string(),
                    message: e.to_string(),
                }),
                Ok(Ok(resp)) => {
                    let status = resp.status();
                    match resp.text().await {
                        Ok(body) => Ok(RawResponse { status, body }),
                        Err(e) => Err(HttpError::Network {
                            service: self.service.to_string(),
                            message: format!("failed to read response body: {}", e),
                        }),
                    }
                }
            };

            match outcome {
                Ok(response) => {
                    let status = response.status;
                    let retryable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    if !retryable {
                        return Ok(response);
                    }
                    if attempt < max_retries {
                        warn!(
                            service = self.service,
                            status = %status,
                            attempt = attempt + 1,
                            "upstream throttled or failing, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    debug!(service = self.service, error = %e, attempt = attempt + 1, "request failed");
                    last_error = Some(e);
                    if attempt < max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| HttpError::Network {
            service: self.service.to_string(),
            message: "request failed".to_string(),
        }))
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
        headers: &[(&str, &str)],
    ) -> HttpResult<T> {
        let response = self.send(method, url, body, headers).await?;
        self.decode(response)
    }

    /// `request_json` without retries
    pub async fn request_json_once<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&JsonValue>,
        headers: &[(&str, &str)],
    ) -> HttpResult<T> {
        let response = self.send_once(method, url, body, headers).await?;
        self.decode(response)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> HttpResult<T> {
        self.request_json(Method::GET, url, None, headers).await
    }

    /// Like `get_json`, but a 404 is `None` rather than an error
    pub async fn get_json_optional<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> HttpResult<Option<T>> {
        match self.get_json(url, headers).await {
            Ok(value) => Ok(Some(value)),
            Err(HttpError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn decode<T: DeserializeOwned>(&self, response: RawResponse) -> HttpResult<T> {
        let status = response.status;
        if status.is_success() {
            return serde_json::from_str::<T>(&response.body).map_err(|e| HttpError::Decode {
                service: self.service.to_string(),
                message: e.to_string(),
            });
        }

        debug!(
            service = self.service,
            status = %status,
            body = %truncate(&response.body, 256),
            "upstream error response"
        );

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => HttpError::RateLimited {
                service: self.service.to_string(),
            },
            StatusCode::NOT_FOUND => HttpError::NotFound {
                service: self.service.to_string(),
            },
            other => HttpError::Status {
                service: self.service.to_string(),
                status: other.as_u16(),
            },
        })
    }
}

fn truncate(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::get, routing::post, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_retryable_classification() {
        let service = "test".to_string();
        assert!(HttpError::RateLimited { service: service.clone() }.is_retryable());
        assert!(HttpError::Status { service: service.clone(), status: 503 }.is_retryable());
        assert!(!HttpError::Status { service: service.clone(), status: 400 }.is_retryable());
        assert!(!HttpError::NotFound { service }.is_retryable());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_then_succeeds() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (AxumStatus::TOO_MANY_REQUESTS, "slow down".to_string())
                    } else {
                        (AxumStatus::OK, r#"{"ok":true}"#.to_string())
                    }
                }
            }),
        );
        let base = spawn_server(router).await;

        let client = ApiHttpClient::new("test", Duration::from_secs(5), 1).unwrap();
        let value: JsonValue = client.get_json(&base, &[]).await.unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_rate_limit_surfaces() {
        let router = Router::new().route("/", get(|| async { AxumStatus::TOO_MANY_REQUESTS }));
        let base = spawn_server(router).await;

        let client = ApiHttpClient::new("test", Duration::from_secs(5), 0).unwrap();
        let err = client.get_json::<JsonValue>(&base, &[]).await.unwrap_err();
        assert!(matches!(err, HttpError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_send_once_surfaces_server_error_without_replay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AxumStatus::BAD_GATEWAY
                }
            }),
        );
        let base = spawn_server(router).await;

        let client = ApiHttpClient::new("test", Duration::from_secs(5), 3).unwrap();
        let err = client
            .request_json_once::<JsonValue>(Method::POST, &base, Some(&serde_json::json!({})), &[])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HttpError::Status {
                service: "test".to_string(),
                status: 502
            }
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    AxumStatus::NOT_FOUND
                }
            }),
        );
        let base = spawn_server(router).await;

        let client = ApiHttpClient::new("test", Duration::from_secs(5), 3).unwrap();
        let result: Option<JsonValue> = client.get_json_optional(&base, &[]).await.unwrap();
        assert!(result.is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
