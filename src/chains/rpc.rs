use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::error::{ChainError, ChainResult};
use crate::services::http_client::ApiHttpClient;

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<JsonValue>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC 2.0 client over the shared retrying HTTP client
#[derive(Debug, Clone)]
pub struct JsonRpcClient {
    http: ApiHttpClient,
    url: String,
    next_id: Arc<AtomicU64>,
}

impl JsonRpcClient {
    pub fn new(http: ApiHttpClient, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call `method`; a null result deserializes into `T` as-is, so
    /// `Option<_>` targets see `None`
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: JsonValue) -> ChainResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let envelope: RpcEnvelope = self
            .http
            .request_json(Method::POST, &self.url, Some(&body), &[])
            .await?;

        if let Some(error) = envelope.error {
            return Err(ChainError::rpc_error(error.code, error.message));
        }

        serde_json::from_value(envelope.result.unwrap_or(JsonValue::Null)).map_err(|e| {
            ChainError::invalid_response(format!("{} returned unexpected result: {}", method, e))
        })
    }
}
