use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use shared::RateLimiter;
use tracing::{debug, error, info};

use crate::config::{TapConfig, CALLS_PER_MINUTE};
use crate::error::{FirefliesError, RetryPolicies};

/// The seam between the extraction engine and the network: one GraphQL
/// operation in, the decoded response body out.
#[async_trait]
pub trait GraphQLTransport: Send + Sync {
    async fn execute(&self, query: &str, variables: Value) -> Result<Value, FirefliesError>;
}

pub struct FirefliesClient {
    client: Client,
    endpoint: String,
    access_token: String,
    limiter: RateLimiter,
    retry: RetryPolicies,
}

impl FirefliesClient {
    pub fn new(config: &TapConfig) -> Result<Self, FirefliesError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("tap-fireflies/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FirefliesError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint_url.clone(),
            access_token: config.access_token.clone(),
            limiter: RateLimiter::per_minute(CALLS_PER_MINUTE),
            retry: RetryPolicies::default(),
        })
    }

    pub fn with_retry_policies(mut self, retry: RetryPolicies) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limit(mut self, calls_per_minute: u32) -> Self {
        self.limiter = RateLimiter::per_minute(calls_per_minute);
        self
    }

    /// Sends one request, retrying the transient failure classes. `path`
    /// is appended to the endpoint when given.
    pub async fn request(
        &self,
        method: Method,
        path: Option<&str>,
        payload: Option<&Value>,
    ) -> Result<Value, FirefliesError> {
        let url = match path {
            Some(p) => format!(
                "{}/{}",
                self.endpoint.trim_end_matches('/'),
                p.trim_start_matches('/')
            ),
            None => self.endpoint.clone(),
        };

        let result = self
            .limiter
            .execute_with_retry(
                || self.send_once(method.clone(), &url, payload),
                |e: &FirefliesError| e.retry_policy(&self.retry),
            )
            .await;

        if let Err(e) = &result {
            error!(
                method = %method,
                url = %url,
                code = e.code(),
                description = e.api_kind().map(|k| k.description()),
                "Fireflies request failed: {}",
                e
            );
        }
        result
    }

    pub async fn post(&self, payload: &Value) -> Result<Value, FirefliesError> {
        self.request(Method::POST, None, Some(payload)).await
    }

    async fn send_once(
        &self,
        method: Method,
        url: &str,
        payload: Option<&Value>,
    ) -> Result<Value, FirefliesError> {
        let variables = payload.and_then(|p| p.get("variables"));
        info!(method = %method, url = %url, variables = ?variables, "Fireflies request");

        let mut request = self
            .client
            .request(method.clone(), url)
            .header("Authorization", format!("Bearer {}", self.access_token));
        if method == Method::POST {
            request = request.header("Content-Type", "application/json");
        }
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status != StatusCode::OK {
            let body: Value = serde_json::from_str(&text).unwrap_or_else(|_| json!({}));
            let err = FirefliesError::from_error_body(&body);
            debug!("HTTP {} from Fireflies classified as {:?}", status, err.api_kind());
            return Err(err);
        }

        // A 200 can still arrive with an empty or truncated body.
        let body: Value =
            serde_json::from_str(&text).map_err(|e| FirefliesError::BadResponse(e.to_string()))?;

        let has_errors = body
            .get("errors")
            .and_then(Value::as_array)
            .is_some_and(|errors| !errors.is_empty());
        let has_data = body.get("data").is_some_and(|d| !d.is_null());
        if has_errors && !has_data {
            return Err(FirefliesError::from_error_body(&body));
        }

        Ok(body)
    }

    pub async fn test_connection(&self) -> Result<(), FirefliesError> {
        debug!("Testing Fireflies API connection...");
        let body = self
            .execute(
                "query Probe($limit: Int) { transcripts(limit: $limit) { id } }",
                json!({ "limit": 1 }),
            )
            .await?;
        debug!(
            "Fireflies connection test successful, got {} transcript(s)",
            body["data"]["transcripts"]
                .as_array()
                .map(Vec::len)
                .unwrap_or(0)
        );
        Ok(())
    }
}

#[async_trait]
impl GraphQLTransport for FirefliesClient {
    async fn execute(&self, query: &str, variables: Value) -> Result<Value, FirefliesError> {
        let payload = json!({
            "query": query,
            "variables": variables,
        });
        self.post(&payload).await
    }
}
