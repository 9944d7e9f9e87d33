use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Router};
use serde_json::{json, Value};
use shared::RetryPolicy;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tap_fireflies::error::RetryPolicies;
use tap_fireflies::TapConfig;
use tokio::net::TcpListener;
use tokio::time::sleep;

pub const START_DATE: &str = "2024-01-01T00:00:00Z";
pub const START_MS: i64 = 1_704_067_200_000;

/// What the mock answers for one call: status, raw body and an optional
/// delay before responding.
pub struct Reply {
    pub status: StatusCode,
    pub body: String,
    pub delay: Option<Duration>,
}

impl Reply {
    pub fn json(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(StatusCode::OK, body)
    }

    pub fn raw(status: StatusCode, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

pub fn api_error(code: &str, status: u16) -> Value {
    json!({
        "errors": [{
            "message": format!("{} happened", code),
            "code": code,
            "extensions": {"status": status}
        }],
        "data": null
    })
}

type Responder = Arc<dyn Fn(usize, &Value) -> Reply + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub body: Value,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Clone)]
struct MockState {
    responder: Responder,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// A Fireflies GraphQL endpoint on a random local port.
pub struct MockFireflies {
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    _server_handle: tokio::task::JoinHandle<()>,
}

impl MockFireflies {
    pub async fn start<F>(responder: F) -> anyhow::Result<Self>
    where
        F: Fn(usize, &Value) -> Reply + Send + Sync + 'static,
    {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let state = MockState {
            responder: Arc::new(responder),
            requests: requests.clone(),
        };

        let app = Router::new()
            .route("/graphql", post(handle_graphql))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let server_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        sleep(Duration::from_millis(50)).await;

        Ok(Self {
            url: format!("http://127.0.0.1:{}/graphql", port),
            requests,
            _server_handle: server_handle,
        })
    }

    /// Serves the replies in order; the last one repeats.
    pub async fn sequence(replies: Vec<Reply>) -> anyhow::Result<Self> {
        let replies = Mutex::new(replies);
        Self::start(move |_, _| {
            let mut replies = replies.lock().unwrap();
            if replies.len() > 1 {
                replies.remove(0)
            } else {
                let last = &replies[0];
                Reply {
                    status: last.status,
                    body: last.body.clone(),
                    delay: last.delay,
                }
            }
        })
        .await
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn config(&self) -> TapConfig {
        TapConfig::new("test-token", &self.url, START_DATE).unwrap()
    }
}

async fn handle_graphql(
    State(state): State<MockState>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let body: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    let call = {
        let mut requests = state.requests.lock().unwrap();
        requests.push(RecordedRequest {
            body: body.clone(),
            authorization: header("authorization"),
            content_type: header("content-type"),
        });
        requests.len() - 1
    };

    let reply = (state.responder)(call, &body);
    if let Some(delay) = reply.delay {
        sleep(delay).await;
    }
    (reply.status, reply.body)
}

pub fn fast_retries() -> RetryPolicies {
    RetryPolicies {
        timeout: RetryPolicy::new("timeout", 5, Duration::from_millis(5)),
        transient: RetryPolicy::new("transient", 4, Duration::from_millis(5)),
    }
}
