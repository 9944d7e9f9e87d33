mod common;

use axum::http::StatusCode;
use serde_json::json;
use std::time::Duration;
use tap_fireflies::error::ApiErrorKind;
use tap_fireflies::{FirefliesClient, FirefliesError, GraphQLTransport};

use common::{api_error, fast_retries, MockFireflies, Reply};

fn users_body() -> serde_json::Value {
    json!({"data": {"users": [{"user_id": "u1", "email": "a@vibe.us"}]}})
}

#[tokio::test]
async fn test_sends_bearer_token_and_graphql_payload() {
    let mock = MockFireflies::sequence(vec![Reply::ok(users_body())]).await.unwrap();
    let client = FirefliesClient::new(&mock.config()).unwrap();

    let body = client
        .execute("query { users { user_id } }", json!({"limit": 5}))
        .await
        .unwrap();

    assert_eq!(body["data"]["users"][0]["user_id"], "u1");
    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer test-token"));
    assert!(requests[0]
        .content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("application/json")));
    assert_eq!(requests[0].body["query"], "query { users { user_id } }");
    assert_eq!(requests[0].body["variables"]["limit"], 5);
}

#[tokio::test]
async fn test_rate_limited_retries_until_exhausted() {
    let mock = MockFireflies::sequence(vec![Reply::json(
        StatusCode::TOO_MANY_REQUESTS,
        api_error("too_many_requests", 429),
    )])
    .await
    .unwrap();
    let client = FirefliesClient::new(&mock.config())
        .unwrap()
        .with_retry_policies(fast_retries());

    let err = client.execute("query { users { user_id } }", json!({})).await.unwrap_err();

    assert_eq!(err.api_kind(), Some(ApiErrorKind::RateLimited));
    assert_eq!(mock.requests().len(), 4);
}

#[tokio::test]
async fn test_server_error_then_success() {
    let mock = MockFireflies::sequence(vec![
        Reply::json(StatusCode::INTERNAL_SERVER_ERROR, api_error("internal", 500)),
        Reply::ok(users_body()),
    ])
    .await
    .unwrap();
    let client = FirefliesClient::new(&mock.config())
        .unwrap()
        .with_retry_policies(fast_retries());

    let body = client.execute("query { users { user_id } }", json!({})).await.unwrap();

    assert_eq!(body["data"]["users"][0]["email"], "a@vibe.us");
    assert_eq!(mock.requests().len(), 2);
}

#[tokio::test]
async fn test_forbidden_is_not_retried() {
    let mock = MockFireflies::sequence(vec![Reply::json(
        StatusCode::FORBIDDEN,
        api_error("forbidden", 403),
    )])
    .await
    .unwrap();
    let client = FirefliesClient::new(&mock.config())
        .unwrap()
        .with_retry_policies(fast_retries());

    let err = client.execute("query { users { user_id } }", json!({})).await.unwrap_err();

    assert_eq!(err.api_kind(), Some(ApiErrorKind::Forbidden));
    assert!(err.to_string().contains("Fireflies-error_status: 403"));
    assert_eq!(mock.requests().len(), 1);
}

#[tokio::test]
async fn test_errors_inside_ok_response_are_classified() {
    let mock = MockFireflies::sequence(vec![Reply::ok(api_error("object_not_found", 404))])
        .await
        .unwrap();
    let client = FirefliesClient::new(&mock.config())
        .unwrap()
        .with_retry_policies(fast_retries());

    let err = client.execute("query { users { user_id } }", json!({})).await.unwrap_err();

    assert_eq!(err.api_kind(), Some(ApiErrorKind::ObjectNotFound));
    assert_eq!(mock.requests().len(), 1);
}

#[tokio::test]
async fn test_truncated_body_is_retried_as_bad_response() {
    let mock = MockFireflies::sequence(vec![
        Reply::raw(StatusCode::OK, "{\"data\": {\"us"),
        Reply::ok(users_body()),
    ])
    .await
    .unwrap();
    let client = FirefliesClient::new(&mock.config())
        .unwrap()
        .with_retry_policies(fast_retries());

    let body = client.execute("query { users { user_id } }", json!({})).await.unwrap();

    assert_eq!(body["data"]["users"][0]["user_id"], "u1");
    assert_eq!(mock.requests().len(), 2);
}

#[tokio::test]
async fn test_slow_response_times_out_and_retries() {
    let mock = MockFireflies::sequence(vec![
        Reply::ok(users_body()).delayed(Duration::from_millis(500)),
        Reply::ok(users_body()),
    ])
    .await
    .unwrap();
    let config = mock.config().with_request_timeout(0.1);
    let client = FirefliesClient::new(&config)
        .unwrap()
        .with_retry_policies(fast_retries());

    let body = client.execute("query { users { user_id } }", json!({})).await.unwrap();

    assert_eq!(body["data"]["users"][0]["user_id"], "u1");
    assert_eq!(mock.requests().len(), 2);
}

#[tokio::test]
async fn test_timeouts_exhaust_their_own_budget() {
    let mock = MockFireflies::sequence(vec![
        Reply::ok(users_body()).delayed(Duration::from_millis(300)),
    ])
    .await
    .unwrap();
    let config = mock.config().with_request_timeout(0.05);
    let client = FirefliesClient::new(&config)
        .unwrap()
        .with_retry_policies(fast_retries());

    let err = client.execute("query { users { user_id } }", json!({})).await.unwrap_err();

    assert!(matches!(err, FirefliesError::Timeout(_)));
    assert_eq!(mock.requests().len(), 5);
}

#[tokio::test]
async fn test_connection_probe() {
    let mock = MockFireflies::sequence(vec![Reply::ok(json!({"data": {"transcripts": [{"id": "t1"}]}}))])
        .await
        .unwrap();
    let client = FirefliesClient::new(&mock.config()).unwrap();

    client.test_connection().await.unwrap();

    assert_eq!(mock.requests()[0].body["variables"]["limit"], 1);
}

#[tokio::test]
async fn test_calls_are_held_back_at_the_rate_ceiling() {
    let mock = MockFireflies::sequence(vec![Reply::ok(users_body())]).await.unwrap();
    // 600/min allows one call every 100ms.
    let client = FirefliesClient::new(&mock.config())
        .unwrap()
        .with_rate_limit(600);
    let started = std::time::Instant::now();

    for _ in 0..4 {
        client.execute("query { users { user_id } }", json!({})).await.unwrap();
    }

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(mock.requests().len(), 4);
}
