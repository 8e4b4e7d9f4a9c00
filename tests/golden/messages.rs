//! Pins the exact JSON shape of the error envelope and health response
//! across a representative error from each reachable-without-upstream
//! category, so a future refactor of `AppError`'s `Display` impls or the
//! envelope struct fields trips a diff here instead of surfacing as a
//! client-visible wire format change.

use axum::body::Body;
use axum::http::Request;
use tower::ServiceExt;

use crate::common::{add_credential, router, seeded_state, API_KEY};
use crate::golden_harness::GoldenTest;

async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn unauthorized_envelope_matches_golden() {
    let golden = GoldenTest::new("messages");
    let fixture = seeded_state().await;
    let app = router(fixture.state);

    let req = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let json = response_json(resp).await;

    golden.assert_json("unauthorized_missing_header", &json);
}

#[tokio::test]
async fn no_accounts_available_envelope_matches_golden() {
    let golden = GoldenTest::new("messages");
    let fixture = seeded_state().await;
    let app = router(fixture.state);

    let body = serde_json::json!({
        "model": "claude-sonnet-4-5",
        "max_tokens": 256,
        "messages": [{"role": "user", "content": "hi"}],
    });
    let req = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let json = response_json(resp).await;

    golden.assert_json("no_accounts_available", &json);
}

#[tokio::test]
async fn request_too_large_envelope_matches_golden() {
    let golden = GoldenTest::new("messages");
    let fixture = seeded_state().await;
    let app = router(fixture.state);

    let huge = "a".repeat(900_000);
    let body = serde_json::json!({
        "model": "claude-sonnet-4-5",
        "max_tokens": 4096,
        "messages": [{"role": "user", "content": huge}],
    });
    let req = Request::builder()
        .method("POST")
        .uri("/v1/messages")
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let json = response_json(resp).await;

    golden.assert_json("request_too_large", &json);
}

#[tokio::test]
async fn health_response_matches_golden_for_mixed_pool() {
    let golden = GoldenTest::new("messages");
    let fixture = seeded_state().await;
    add_credential(&fixture, "healthy-one").await;
    add_credential(&fixture, "unhealthy-one").await;
    fixture
        .state
        .pool
        .mark_unhealthy("unhealthy-one", "golden test setup")
        .await
        .unwrap();

    let app = router(fixture.state);
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let json = response_json(resp).await;

    golden.assert_json("health_mixed_pool", &json);
}
