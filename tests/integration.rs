//! Integration tests for tower-bayeux
//!
//! Tests the full HTTP flow through the transport registry: handshake,
//! subscription, publish fan-out, and both framings (JSON array and
//! callback invocation).

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use serde_json::json;
use tower::ServiceExt;
use tower_bayeux::{BayeuxServer, Message, channel};

// =============================================================================
// Test fixtures
// =============================================================================

/// A bus with a short meta-connect hold so empty polls return quickly.
fn create_test_app() -> Router {
    BayeuxServer::new()
        .option("timeout", "100")
        .into_router()
        .expect("valid default configuration")
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.expect("infallible app")
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("readable body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

fn json_post(batch: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(batch.to_string()))
        .expect("valid request")
}

fn jsonp_get(pairs: &[(&str, &str)]) -> Request<Body> {
    let query = serde_urlencoded::to_string(pairs).expect("encodable query");
    Request::builder()
        .method("GET")
        .uri(format!("/?{query}"))
        .body(Body::empty())
        .expect("valid request")
}

/// Strip `<callback>(` and `)` from a JSONP body and parse the array.
fn unwrap_jsonp(body: &str, callback: &str) -> Vec<Message> {
    let inner = body
        .strip_prefix(&format!("{callback}("))
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or_else(|| panic!("not a {callback}(...) invocation: {body}"));
    serde_json::from_str(inner).expect("parseable message array")
}

async fn handshake_over_post(app: &Router) -> String {
    let response = send(app, json_post(json!([{"channel": "/meta/handshake"}]))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let replies: Vec<Message> = serde_json::from_str(&body_string(response).await).unwrap();
    replies[0].client_id.clone().expect("client id assigned")
}

async fn handshake_over_jsonp(app: &Router, callback: &str) -> String {
    let response = send(
        app,
        jsonp_get(&[
            ("jsonp", callback),
            ("message", r#"[{"channel":"/meta/handshake"}]"#),
        ]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let replies = unwrap_jsonp(&body_string(response).await, callback);
    replies[0].client_id.clone().expect("client id assigned")
}

// =============================================================================
// Callback-polling flow
// =============================================================================

#[tokio::test]
async fn jsonp_connect_is_a_complete_callback_invocation() {
    let app = create_test_app();
    let client_id = handshake_over_jsonp(&app, "myCb").await;

    let connect = format!(
        r#"[{{"channel":"/meta/connect","clientId":"{client_id}","connectionType":"callback-polling"}}]"#
    );
    let response = send(&app, jsonp_get(&[("jsonp", "myCb"), ("message", &connect)])).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/javascript;charset=UTF-8")
    );

    let body = body_string(response).await;
    assert!(body.starts_with("myCb(["), "unexpected body: {body}");
    assert!(body.ends_with("])"), "unexpected body: {body}");

    let replies = unwrap_jsonp(&body, "myCb");
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].channel(), channel::META_CONNECT);
    assert_eq!(replies[0].successful, Some(true));
}

#[tokio::test]
async fn jsonp_empty_batch_still_yields_an_executable_document() {
    let app = create_test_app();

    let response = send(&app, jsonp_get(&[("jsonp", "cb"), ("message", "[]")])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "cb([])");
}

#[tokio::test]
async fn jsonp_configuration_overrides_apply() {
    let app = BayeuxServer::new()
        .option("timeout", "100")
        .option("long-polling.jsonp.callbackParameter", "cb")
        .option("long-polling.jsonp.mimeType", "application/json")
        .into_router()
        .unwrap();

    // The configured parameter name is recognized...
    let response = send(
        &app,
        jsonp_get(&[("cb", "foo"), ("message", r#"[{"channel":"/meta/handshake"}]"#)]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
    let body = body_string(response).await;
    assert!(body.starts_with("foo(["));

    // ...and the default one no longer is.
    let response = send(
        &app,
        jsonp_get(&[
            ("jsonp", "foo"),
            ("message", r#"[{"channel":"/meta/handshake"}]"#),
        ]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn gets_without_a_usable_callback_are_rejected() {
    let app = create_test_app();

    // No callback parameter: belongs to no transport.
    let response = send(
        &app,
        jsonp_get(&[("message", r#"[{"channel":"/meta/handshake"}]"#)]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Empty callback value.
    let response = send(&app, jsonp_get(&[("jsonp", ""), ("message", "[]")])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // A callback that is not a plain identifier path.
    let response = send(
        &app,
        jsonp_get(&[("jsonp", "alert(1);x"), ("message", "[]")]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_message_json_is_a_client_error() {
    let app = create_test_app();

    let response = send(
        &app,
        jsonp_get(&[("jsonp", "cb"), ("message", r#"[{"channel":"#)]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn jsonp_missing_message_parameter_is_a_client_error() {
    let app = create_test_app();
    let response = send(&app, jsonp_get(&[("jsonp", "cb")])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Publish fan-out and delivery-mode constraint
// =============================================================================

#[tokio::test]
async fn published_messages_ride_the_meta_connect_poll() {
    let app = create_test_app();

    let subscriber = handshake_over_jsonp(&app, "cb").await;
    let publisher = handshake_over_post(&app).await;

    // Subscribe over callback-polling.
    let subscribe = format!(
        r#"[{{"channel":"/meta/subscribe","clientId":"{subscriber}","subscription":"/chat/demo"}}]"#
    );
    let response = send(&app, jsonp_get(&[("jsonp", "cb"), ("message", &subscribe)])).await;
    let replies = unwrap_jsonp(&body_string(response).await, "cb");
    assert_eq!(replies[0].successful, Some(true));

    // Publish from the other session.
    let response = send(
        &app,
        json_post(json!([{
            "channel": "/chat/demo",
            "clientId": publisher,
            "data": {"text": "hi"}
        }])),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // A non-connect request must not carry the queued message: the
    // session was handshaken over callback-polling and is restricted to
    // meta-connect delivery.
    let other_subscribe = format!(
        r#"[{{"channel":"/meta/subscribe","clientId":"{subscriber}","subscription":"/other"}}]"#
    );
    let response = send(
        &app,
        jsonp_get(&[("jsonp", "cb"), ("message", &other_subscribe)]),
    )
    .await;
    let replies = unwrap_jsonp(&body_string(response).await, "cb");
    assert_eq!(replies.len(), 1, "queued data leaked onto a non-connect response");
    assert_eq!(replies[0].channel(), channel::META_SUBSCRIBE);

    // The meta-connect poll delivers it, data before the connect reply.
    let connect = format!(
        r#"[{{"channel":"/meta/connect","clientId":"{subscriber}","connectionType":"callback-polling"}}]"#
    );
    let response = send(&app, jsonp_get(&[("jsonp", "cb"), ("message", &connect)])).await;
    let replies = unwrap_jsonp(&body_string(response).await, "cb");
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].channel(), "/chat/demo");
    assert_eq!(replies[0].data, Some(json!({"text": "hi"})));
    assert_eq!(replies[1].channel(), channel::META_CONNECT);
    assert_eq!(replies[1].successful, Some(true));
}

#[tokio::test]
async fn suspended_connect_wakes_when_a_message_arrives() {
    // Long hold: the poll must resume on delivery, not on timeout.
    let app = BayeuxServer::new()
        .option("timeout", "5000")
        .into_router()
        .unwrap();

    let subscriber = handshake_over_jsonp(&app, "cb").await;
    let publisher = handshake_over_post(&app).await;

    let subscribe = format!(
        r#"[{{"channel":"/meta/subscribe","clientId":"{subscriber}","subscription":"/news"}}]"#
    );
    send(&app, jsonp_get(&[("jsonp", "cb"), ("message", &subscribe)])).await;

    let connect = format!(
        r#"[{{"channel":"/meta/connect","clientId":"{subscriber}","connectionType":"callback-polling"}}]"#
    );
    let poll_app = app.clone();
    let poll = tokio::spawn(async move {
        let started = std::time::Instant::now();
        let response = send(&poll_app, jsonp_get(&[("jsonp", "cb"), ("message", &connect)])).await;
        (body_string(response).await, started.elapsed())
    });

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    send(
        &app,
        json_post(json!([{
            "channel": "/news",
            "clientId": publisher,
            "data": "flash"
        }])),
    )
    .await;

    let (body, elapsed) = poll.await.unwrap();
    let replies = unwrap_jsonp(&body, "cb");
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].channel(), "/news");
    assert_eq!(replies[0].data, Some(json!("flash")));
    assert_eq!(replies[1].channel(), channel::META_CONNECT);
    assert!(
        elapsed < std::time::Duration::from_secs(4),
        "poll only resumed at timeout: {elapsed:?}"
    );
}

// =============================================================================
// JSON long-polling flow
// =============================================================================

#[tokio::test]
async fn long_polling_batch_flow() {
    let app = create_test_app();
    let client_id = handshake_over_post(&app).await;

    // Subscribe and publish to the subscribed channel in one batch: the
    // session is not restricted to meta-connect delivery, so the
    // published copy may piggyback on this same response.
    let response = send(
        &app,
        json_post(json!([
            {"channel": "/meta/subscribe", "clientId": client_id, "subscription": "/echo"},
            {"channel": "/echo", "clientId": client_id, "data": "hi"}
        ])),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/json;charset=UTF-8")
    );

    let replies: Vec<Message> = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0].channel(), channel::META_SUBSCRIBE);
    assert_eq!(replies[0].successful, Some(true));
    assert_eq!(replies[1].channel(), "/echo");
    assert_eq!(replies[1].successful, Some(true));
    // The delivered copy, flushed after the replies.
    assert_eq!(replies[2].channel(), "/echo");
    assert_eq!(replies[2].data, Some(json!("hi")));
    assert_eq!(replies[2].successful, None);
}

#[tokio::test]
async fn unknown_sessions_are_advised_to_rehandshake() {
    let app = create_test_app();

    let response = send(
        &app,
        json_post(json!([{"channel": "/meta/connect", "clientId": "stale"}])),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let replies: Vec<Message> = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(replies[0].successful, Some(false));
    assert!(replies[0].error.as_deref().unwrap().starts_with("402::"));
    let advice = replies[0].advice.as_ref().unwrap();
    assert_eq!(advice.reconnect, Some(tower_bayeux::Reconnect::Handshake));
}

#[tokio::test]
async fn disconnect_ends_the_session() {
    let app = create_test_app();
    let client_id = handshake_over_post(&app).await;

    let response = send(
        &app,
        json_post(json!([{"channel": "/meta/disconnect", "clientId": client_id}])),
    )
    .await;
    let replies: Vec<Message> = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(replies[0].successful, Some(true));

    // The session is gone; a connect now fails.
    let response = send(
        &app,
        json_post(json!([{"channel": "/meta/connect", "clientId": client_id}])),
    )
    .await;
    let replies: Vec<Message> = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(replies[0].successful, Some(false));
}
