use crate::dispatchers::webhook::WebhookDispatcher;
use crate::plugin::DispatcherRegistry;
use crate::{DispatchErrorKind, NotificationDispatcher, NotificationPayload};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/push")
}

fn payload() -> NotificationPayload {
    NotificationPayload {
        title: "⏰ Runtime Alert".into(),
        body: "web-1 has been running for 1h 0m".into(),
        data: BTreeMap::from([("alertId".to_string(), "r1_i-1_60".to_string())]),
    }
}

fn dispatcher(url: &str) -> WebhookDispatcher {
    WebhookDispatcher::new(url, BTreeMap::new(), Duration::from_secs(5)).unwrap()
}

#[test]
fn default_registry_has_builtin_dispatchers() {
    let registry = DispatcherRegistry::default();
    let mut names = registry.plugin_names();
    names.sort();
    assert_eq!(names, vec!["log", "webhook"]);
}

#[test]
fn unknown_kind_is_rejected() {
    let registry = DispatcherRegistry::default();
    assert!(registry.create_dispatcher("sms", &json!({})).is_err());
}

#[test]
fn webhook_config_is_validated() {
    let registry = DispatcherRegistry::default();
    assert!(registry.create_dispatcher("webhook", &json!({})).is_err());
    assert!(registry
        .create_dispatcher("webhook", &json!({"url": "ftp://push"}))
        .is_err());
    let d = registry
        .create_dispatcher(
            "webhook",
            &json!({"url": "https://push.example.com/v1/send", "headers": {"Authorization": "Bearer x"}}),
        )
        .unwrap();
    assert_eq!(d.dispatcher_name(), "webhook");
}

#[tokio::test]
async fn log_dispatcher_always_succeeds() {
    let d = DispatcherRegistry::default()
        .create_dispatcher("log", &Value::Null)
        .unwrap();
    let id = d.send("tok", &payload()).await.unwrap();
    assert!(id.starts_with("log-"));
}

#[tokio::test]
async fn webhook_posts_message_and_returns_gateway_id() {
    let seen: Arc<Mutex<Option<(Value, Option<String>)>>> = Arc::new(Mutex::new(None));
    let captured = seen.clone();
    let router = Router::new().route(
        "/push",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let captured = captured.clone();
            async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                *captured.lock().unwrap() = Some((body, auth));
                Json(json!({"name": "projects/demo/messages/42"}))
            }
        }),
    );
    let url = serve(router).await;
    let headers = BTreeMap::from([("Authorization".to_string(), "Bearer secret".to_string())]);
    let d = WebhookDispatcher::new(&url, headers, Duration::from_secs(5)).unwrap();

    let id = d.send("device-token", &payload()).await.unwrap();
    assert_eq!(id, "projects/demo/messages/42");

    let (body, auth) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer secret"));
    assert_eq!(body["message"]["token"], "device-token");
    assert_eq!(body["message"]["notification"]["title"], "⏰ Runtime Alert");
    assert_eq!(body["message"]["data"]["alertId"], "r1_i-1_60");
}

#[tokio::test]
async fn webhook_without_id_in_response_generates_one() {
    let router = Router::new().route("/push", post(|| async { StatusCode::NO_CONTENT }));
    let d = dispatcher(&serve(router).await);
    let id = d.send("t", &payload()).await.unwrap();
    assert!(id.starts_with("webhook-"));
}

#[tokio::test]
async fn webhook_classifies_failures() {
    let router = Router::new()
        .route("/push", post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }))
        .route("/gone", post(|| async { (StatusCode::NOT_FOUND, "UNREGISTERED") }))
        .route("/slow", post(|| async { StatusCode::TOO_MANY_REQUESTS }));
    let url = serve(router).await;

    let err = dispatcher(&url).send("t", &payload()).await.unwrap_err();
    assert_eq!(err.kind, DispatchErrorKind::Transient);
    assert!(err.detail.contains("busy"));

    let err = dispatcher(&url.replace("/push", "/gone"))
        .send("t", &payload())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DispatchErrorKind::Permanent);
    assert!(err.detail.contains("UNREGISTERED"));

    let err = dispatcher(&url.replace("/push", "/slow"))
        .send("t", &payload())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DispatchErrorKind::Transient);
}

#[tokio::test]
async fn unreachable_gateway_is_transient() {
    // Bind then drop to get a port with nothing listening.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = dispatcher(&format!("http://{addr}/push"))
        .send("t", &payload())
        .await
        .unwrap_err();
    assert_eq!(err.kind, DispatchErrorKind::Transient);
}
