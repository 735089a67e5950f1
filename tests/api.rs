mod common;

use std::time::Duration;

use franz::handlers::{INSERT_CHANNEL, INSERT_USER};
use franz::{Body, DeliveryMode, Param, Request, Server};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, StatusCode};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn post_json(path: &str, body: &str) -> Request {
    Request::new(Method::POST, path)
        .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .with_body(body.to_owned())
}

fn json_body(body: &Body) -> serde_json::Value {
    match body {
        Body::Json(value) => value.clone(),
        other => panic!("expected a JSON body, got {other:?}"),
    }
}

#[tokio::test]
async fn post_chat_produces_one_message() {
    let app = common::app();

    let reply = app.service.handle(post_json("/chat", r#"{"channel":"general","msg":"hi"}"#)).await;

    assert_eq!(reply.status(), StatusCode::OK);
    assert_eq!(json_body(reply.body()), json!({ "msg": "ok" }));

    let sent = app.broker.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "chat");
    assert_eq!(sent[0].key.as_deref(), Some("general"));
    assert_eq!(&sent[0].payload[..], b"hi");
}

#[tokio::test]
async fn create_channel_inserts_a_row() {
    let app = common::app();

    let reply = app.service.handle(post_json("/create/channel", r#"{"channel":"general"}"#)).await;

    assert_eq!(reply.status(), StatusCode::OK);
    let executed = app.store.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].0, INSERT_CHANNEL);
    assert!(matches!(executed[0].1[0], Param::Uuid(_)));
    assert_eq!(executed[0].1[1], Param::Text("general".into()));
}

#[tokio::test]
async fn create_user_inserts_a_row() {
    let app = common::app();

    let reply = app.service.handle(post_json("/create/user", r#"{"user":"ada"}"#)).await;

    assert_eq!(reply.status(), StatusCode::OK);
    let executed = app.store.executed();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].0, INSERT_USER);
    assert_eq!(executed[0].1[1], Param::Text("ada".into()));
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let app = common::app();

    let reply = app.service.handle(post_json("/chat", "{not json")).await;

    assert_eq!(reply.status(), StatusCode::BAD_REQUEST);
    assert!(app.broker.sent().is_empty());
}

#[tokio::test]
async fn malformed_body_never_reaches_the_store() {
    let app = common::app();

    for (path, body) in [
        ("/create/channel", "{not json"),
        ("/create/channel", r#"{"name":"general"}"#),
        ("/create/user", "{not json"),
        ("/create/user", r#"{"user": 7}"#),
    ] {
        let reply = app.service.handle(post_json(path, body)).await;
        assert_eq!(reply.status(), StatusCode::BAD_REQUEST, "{path} {body}");
    }
    assert!(app.store.executed().is_empty());
}

#[tokio::test]
async fn post_chat_in_async_mode_is_delivered_by_close() {
    let app = common::app_with_mode(DeliveryMode::Async);

    let reply = app.service.handle(post_json("/chat", r#"{"channel":"general","msg":"hi"}"#)).await;
    assert_eq!(reply.status(), StatusCode::OK);
    assert_eq!(json_body(reply.body()), json!({ "msg": "ok" }));

    app.state.producer.close(Duration::from_secs(1)).await.unwrap();

    let sent = app.broker.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "chat");
    assert_eq!(&sent[0].payload[..], b"hi");
    assert_eq!(app.state.producer.delivery_failures(), 0);
}

#[tokio::test]
async fn wrong_content_type_is_rejected_before_the_handler() {
    let app = common::app();
    let req = Request::new(Method::POST, "/create/user")
        .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
        .with_body(r#"{"user":"ada"}"#);

    let reply = app.service.handle(req).await;

    assert_eq!(reply.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(app.store.executed().is_empty());
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = common::app();
    let reply = app.service.handle(Request::new(Method::GET, "/nope")).await;
    assert_eq!(reply.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn wrong_method_lists_allowed_methods() {
    let app = common::app();
    let reply = app.service.handle(Request::new(Method::GET, "/chat")).await;
    assert_eq!(reply.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(reply.headers().get(http::header::ALLOW).unwrap(), "POST");
    assert_eq!(json_body(reply.body())["allow"], json!(["POST"]));
}

#[tokio::test]
async fn health_probes_answer() {
    let app = common::app();

    let live = app.service.handle(Request::new(Method::GET, "/healthz")).await;
    assert_eq!(live.status(), StatusCode::OK);

    let ready = app.service.handle(Request::new(Method::GET, "/readyz")).await;
    assert_eq!(ready.status(), StatusCode::OK);

    app.state.producer.close(Duration::from_millis(100)).await.unwrap();
    let ready = app.service.handle(Request::new(Method::GET, "/readyz")).await;
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn chat_after_close_is_unavailable() {
    let app = common::app();
    app.state.producer.close(Duration::from_millis(100)).await.unwrap();

    let reply = app.service.handle(post_json("/chat", r#"{"channel":"general","msg":"hi"}"#)).await;

    assert_eq!(reply.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(app.broker.sent().is_empty());
}

#[tokio::test]
async fn serves_over_tcp_and_shuts_down() {
    let app = common::app();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(
        Server::from_listener(listener).serve_with_shutdown(app.service, async {
            let _ = stopped.await;
        }),
    );

    let body = r#"{"channel":"general","msg":"over the wire"}"#;
    let request = format!(
        "POST /chat HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("application/json"));
    assert!(response.ends_with(r#"{"msg":"ok"}"#));
    assert_eq!(app.broker.sent().len(), 1);

    stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .expect("server stops after the shutdown signal")
        .unwrap()
        .unwrap();
}
