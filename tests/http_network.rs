use std::time::Duration;

use serde_json::{json, Value};
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use airsoft_sync::session::health::check_health;
use airsoft_sync::{HttpNetwork, Network, NetworkError};

fn url(server: &MockServer, route: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), route)).unwrap()
}

#[tokio::test]
async fn health_accepts_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .expect(1)
        .mount(&server)
        .await;

    let network = HttpNetwork::new().unwrap();
    assert!(network.fetch_health(&url(&server, "/")).await.is_ok());
}

#[tokio::test]
async fn health_accepts_plain_text_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Airsoft server up"))
        .mount(&server)
        .await;

    let network = HttpNetwork::new().unwrap();
    assert!(network.fetch_health(&url(&server, "/")).await.is_ok());
}

#[tokio::test]
async fn health_rejects_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let network = HttpNetwork::new().unwrap();
    let err = network.fetch_health(&url(&server, "/")).await.unwrap_err();
    assert!(matches!(err, NetworkError::Status(500)));
}

#[tokio::test]
async fn slow_health_check_is_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let network = HttpNetwork::new().unwrap();
    let healthy = check_health(&network, &url(&server, "/"), Duration::from_millis(200)).await;
    assert!(!healthy);
}

#[tokio::test]
async fn post_reports_status_code() {
    let server = MockServer::start().await;
    let body = json!({ "playerId": "p1", "player": {}, "timestamp": 1 });
    Mock::given(method("POST"))
        .and(path("/api/player/join"))
        .and(header("content-type", "application/json"))
        .and(body_json(body.clone()))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let network = HttpNetwork::new().unwrap();
    let status = network
        .post_json(&url(&server, "/api/player/join"), &body)
        .await
        .unwrap();
    assert_eq!(status, 429);
}

#[tokio::test]
async fn wrapped_client_keeps_its_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/player/leave"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let network = HttpNetwork::with_client(client);

    let body = json!({ "playerId": "p1" });
    let err = network
        .post_json(&url(&server, "/api/player/leave"), &body)
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::Request(ref e) if e.is_timeout()));
}

#[tokio::test]
async fn event_stream_forwards_frames() {
    let server = MockServer::start().await;
    let sse = concat!(
        "data: {\"type\":\"game_state\",\"data\":{\"timeLeft\":120}}\n\n",
        "event: hit\n",
        "data: {\"playerId\":\"p2\",\"damage\":25}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let network = HttpNetwork::new().unwrap();
    let mut stream = network
        .open_stream(&url(&server, "/api/events"))
        .await
        .unwrap();

    let first: Value = serde_json::from_str(&stream.recv().await.unwrap()).unwrap();
    assert_eq!(first["type"], json!("game_state"));

    let second: Value = serde_json::from_str(&stream.recv().await.unwrap()).unwrap();
    assert_eq!(second["type"], json!("hit"));
    assert_eq!(second["damage"], json!(25));

    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn event_stream_rejects_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let network = HttpNetwork::new().unwrap();
    let err = network
        .open_stream(&url(&server, "/api/events"))
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::Status(503)));
}

#[tokio::test]
async fn socket_to_closed_port_is_an_error() {
    let network = HttpNetwork::new().unwrap();
    let url = Url::parse("ws://127.0.0.1:9/game?playerId=p1").unwrap();
    assert!(network.open_socket(&url).await.is_err());
}
