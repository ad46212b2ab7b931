//! Integration tests against a running server.
//!
//! The server is spawned on a random port with mock providers, so no
//! network access is needed.
//! Run with: cargo test -p studio-service --test health_check

use reqwest::Client;
use std::time::Duration;
use studio_service::config::StudioConfig;
use studio_service::startup::Application;

/// Spawn the application on a random port and return the port number.
async fn spawn_app() -> u16 {
    let mut config = StudioConfig::mock();
    config.gate.delay = Duration::from_millis(10);

    let app = Application::build(config)
        .await
        .expect("Failed to build application");

    let port = app.port();

    // Spawn the server in the background
    tokio::spawn(async move {
        let _ = app.run_until_stopped().await;
    });

    port
}

#[tokio::test]
async fn health_check_returns_ok() {
    let port = spawn_app().await;
    let client = Client::new();

    let response = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "studio-service");
}

#[tokio::test]
async fn readiness_check_reports_mock_models() {
    let port = spawn_app().await;
    let client = Client::new();

    let response = client
        .get(format!("http://127.0.0.1:{}/ready", port))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["chat_model"], "mock-chat");
    assert_eq!(body["image_model"], "mock-image");
}

#[tokio::test]
async fn login_then_logout_over_http() {
    let port = spawn_app().await;
    let client = Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let response = client
        .post(format!("{}/auth/login", base))
        .json(&serde_json::json!({ "username": "kalky", "password": "Sivam@111" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/edit/sessions", base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let response = client
        .post(format!("{}/auth/logout", base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .post(format!("{}/edit/sessions", base))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn metrics_endpoint_exposes_login_counter() {
    let port = spawn_app().await;
    let client = Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    client
        .post(format!("{}/auth/login", base))
        .json(&serde_json::json!({ "username": "nobody", "password": "x" }))
        .send()
        .await
        .unwrap();

    let text = client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("studio_logins_total"));
}
