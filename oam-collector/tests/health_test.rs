mod common;

use common::{logged_in_user, rbac_user, Workspace};
use oam_collector::services::metrics::init_metrics;
use oam_collector::startup::health_router;
use serde_json::Value;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use wiremock::MockServer;

async fn spawn_health(users: Vec<std::sync::Arc<oam_collector::models::User>>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind health listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, health_router(users))
            .await
            .expect("health server failed");
    });
    addr
}

#[tokio::test]
async fn readiness_requires_every_session() {
    let server = MockServer::start().await;
    let workspace = Workspace::new();
    let ready = logged_in_user(&server, workspace.path(), &["nhg-1"]).await;
    let down = rbac_user();

    let addr = spawn_health(vec![ready.clone(), down]).await;
    let http = reqwest::Client::new();

    let response = http
        .get(format!("http://{addr}/ready"))
        .send()
        .await
        .expect("ready request");
    assert_eq!(response.status().as_u16(), 503);

    let response = http
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .expect("health request");
    assert_eq!(response.status().as_u16(), 200);

    let body: Value = response.json().await.expect("health body is JSON");
    assert_eq!(body["status"], "degraded");
    let sessions = body["sessions"].as_array().expect("sessions array");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["alive"], true);
    assert_eq!(sessions[0]["groups"], 1);
    assert_eq!(sessions[0]["hardware"], 0);
    assert_eq!(sessions[1]["phase"], "logged_out");
}

#[tokio::test]
async fn all_sessions_alive_is_ready() {
    let server = MockServer::start().await;
    let workspace = Workspace::new();
    let user = logged_in_user(&server, workspace.path(), &[]).await;

    let addr = spawn_health(vec![user]).await;
    let response = reqwest::get(format!("http://{addr}/ready"))
        .await
        .expect("ready request");
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
async fn metrics_are_exposed_in_prometheus_format() {
    init_metrics().expect("recorder installs");
    oam_collector::services::metrics::record_skipped("pmdata");

    let addr = spawn_health(vec![]).await;
    let response = reqwest::get(format!("http://{addr}/metrics"))
        .await
        .expect("metrics request");
    assert_eq!(response.status().as_u16(), 200);

    let body = response.text().await.expect("metrics body");
    assert!(body.contains("oam_fetch_skipped_total"));
}
