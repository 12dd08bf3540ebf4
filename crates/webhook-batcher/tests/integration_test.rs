// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use mockito::{Matcher, Server};
use reqwest::Url;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use webhook_batcher::{
    accumulator::Accumulator,
    config::Config,
    errors::{DeliveryError, SupervisorError},
    forwarder::HttpForwarder,
    intake,
    server::IntakeServer,
    supervisor::Supervisor,
};

struct Batcher {
    url: String,
    client: reqwest::Client,
    shutdown: CancellationToken,
    supervisor: JoinHandle<Result<(), SupervisorError>>,
}

impl Batcher {
    async fn post(&self, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}/log", self.url))
            .json(&body)
            .send()
            .await
            .expect("request to webhook server failed")
    }
}

fn test_config(post_endpoint: &str, batch_size: usize, batch_interval: Duration) -> Config {
    Config {
        batch_size,
        batch_interval,
        post_endpoint: Url::parse(post_endpoint).expect("invalid post endpoint"),
        port: 0,
        max_delivery_attempts: 3,
        retry_backoff: Duration::from_millis(10),
        request_timeout: Duration::from_secs(5),
        intake_queue_capacity: 16,
        max_request_content_length: 10 * 1024 * 1024,
    }
}

async fn start_batcher(config: Config) -> Batcher {
    let config = Arc::new(config);
    let shutdown = CancellationToken::new();
    let (intake, rx) = intake::channel(config.intake_queue_capacity);

    let forwarder = Arc::new(HttpForwarder::new(&config).expect("failed to build forwarder"));
    let supervisor = Supervisor::new(Accumulator::from_config(rx, &config), forwarder);
    let supervisor = tokio::spawn(supervisor.run());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("unable to bind webhook server");
    let addr = listener.local_addr().expect("no local address");
    let server = IntakeServer::new(config, intake, shutdown.clone());
    tokio::spawn(async move { server.serve(listener).await });

    Batcher {
        url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        shutdown,
        supervisor,
    }
}

fn event(name: &str) -> Value {
    json!({"timestamp": "2024-05-01T10:00:00Z", "event": {"name": name}})
}

async fn wait_until_matched(mock: &mockito::Mock) {
    let matched = async {
        while !mock.matched_async().await {
            sleep(Duration::from_millis(10)).await;
        }
    };
    if timeout(Duration::from_secs(5), matched).await.is_err() {
        panic!("timed out before the post endpoint received the batch");
    }
}

#[tokio::test]
async fn size_trigger_posts_records_in_arrival_order() {
    let mut downstream = Server::new_async().await;
    let mock = downstream
        .mock("POST", "/ingest")
        .match_header("Content-Type", "application/json")
        .match_body(Matcher::Json(json!([
            event("R1"),
            event("R2"),
            event("R3")
        ])))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let batcher = start_batcher(test_config(
        &format!("{}/ingest", downstream.url()),
        3,
        Duration::from_secs(60),
    ))
    .await;

    for name in ["R1", "R2", "R3"] {
        let response = batcher.post(event(name)).await;
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({"status": "ok"}));
    }

    wait_until_matched(&mock).await;
    batcher.shutdown.cancel();
    batcher.supervisor.await.unwrap().unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn interval_flush_posts_partial_batch() {
    let mut downstream = Server::new_async().await;
    let mock = downstream
        .mock("POST", "/")
        .match_body(Matcher::Json(json!([event("A"), event("B")])))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let batcher = start_batcher(test_config(
        &downstream.url(),
        3,
        Duration::from_secs(1),
    ))
    .await;

    batcher.post(event("A")).await;
    batcher.post(event("B")).await;

    wait_until_matched(&mock).await;
    batcher.shutdown.cancel();
    batcher.supervisor.await.unwrap().unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn empty_intervals_never_reach_the_endpoint() {
    let mut downstream = Server::new_async().await;
    let mock = downstream
        .mock("POST", "/")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let batcher = start_batcher(test_config(
        &downstream.url(),
        5,
        Duration::from_millis(50),
    ))
    .await;

    sleep(Duration::from_millis(300)).await;
    batcher.shutdown.cancel();
    batcher.supervisor.await.unwrap().unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn shutdown_flushes_accepted_records() {
    let mut downstream = Server::new_async().await;
    let mock = downstream
        .mock("POST", "/")
        .match_body(Matcher::Json(json!([event("late")])))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let batcher = start_batcher(test_config(
        &downstream.url(),
        10,
        Duration::from_secs(60),
    ))
    .await;

    assert_eq!(batcher.post(event("late")).await.status(), 200);
    batcher.shutdown.cancel();
    batcher.supervisor.await.unwrap().unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn failing_endpoint_stops_the_batcher() {
    let mut downstream = Server::new_async().await;
    let mock = downstream
        .mock("POST", "/")
        .with_status(500)
        .with_body("Internal Server Error")
        .expect(3)
        .create_async()
        .await;

    let batcher = start_batcher(test_config(
        &downstream.url(),
        1,
        Duration::from_secs(60),
    ))
    .await;

    // Accepted even though the downstream is failing.
    assert_eq!(batcher.post(event("doomed")).await.status(), 200);

    let result = timeout(Duration::from_secs(5), batcher.supervisor)
        .await
        .expect("supervisor did not stop")
        .unwrap();
    match result {
        Err(SupervisorError::Delivery { cycle, source }) => {
            assert_eq!(cycle, 1);
            assert!(matches!(
                source,
                DeliveryError::RetriesExhausted { attempts: 3, .. }
            ));
        }
        other => panic!("unexpected supervisor result: {other:?}"),
    }
    mock.assert_async().await;

    let response = batcher
        .client
        .post(format!("{}/log", batcher.url))
        .json(&event("rejected"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    batcher.shutdown.cancel();
}
