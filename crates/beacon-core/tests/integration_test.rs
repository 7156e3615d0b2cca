// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server};

use beacon_core::{Client, ClientOptions, Hub, Level, SpanOptions};

fn options_for(server_url: &str) -> ClientOptions {
    let host = server_url.strip_prefix("http://").expect("mock url is http");
    let mut options = ClientOptions::default();
    options.dsn = Some(
        format!("http://mock-key@{host}/1")
            .parse()
            .expect("failed to parse dsn"),
    );
    options.release = Some("backend@1.0.0".to_string());
    options.environment = Some("test".to_string());
    options
}

#[tokio::test]
async fn captured_message_reaches_the_collector_with_scope_context() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/1/envelope/")
        .match_header("X-Beacon-Auth", Matcher::Regex("beacon_key=mock-key".to_string()))
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""type":"event""#.to_string()),
            Matcher::Regex(r#""message":"disk is full""#.to_string()),
            Matcher::Regex(r#""env":"integration""#.to_string()),
            Matcher::Regex(r#""release":"backend@1.0.0""#.to_string()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let client = Client::new(options_for(&server.url())).expect("failed to build client");
    let hub = Hub::new(Arc::clone(&client));
    hub.configure_scope(|scope| scope.set_tag("env", "integration"));
    hub.capture_message("disk is full", Level::Error);

    assert!(client.flush(Duration::from_secs(2)).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn finished_root_span_ships_a_transaction_with_children() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/1/envelope/")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""type":"transaction""#.to_string()),
            Matcher::Regex(r#""transaction":"GET /users""#.to_string()),
            Matcher::Regex(r#""op":"db.query""#.to_string()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let mut options = options_for(&server.url());
    options.traces_sample_rate = Some(1.0);
    let client = Client::new(options).expect("failed to build client");
    let hub = Hub::new(Arc::clone(&client));

    hub.start_span(SpanOptions::new("GET /users", "http.server"), |hub, _span| {
        hub.start_span(SpanOptions::new("SELECT users", "db.query"), |_, _| {});
    });

    assert!(client.flush(Duration::from_secs(2)).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn unsampled_trace_sends_nothing() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/1/envelope/")
        .match_body(Matcher::Regex(r#""type":"transaction""#.to_string()))
        .expect(0)
        .create_async()
        .await;

    let mut options = options_for(&server.url());
    options.traces_sample_rate = Some(0.0);
    let client = Client::new(options).expect("failed to build client");
    let hub = Hub::new(Arc::clone(&client));

    hub.start_span(SpanOptions::new("GET /users", "http.server"), |_, span| {
        assert!(!span.is_sampled());
    });

    assert!(client.flush(Duration::from_secs(2)).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn rate_limited_errors_drop_locally_and_appear_in_client_report() {
    let mut server = Server::new_async().await;
    let rejected = server
        .mock("POST", "/api/1/envelope/")
        .match_body(Matcher::Regex(r#""type":"event""#.to_string()))
        .with_status(429)
        .with_header("x-beacon-rate-limits", "60:error:org")
        .expect(1)
        .create_async()
        .await;
    let report = server
        .mock("POST", "/api/1/envelope/")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""type":"client_report""#.to_string()),
            Matcher::Regex(r#""reason":"ratelimit_backoff""#.to_string()),
            Matcher::Regex(r#""category":"error""#.to_string()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let client = Client::new(options_for(&server.url())).expect("failed to build client");
    let hub = Hub::new(Arc::clone(&client));

    hub.capture_message("first", Level::Error);
    assert!(client.flush(Duration::from_secs(2)).await);

    // now limited: dropped before any network call
    hub.capture_message("second", Level::Error);
    assert!(client.flush(Duration::from_secs(2)).await);

    rejected.assert_async().await;
    report.assert_async().await;
}

#[tokio::test]
async fn isolation_scopes_aggregate_sessions() {
    let mut server = Server::new_async().await;
    let sessions = server
        .mock("POST", "/api/1/envelope/")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#""type":"sessions""#.to_string()),
            Matcher::Regex(r#""errored":1"#.to_string()),
            Matcher::Regex(r#""exited":1"#.to_string()),
        ]))
        .with_status(200)
        .create_async()
        .await;

    let client = Client::new(options_for(&server.url())).expect("failed to build client");
    let hub = Hub::new(Arc::clone(&client));

    hub.with_isolation_scope(|hub| {
        hub.capture_message("request failed", Level::Error);
    });
    hub.with_isolation_scope(|_hub| {
        // clean request
    });

    assert!(client.flush(Duration::from_secs(2)).await);
    sessions.assert_async().await;
}

#[tokio::test]
async fn close_rejects_further_captures() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/1/envelope/")
        .match_body(Matcher::Regex(r#""type":"event""#.to_string()))
        .expect(1)
        .create_async()
        .await;

    let mut options = options_for(&server.url());
    options.auto_session_tracking = false;
    let client = Client::new(options).expect("failed to build client");
    let hub = Hub::new(Arc::clone(&client));

    hub.capture_message("before close", Level::Error);
    assert!(client.close(Duration::from_secs(2)).await);

    hub.capture_message("after close", Level::Error);
    assert!(client.flush(Duration::from_secs(2)).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn processors_can_veto_before_the_network() {
    use beacon_core::{Event, Hint};

    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/1/envelope/")
        .match_body(Matcher::Regex(r#""type":"event""#.to_string()))
        .expect(0)
        .create_async()
        .await;

    let mut options = options_for(&server.url());
    options.auto_session_tracking = false;
    let client = Client::new(options).expect("failed to build client");
    client.add_event_processor(Arc::new(|_event: Event, _hint: &Hint| -> Option<Event> {
        None
    }));

    let hub = Hub::new(Arc::clone(&client));
    hub.capture_message("vetoed", Level::Error);

    assert!(client.flush(Duration::from_secs(2)).await);
    mock.assert_async().await;
}
