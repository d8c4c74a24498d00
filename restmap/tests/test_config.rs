// Copyright 2024 Oxide Computer Company

//! Tests for configuration file.

use http::Method;
use http::StatusCode;
use restmap::test_util::read_config;
use restmap::test_util::ClientTestContext;
use restmap::ActionContext;
use restmap::ActionResponse;
use restmap::ActionResult;
use restmap::ConfigServer;
use restmap::HttpServer;
use restmap::ServiceDefinition;
use restmap::ServiceHandler;
use serde::Deserialize;
use slog::o;

pub mod common;
use common::create_log_context;

// Bad values for "bind_address"

#[test]
fn test_config_bad_bind_address_port_too_small() {
    let error = read_config::<ConfigServer>(
        "bad_bind_address_port_too_small",
        "bind_address = \"127.0.0.1:-3\"",
    )
    .unwrap_err()
    .to_string();
    println!("found error: {}", error);
    assert!(error.contains("invalid socket address syntax"));
}

#[test]
fn test_config_bad_bind_address_port_too_large() {
    let error = read_config::<ConfigServer>(
        "bad_bind_address_port_too_large",
        "bind_address = \"127.0.0.1:65536\"",
    )
    .unwrap_err()
    .to_string();
    println!("found error: {}", error);
    assert!(error.contains("invalid socket address syntax"));
}

#[test]
fn test_config_bad_bind_address_garbage() {
    let error = read_config::<ConfigServer>(
        "bad_bind_address_garbage",
        "bind_address = \"garbage\"",
    )
    .unwrap_err()
    .to_string();
    println!("found error: {}", error);
    assert!(error.contains("invalid socket address syntax"));
}

// Bad values for "request_body_max_bytes"

#[test]
fn test_config_bad_request_body_max_bytes_negative() {
    let error = read_config::<ConfigServer>(
        "bad_request_body_max_bytes_negative",
        "request_body_max_bytes = -1024",
    )
    .unwrap_err()
    .to_string();
    println!("found error: {}", error);
    assert!(error.contains("invalid value: integer"));
}

#[test]
fn test_config_bad_request_body_max_bytes_not_a_number() {
    let error = read_config::<ConfigServer>(
        "bad_request_body_max_bytes_not_a_number",
        "request_body_max_bytes = \"lots\"",
    )
    .unwrap_err()
    .to_string();
    println!("found error: {}", error);
    assert!(error.contains("invalid type: string"));
}

// The server config is meant to be one block of a larger config file.
#[test]
fn test_config_nested() {
    #[derive(Debug, Deserialize)]
    struct AppConfig {
        server: ConfigServer,
        #[allow(dead_code)]
        name: String,
    }

    let config = read_config::<AppConfig>(
        "nested",
        r#"
        name = "demo"

        [server]
        bind_address = "127.0.0.1:12220"
        log_headers = ["X-Trace-Id"]
        "#,
    )
    .unwrap();
    assert_eq!(config.server.bind_address.port(), 12220);
    assert_eq!(config.server.request_body_max_bytes, 1024);
    assert_eq!(config.server.log_headers, vec!["X-Trace-Id"]);
}

async fn echo_len(rqctx: ActionContext) -> ActionResult {
    ActionResponse::ok(&rqctx.body().len())
}

#[tokio::test]
async fn test_config_request_body_max_bytes() {
    let logctx = create_log_context("config_request_body_max_bytes");
    let log = logctx.log.new(o!());
    let config = read_config::<ConfigServer>(
        "request_body_max_bytes",
        r#"
        bind_address = "127.0.0.1:0"
        request_body_max_bytes = 16
        log_headers = ["x-trace-id"]
        "#,
    )
    .unwrap();

    let service = ServiceDefinition::new()
        .with_path("/echo")
        .with_handler(ServiceHandler::new(Method::PUT, None, echo_len))
        .finalize()
        .unwrap();
    let server = HttpServer::start(&config, service, &log).unwrap();
    let client = ClientTestContext::new(server.local_addr(), log.new(o!()));

    let mut response = client
        .make_request_with_headers(
            Method::PUT,
            "/echo",
            "0123456789abcdef".into(),
            &[(http::header::HeaderName::from_static("x-trace-id"), "t1")],
            StatusCode::OK,
        )
        .await
        .unwrap();
    let len: usize = restmap::test_util::read_json(&mut response).await;
    assert_eq!(len, 16);

    let error = client
        .make_request_with_body(
            Method::PUT,
            "/echo",
            "0123456789abcdefg".into(),
            StatusCode::BAD_REQUEST,
        )
        .await
        .unwrap_err();
    assert!(
        error.message.contains("request body exceeded maximum size"),
        "{}",
        error.message
    );

    server.close().await.unwrap();
    logctx.cleanup_successful();
}
