// Copyright 2024 Oxide Computer Company

//! Example use of restmap: a counter that can be read, set from a form, or
//! replaced with a JSON entity.

use restmap::ActionContext;
use restmap::ActionError;
use restmap::ActionResponse;
use restmap::ActionResult;
use restmap::ConfigLogging;
use restmap::ConfigLoggingLevel;
use restmap::ConfigServer;
use restmap::HttpServer;
use restmap::MediaType;
use restmap::ServiceDefinition;
use restmap::ServiceHandler;
use serde::Deserialize;
use serde::Serialize;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), String> {
    // 127.0.0.1 on port 0: the operating system picks any available port.
    let config_server: ConfigServer = Default::default();

    let config_logging =
        ConfigLogging::StderrTerminal { level: ConfigLoggingLevel::Info };
    let log = config_logging
        .to_logger("example-basic")
        .map_err(|error| format!("failed to create logger: {}", error))?;

    let counter = Arc::new(AtomicU64::new(0));
    let service = ServiceDefinition::new()
        .with_path("/counter")
        .producing(MediaType::APPLICATION_JSON)
        .producing(MediaType::TEXT_PLAIN)
        .consuming(MediaType::APPLICATION_JSON)
        .with_handler(ServiceHandler::new(
            http::Method::GET,
            None,
            counter_action(&counter, get_counter),
        ))
        .with_handler(
            ServiceHandler::post("/set", counter_action(&counter, set_counter))
                .with_form_param("value"),
        )
        .with_handler(
            ServiceHandler::put("/", counter_action(&counter, put_counter))
                .with_entity::<CounterValue>(),
        )
        .finalize()
        .map_err(|error| format!("failed to define service: {}", error))?;

    let server = HttpServer::start(&config_server, service, &log)
        .map_err(|error| format!("failed to start server: {}", error))?;
    slog::info!(log, "try: curl http://{}/counter", server.local_addr());

    tokio::signal::ctrl_c()
        .await
        .map_err(|error| format!("failed to wait for ctrl-c: {}", error))?;
    server.close().await
}

#[derive(Deserialize, Serialize)]
struct CounterValue {
    counter: u64,
}

/// Binds `f` to the shared counter.
fn counter_action<F>(
    counter: &Arc<AtomicU64>,
    f: F,
) -> impl Fn(ActionContext) -> std::future::Ready<ActionResult>
       + Send
       + Sync
       + 'static
where
    F: Fn(&AtomicU64, ActionContext) -> ActionResult + Send + Sync + 'static,
{
    let counter = Arc::clone(counter);
    move |rqctx| std::future::ready(f(&counter, rqctx))
}

fn get_counter(counter: &AtomicU64, _rqctx: ActionContext) -> ActionResult {
    ActionResponse::ok(&CounterValue {
        counter: counter.load(Ordering::SeqCst),
    })
}

fn set_counter(counter: &AtomicU64, rqctx: ActionContext) -> ActionResult {
    let value = rqctx
        .form_param("value")
        .ok_or_else(|| ActionError::bad_request("missing \"value\""))?;
    let value = value.parse::<u64>().map_err(|error| {
        ActionError::bad_request(format!("bad \"value\": {}", error))
    })?;
    counter.store(value, Ordering::SeqCst);
    ActionResponse::no_content()
}

fn put_counter(counter: &AtomicU64, rqctx: ActionContext) -> ActionResult {
    let updated: CounterValue = rqctx.entity()?;
    if updated.counter == 10 {
        return Err(ActionError::bad_request("do not like the number 10"));
    }
    counter.store(updated.counter, Ordering::SeqCst);
    ActionResponse::no_content()
}
