// Copyright 2024 Oxide Computer Company

//! HTTP server adapter: serves a [`RestService`] over HTTP/1.1 with hyper

use crate::config::ConfigServer;
use crate::definition::RestService;
use crate::error::HttpError;
use crate::http_util::http_read_body;
use crate::service::generate_request_id;
use crate::service::InboundRequest;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::Request;
use hyper::Response;
use hyper_util::rt::TokioIo;
use scopeguard::guard;
use scopeguard::ScopeGuard;
use slog::Logger;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Server-wide state shared by every connection and request.
#[derive(Debug)]
struct ServerState {
    service: RestService,
    request_body_max_bytes: usize,
    log_headers: Vec<String>,
    log: Logger,
}

/// A running HTTP server.
///
/// The server is started with [`HttpServer::start()`], which binds the
/// listening socket right away so that [`HttpServer::local_addr()`] reports
/// the real port when port 0 was requested.  Connections are accepted on the
/// ambient tokio runtime until [`HttpServer::close()`] is called.
#[derive(Debug)]
pub struct HttpServer {
    local_addr: SocketAddr,
    close_channel: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<()>,
    log: Logger,
}

impl HttpServer {
    /// Binds `config.bind_address` and begins serving `service`.  This must
    /// be called from within a tokio runtime.
    pub fn start(
        config: &ConfigServer,
        service: RestService,
        log: &Logger,
    ) -> io::Result<HttpServer> {
        let std_listener = std::net::TcpListener::bind(config.bind_address)?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;
        let log = log.new(o!("local_addr" => local_addr));

        let state = Arc::new(ServerState {
            service,
            request_body_max_bytes: config.request_body_max_bytes,
            log_headers: config.log_headers.clone(),
            log: log.clone(),
        });

        let (tx, rx) = oneshot::channel();
        let join_handle = tokio::spawn(accept_loop(listener, state, rx));
        info!(log, "listening");

        Ok(HttpServer { local_addr, close_channel: Some(tx), join_handle, log })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and waits for the accept loop to finish.
    /// Connections that are already open are served until the client closes
    /// them.
    pub async fn close(mut self) -> Result<(), String> {
        if let Some(tx) = self.close_channel.take() {
            // The receiver is gone only if the accept loop already exited.
            let _ = tx.send(());
        }
        (&mut self.join_handle)
            .await
            .map_err(|error| format!("server task failed: {}", error))?;
        info!(self.log, "server closed");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    server: Arc<ServerState>,
    mut close_signal: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut close_signal => {
                info!(server.log, "received request to begin shutdown");
                break;
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, remote_addr)) => {
                        http_connection_handle(
                            Arc::clone(&server),
                            stream,
                            remote_addr,
                        );
                    }
                    Err(error) => {
                        warn!(server.log, "accept failed"; "error" => %error);
                    }
                }
            }
        }
    }
}

/// Serves one connection on its own task.
fn http_connection_handle(
    server: Arc<ServerState>,
    stream: tokio::net::TcpStream,
    remote_addr: SocketAddr,
) {
    info!(server.log, "accepted connection"; "remote_addr" => %remote_addr);
    tokio::spawn(async move {
        let log = server.log.clone();
        let service = hyper::service::service_fn(move |request| {
            http_request_handle_wrap(Arc::clone(&server), remote_addr, request)
        });
        if let Err(error) = hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await
        {
            debug!(log, "connection ended with an error";
                "remote_addr" => %remote_addr,
                "error" => %error,
            );
        }
    });
}

/// Handles one request, turning any error into a response and logging the
/// outcome.
async fn http_request_handle_wrap(
    server: Arc<ServerState>,
    remote_addr: SocketAddr,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let start_time = std::time::Instant::now();
    let request_id = generate_request_id();

    let mut request_log = server.log.new(o!(
        "remote_addr" => remote_addr,
        "req_id" => request_id.clone(),
        "method" => request.method().as_str().to_string(),
        "uri" => format!("{}", request.uri()),
    ));
    for name in server.log_headers.iter() {
        let v = request
            .headers()
            .get(name.as_str())
            .and_then(|v| v.to_str().ok().map(str::to_string));
        if let Some(v) = v {
            // One child logger per header: slog has no way to add a dynamic
            // set of keys at once.
            let k = format!("hdr_{}", name.to_lowercase().replace('-', "_"));
            request_log = request_log.new(o!(k => v));
        }
    }

    trace!(request_log, "incoming request");

    // If the client disconnects, hyper drops this future; log that before
    // it goes.
    let on_disconnect = guard((), |_| {
        warn!(request_log, "request handling cancelled (client disconnected)";
            "latency_us" => start_time.elapsed().as_micros(),
        );
    });

    let maybe_response =
        http_request_handle(&server, request, &request_id, &request_log).await;

    let _ = ScopeGuard::into_inner(on_disconnect);

    let latency_us = start_time.elapsed().as_micros();
    let response = match maybe_response {
        Err(error) => {
            let message_external = error.external_message.clone();
            let message_internal = error.internal_message.clone();
            let r = error.into_response(&request_id);
            info!(request_log, "request completed";
                "response_code" => r.status().as_str(),
                "latency_us" => latency_us,
                "error_message_internal" => message_internal,
                "error_message_external" => message_external,
            );
            r
        }

        Ok(response) => {
            info!(request_log, "request completed";
                "response_code" => response.status().as_str(),
                "latency_us" => latency_us,
            );
            response
        }
    };

    Ok(response)
}

async fn http_request_handle(
    server: &Arc<ServerState>,
    request: Request<Incoming>,
    request_id: &str,
    request_log: &Logger,
) -> Result<Response<Full<Bytes>>, HttpError> {
    let (parts, body) = request.into_parts();
    let body = http_read_body(body, server.request_body_max_bytes).await?;
    let inbound =
        InboundRequest::from_parts(&parts, body).with_request_id(request_id);

    // The action runs on its own task so that a panic in it is contained
    // there and reported as a 500.
    let service = server.service.clone();
    let log = request_log.clone();
    let handler_task =
        tokio::spawn(async move { service.handle(inbound, &log).await });

    match handler_task.await {
        Ok(result) => Ok(result?.into_response(request_id)),
        Err(join_error) if join_error.is_panic() => {
            let panic = join_error.into_panic();
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| String::from("<non-string panic payload>"));
            error!(request_log, "handler panicked"; "panic" => &message);
            Err(HttpError::for_internal_error(format!(
                "handler panicked: {}",
                message
            )))
        }
        Err(join_error) => Err(HttpError::for_internal_error(format!(
            "handler task failed: {}",
            join_error
        ))),
    }
}
