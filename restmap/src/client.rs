// Copyright 2024 Oxide Computer Company

//! Client side of a service definition
//!
//! A [`DispatchClient`] calls a remote server that serves a known
//! [`RestService`].  It uses the definition to fill in what a caller would
//! otherwise have to repeat on every request: the `Accept` header from the
//! representations the matching handler produces, the `Content-Type` from
//! what it consumes, and the codec used for request and response entities.
//! When the server answers "406 Not Acceptable" with a negotiation
//! challenge, the client picks a representation it supports and retries the
//! request once.

use crate::codec::CodecError;
use crate::definition::RestService;
use crate::error::HttpErrorResponseBody;
use crate::handler::ServiceHandler;
use crate::http_util::encode_form;
use crate::media_type::MediaType;
use crate::negotiation::AlternatesNegotiationHandler;
use crate::negotiation::NegotiationError;
use crate::negotiation::NegotiationHandler;
use bytes::Bytes;
use http::header;
use http::header::HeaderName;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http_body_util::BodyExt;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use slog::Logger;
use std::sync::Arc;

/// Errors making a request with a [`DispatchClient`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    Request(#[from] http::Error),
    #[error("invalid header \"{name}\": {message}")]
    InvalidHeader { name: String, message: String },
    #[error("failed to serialize request entity: {0}")]
    Serialize(String),
    #[error("no codec registered for \"{0}\"")]
    NoCodec(MediaType),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("error sending request: {0}")]
    Connection(#[from] hyper_util::client::legacy::Error),
    #[error("error reading response body: {0}")]
    Body(#[from] hyper::Error),
    #[error("response has no usable content type")]
    MissingContentType,
    #[error("unable to parse response entity: {0}")]
    Entity(String),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
}

/// `DispatchClient` makes requests against a remote server that serves
/// `service`.
#[derive(Clone, Debug)]
pub struct DispatchClient {
    base_url: String,
    service: RestService,
    client: Client<HttpConnector, Full<Bytes>>,
    negotiation_handler: Arc<dyn NegotiationHandler>,
    accepted: Option<Vec<MediaType>>,
    log: Logger,
}

impl DispatchClient {
    /// `base_url` is the scheme and authority of the server, like
    /// `"http://127.0.0.1:8080"`.  Request paths are appended to it.
    pub fn new(base_url: &str, service: RestService, log: &Logger) -> Self {
        DispatchClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            service,
            client: Client::builder(TokioExecutor::new()).build_http(),
            negotiation_handler: Arc::new(
                AlternatesNegotiationHandler::default(),
            ),
            accepted: None,
            log: log.new(o!("base_url" => base_url.to_string())),
        }
    }

    /// Replaces the handler used to resolve 406 challenges.
    pub fn with_negotiation_handler<H: NegotiationHandler>(
        mut self,
        handler: H,
    ) -> Self {
        self.negotiation_handler = Arc::new(handler);
        self
    }

    /// Sets the representations this client supports, most preferred first.
    /// These are what a 406 challenge is resolved against.  By default, a
    /// request supports whatever its handler produces plus every type the
    /// service has a codec for.
    pub fn with_accepted(mut self, accepted: Vec<MediaType>) -> Self {
        self.accepted = Some(accepted);
        self
    }

    pub fn service(&self) -> &RestService {
        &self.service
    }

    /// Begins building a request.  `path` may include a query string.
    pub fn request(&self, method: Method, path: &str) -> DispatchRequest<'_> {
        DispatchRequest {
            client: self,
            method,
            path: path.to_string(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            form: Vec::new(),
            body: None,
            error: None,
        }
    }

    fn handler_for(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<&ServiceHandler> {
        let path = path.split_once('?').map(|(p, _)| p).unwrap_or(path);
        self.service
            .route_table()
            .resolve(method, path)
            .map(|route| &**route.handler)
    }

    fn accepted_for(&self, handler: Option<&ServiceHandler>) -> Vec<MediaType> {
        if let Some(accepted) = &self.accepted {
            return accepted.clone();
        }
        let mut accepted = self.produced_by(handler);
        for media_type in self.service.codecs().media_types() {
            if !accepted.contains(media_type) {
                accepted.push(media_type.clone());
            }
        }
        accepted
    }

    fn produced_by(&self, handler: Option<&ServiceHandler>) -> Vec<MediaType> {
        match handler {
            Some(handler) => self.service.effective_produces(handler),
            None => self.service.produces().to_vec(),
        }
    }

    async fn execute(
        &self,
        method: &Method,
        uri: &str,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<DispatchResponse, DispatchError> {
        let mut builder =
            hyper::Request::builder().method(method.clone()).uri(uri);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        let request = builder.body(Full::new(body.clone()))?;

        debug!(self.log, "client request";
            "method" => %method,
            "uri" => uri,
            "body_len" => body.len(),
        );
        let response = self.client.request(request).await?;
        let status = response.status();
        let (parts, body) = response.into_parts();
        let body = body.collect().await?.to_bytes();
        debug!(self.log, "client received response";
            "status" => status.as_u16(),
            "body_len" => body.len(),
        );

        Ok(DispatchResponse {
            status,
            headers: parts.headers,
            body,
            service: self.service.clone(),
        })
    }
}

enum RequestBody {
    Entity(serde_json::Value),
    Raw(Bytes),
}

/// A request being built by a [`DispatchClient`].
pub struct DispatchRequest<'a> {
    client: &'a DispatchClient,
    method: Method,
    path: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
    body: Option<RequestBody>,
    error: Option<DispatchError>,
}

impl<'a> DispatchRequest<'a> {
    /// Sets a header.  Headers set here are sent as given, even `Accept` and
    /// `Content-Type`.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            (Err(error), _) => self.fail(name, error.to_string()),
            (_, Err(error)) => self.fail(name, error.to_string()),
        }
        self
    }

    pub fn query_param(mut self, name: &str, value: &str) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    /// Adds a form parameter.  Form parameters are sent as an urlencoded
    /// body, or in the query string if the request also has a body.
    pub fn form_param(mut self, name: &str, value: &str) -> Self {
        self.form.push((name.to_string(), value.to_string()));
        self
    }

    /// Sets the request entity, to be encoded with the codec for the
    /// request's content type.
    pub fn entity<T: Serialize + ?Sized>(mut self, entity: &T) -> Self {
        match serde_json::to_value(entity) {
            Ok(value) => self.body = Some(RequestBody::Entity(value)),
            Err(error) => {
                self.error = Some(DispatchError::Serialize(error.to_string()))
            }
        }
        self
    }

    /// Sets the request body verbatim.
    pub fn body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = Some(RequestBody::Raw(body.into()));
        self
    }

    fn fail(&mut self, name: &str, message: String) {
        self.error = Some(DispatchError::InvalidHeader {
            name: name.to_string(),
            message,
        });
    }

    /// Sends the request, negotiating a representation once if the server
    /// responds with 406.
    pub async fn send(self) -> Result<DispatchResponse, DispatchError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let client = self.client;
        let handler = client.handler_for(&self.method, &self.path);
        let service = &client.service;
        let mut headers = self.headers;

        if !headers.contains_key(header::ACCEPT) {
            let produced = client.produced_by(handler);
            if !produced.is_empty() {
                headers.insert(
                    header::ACCEPT,
                    header_value(
                        header::ACCEPT,
                        &MediaType::to_accept(&produced),
                    )?,
                );
            }
        }

        let mut query = self.query;
        let body = match self.body {
            Some(body) => {
                query.extend(self.form);
                let content_type = match headers.get(header::CONTENT_TYPE) {
                    Some(value) => value
                        .to_str()
                        .ok()
                        .and_then(|v| v.parse::<MediaType>().ok()),
                    None => {
                        let declared = handler
                            .and_then(|h| service.effective_consumes(h))
                            .cloned();
                        let content_type = declared.unwrap_or(match body {
                            RequestBody::Entity(_) => {
                                MediaType::APPLICATION_JSON
                            }
                            RequestBody::Raw(_) => {
                                MediaType::APPLICATION_OCTET_STREAM
                            }
                        });
                        headers.insert(
                            header::CONTENT_TYPE,
                            header_value(
                                header::CONTENT_TYPE,
                                &content_type.to_string(),
                            )?,
                        );
                        Some(content_type)
                    }
                };
                match body {
                    RequestBody::Raw(bytes) => bytes,
                    RequestBody::Entity(value) => {
                        let content_type = content_type
                            .ok_or(DispatchError::MissingContentType)?;
                        let codec = service
                            .codecs()
                            .find(&content_type)
                            .ok_or(DispatchError::NoCodec(content_type))?;
                        codec.encode(&value)?
                    }
                }
            }
            None if !self.form.is_empty() => {
                if !headers.contains_key(header::CONTENT_TYPE) {
                    headers.insert(
                        header::CONTENT_TYPE,
                        HeaderValue::from_static(
                            crate::CONTENT_TYPE_URL_ENCODED,
                        ),
                    );
                }
                Bytes::from(encode_form(&self.form))
            }
            None => Bytes::new(),
        };

        let mut uri = format!("{}{}", client.base_url, self.path);
        if !query.is_empty() {
            uri.push(if self.path.contains('?') { '&' } else { '?' });
            uri.push_str(&encode_form(&query));
        }

        let response =
            client.execute(&self.method, &uri, &headers, &body).await?;
        if response.status != StatusCode::NOT_ACCEPTABLE {
            return Ok(response);
        }

        let reason = response.reason();
        let accepted = client.accepted_for(handler);
        let chosen = client.negotiation_handler.negotiate(
            response.status,
            &reason,
            &response.headers,
            &accepted,
        )?;
        info!(client.log, "retrying with negotiated representation";
            "method" => %self.method,
            "uri" => &uri,
            "accept" => %chosen,
        );
        headers.insert(
            header::ACCEPT,
            header_value(header::ACCEPT, &chosen.to_string())?,
        );

        let retry = client.execute(&self.method, &uri, &headers, &body).await?;
        if retry.status == StatusCode::NOT_ACCEPTABLE {
            return Err(NegotiationError::RetryExhausted {
                status: retry.status,
                reason: retry.reason(),
            }
            .into());
        }
        Ok(retry)
    }
}

fn header_value(
    name: HeaderName,
    value: &str,
) -> Result<HeaderValue, DispatchError> {
    HeaderValue::from_str(value).map_err(|error| DispatchError::InvalidHeader {
        name: name.to_string(),
        message: error.to_string(),
    })
}

/// A response received by a [`DispatchClient`].
#[derive(Clone, Debug)]
pub struct DispatchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    service: RestService,
}

impl DispatchResponse {
    pub fn content_type(&self) -> Option<MediaType> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    /// Decodes the body with the codec for the response's content type and
    /// deserializes it as a `T`.
    pub fn entity<T: DeserializeOwned>(&self) -> Result<T, DispatchError> {
        let content_type =
            self.content_type().ok_or(DispatchError::MissingContentType)?;
        let codec = self
            .service
            .codecs()
            .find(&content_type)
            .ok_or(DispatchError::NoCodec(content_type))?;
        let value = codec.decode(&self.body)?;
        serde_path_to_error::deserialize(&value)
            .map_err(|error| DispatchError::Entity(error.to_string()))
    }

    /// The body of an error response, if it is one.
    pub fn error_body(&self) -> Option<HttpErrorResponseBody> {
        if self.status.is_success() {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The reason phrase: the message of an error body if there is one, or
    /// else the standard label for the status code.
    pub fn reason(&self) -> String {
        self.error_body().map(|body| body.message).unwrap_or_else(|| {
            self.status
                .canonical_reason()
                .unwrap_or("Unknown Status")
                .to_string()
        })
    }
}
