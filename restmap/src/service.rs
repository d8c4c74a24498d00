// Copyright 2024 Oxide Computer Company

//! Transport-independent request dispatch
//!
//! [`RestService::handle()`] takes one [`InboundRequest`] through the whole
//! pipeline: route lookup, representation selection (406 with a negotiation
//! challenge if nothing acceptable is produced), form parameter and entity
//! decoding, action invocation, and response encoding.  The HTTP server in
//! [`crate::server`] is one transport built on it; tests and other
//! transports can call it directly.

use crate::action::ActionBody;
use crate::action::ActionContext;
use crate::definition::RestService;
use crate::error::HttpError;
use crate::handler::ServiceHandler;
use crate::http_util::parse_form_into;
use crate::http_util::FormParams;
use crate::http_util::HEADER_REQUEST_ID;
use crate::media_type::MediaType;
use bytes::Bytes;
use http::header::HeaderName;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use http_body_util::Full;
use slog::Logger;
use std::str::FromStr;
use uuid::Uuid;

/// One request as handed to the dispatcher by a transport.
#[derive(Clone, Debug)]
pub struct InboundRequest {
    pub method: Method,
    /// the path portion of the request URI
    pub path: String,
    /// the query string, without the leading '?'
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub request_id: String,
}

impl InboundRequest {
    /// A request with no headers, no body, and a freshly generated request
    /// id.  A query string in `path` is split off into `query`.
    pub fn new(method: Method, path: &str) -> Self {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (path, None),
        };
        InboundRequest {
            method,
            path: path.to_string(),
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            request_id: generate_request_id(),
        }
    }

    /// Builds a request from the parts of an HTTP request and its (already
    /// read) body.
    pub fn from_parts(parts: &http::request::Parts, body: Bytes) -> Self {
        InboundRequest {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
            body,
            request_id: generate_request_id(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = request_id.to_string();
        self
    }

    fn header_media_type(
        &self,
        name: HeaderName,
    ) -> Result<Option<MediaType>, ()> {
        match self.headers.get(name) {
            None => Ok(None),
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| MediaType::from_str(v).ok())
                .map(Some)
                .ok_or(()),
        }
    }

    /// The types listed in all `Accept` headers.  A request with no `Accept`
    /// header accepts anything.
    fn accepted(&self) -> Vec<MediaType> {
        let mut accepted = Vec::new();
        let mut any_header = false;
        for value in self.headers.get_all(http::header::ACCEPT) {
            any_header = true;
            if let Ok(value) = value.to_str() {
                accepted.extend(MediaType::parse_accept(value));
            }
        }
        if !any_header {
            accepted.push(MediaType::WILDCARD);
        }
        accepted
    }
}

/// A successful response from the dispatcher.
#[derive(Clone, Debug)]
pub struct ServiceResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ServiceResponse {
    /// The content type of the response, if it has one.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn into_response(
        self,
        request_id: &str,
    ) -> hyper::Response<Full<Bytes>> {
        let mut response = hyper::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if let Ok(value) = HeaderValue::from_str(request_id) {
            response.headers_mut().insert(HEADER_REQUEST_ID, value);
        }
        response
    }
}

impl RestService {
    /// Dispatches `request` to the action it's routed to.
    pub async fn handle(
        &self,
        request: InboundRequest,
        log: &Logger,
    ) -> Result<ServiceResponse, HttpError> {
        let route =
            self.route_table().lookup_route(&request.method, &request.path)?;
        let handler = std::sync::Arc::clone(route.handler);
        let variables = route.variables;
        let log = log.new(o!(
            "operation" => handler.operation_name(),
            "template" => route.template.to_string(),
        ));

        let selected = self.select_representation(&handler, &request)?;
        let form_params = form_params(&handler, &request)?;
        let entity = self.decode_entity(&handler, &request)?;
        trace!(log, "dispatching";
            "representation" => %selected,
            "has_entity" => entity.is_some(),
        );

        let rqctx = ActionContext::new(
            request.method,
            request.path,
            request.request_id,
            request.headers,
            form_params,
            variables,
            request.body,
            entity,
            log.clone(),
        );

        let response = handler.action().invoke(rqctx).await.map_err(|error| {
            debug!(log, "action failed";
                "status" => error.status_code.as_u16(),
                "reason" => &error.reason_phrase,
            );
            HttpError::for_status_with_message(
                error.status_code,
                error.reason_phrase,
            )
        })?;

        let mut headers = response.headers;
        let body = match response.body {
            ActionBody::Empty => Bytes::new(),
            ActionBody::Raw { content_type, bytes } => {
                headers.insert(http::header::CONTENT_TYPE, content_type);
                bytes
            }
            ActionBody::Entity(value) => {
                let codec = self.codecs().find(&selected).ok_or_else(|| {
                    HttpError::for_internal_error(format!(
                        "no codec registered for response type \"{}\"",
                        selected
                    ))
                })?;
                let bytes = codec.encode(&value).map_err(|error| {
                    HttpError::for_internal_error(error.to_string())
                })?;
                let content_type = HeaderValue::from_str(
                    &codec.media_type().to_string(),
                )
                .map_err(|error| {
                    HttpError::for_internal_error(error.to_string())
                })?;
                headers.insert(http::header::CONTENT_TYPE, content_type);
                bytes
            }
        };

        Ok(ServiceResponse { status: response.status, headers, body })
    }

    /// Picks the first produced type that the request accepts.  If there
    /// isn't one, fails with a 406 that carries the negotiation challenge.
    fn select_representation(
        &self,
        handler: &ServiceHandler,
        request: &InboundRequest,
    ) -> Result<MediaType, HttpError> {
        let produced = self.effective_produces(handler);
        let accepted = request.accepted();
        if let Some(selected) = produced
            .iter()
            .find(|p| accepted.iter().any(|a| a.is_compatible(p)))
        {
            return Ok(selected.clone());
        }

        let generator = self.negotiation_generator();
        let name = HeaderName::from_bytes(
            generator.challenged_header_name().as_bytes(),
        )
        .map_err(|error| {
            HttpError::for_internal_error(format!(
                "bad negotiation header name: {}",
                error
            ))
        })?;
        let token = generator.generate_token(&request.path, &produced);
        let value = HeaderValue::from_str(&token).map_err(|error| {
            HttpError::for_internal_error(format!(
                "bad negotiation header value: {}",
                error
            ))
        })?;
        Err(HttpError::for_client_error(
            None,
            StatusCode::NOT_ACCEPTABLE,
            format!(
                "none of the representations of \"{}\" is acceptable",
                request.path
            ),
        )
        .with_header(name, value))
    }

    /// Decodes the request entity, if the request has a body that isn't a
    /// form.
    fn decode_entity(
        &self,
        handler: &ServiceHandler,
        request: &InboundRequest,
    ) -> Result<Option<serde_json::Value>, HttpError> {
        let declared = self.effective_consumes(handler);
        let content_type = request
            .header_media_type(http::header::CONTENT_TYPE)
            .map_err(|()| unsupported("request has an invalid content type"))?;

        if request.body.is_empty() || is_form(content_type.as_ref()) {
            if let Some(shape) = handler.entity_shape() {
                return Err(HttpError::for_bad_request(
                    None,
                    format!(
                        "request requires a \"{}\" entity",
                        shape.type_name()
                    ),
                ));
            }
            return Ok(None);
        }

        let content_type = match (content_type, declared) {
            (Some(content_type), Some(declared)) => {
                if !content_type.is_compatible(declared) {
                    return Err(unsupported(&format!(
                        "content type \"{}\" is not \"{}\"",
                        content_type, declared
                    )));
                }
                content_type
            }
            (Some(content_type), None) => content_type,
            (None, Some(declared)) => declared.clone(),
            // No declared or given type: the body is raw bytes.
            (None, None) => return Ok(None),
        };

        let Some(codec) = self.codecs().find(&content_type) else {
            if declared.is_none() && handler.entity_shape().is_none() {
                return Ok(None);
            }
            return Err(unsupported(&format!(
                "no codec registered for content type \"{}\"",
                content_type
            )));
        };

        let value = codec
            .decode(&request.body)
            .map_err(|error| {
                HttpError::for_bad_request(None, error.to_string())
            })?;
        if let Some(shape) = handler.entity_shape() {
            shape.check(&value).map_err(|message| {
                HttpError::for_bad_request(
                    None,
                    format!("unable to parse request entity: {}", message),
                )
            })?;
        }
        Ok(Some(value))
    }
}

/// Collects the query string parameters and, for a form body, its
/// parameters.  A handler that declares form parameters sees only those.
fn form_params(
    handler: &ServiceHandler,
    request: &InboundRequest,
) -> Result<FormParams, HttpError> {
    let mut params = FormParams::new();
    if let Some(query) = &request.query {
        parse_form_into(&mut params, query.as_bytes());
    }

    let content_type = request
        .header_media_type(http::header::CONTENT_TYPE)
        .map_err(|()| unsupported("request has an invalid content type"))?;
    if is_form(content_type.as_ref()) {
        if std::str::from_utf8(&request.body).is_err() {
            return Err(HttpError::for_bad_request(
                None,
                String::from("form body is not valid UTF-8"),
            ));
        }
        parse_form_into(&mut params, &request.body);
    }

    let declared = handler.form_params();
    if !declared.is_empty() {
        params.retain(|name, _| declared.iter().any(|d| d == name));
    }
    Ok(params)
}

fn is_form(content_type: Option<&MediaType>) -> bool {
    content_type == Some(&MediaType::APPLICATION_FORM_URLENCODED)
}

fn unsupported(message: &str) -> HttpError {
    HttpError::for_client_error(
        None,
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        message.to_string(),
    )
}

// TODO should the service name be part of the request id, so that a request id
// identifies which service it came from?
pub(crate) fn generate_request_id() -> String {
    format!("{}", Uuid::new_v4())
}

#[cfg(test)]
mod test {
    use super::InboundRequest;
    use crate::ActionContext;
    use crate::ActionError;
    use crate::ActionResponse;
    use crate::ActionResult;
    use crate::MediaType;
    use crate::RestService;
    use crate::ServiceDefinition;
    use crate::ServiceHandler;
    use bytes::Bytes;
    use http::header;
    use http::HeaderValue;
    use http::Method;
    use http::StatusCode;
    use serde::Deserialize;

    async fn echo(rqctx: ActionContext) -> ActionResult {
        ActionResponse::ok(&serde_json::json!({
            "id": rqctx.path_variable("id")?,
            "form": rqctx.form_params(),
            "entity": rqctx.entity_value(),
            "body_len": rqctx.body().len(),
        }))
    }

    async fn conflict(_rqctx: ActionContext) -> ActionResult {
        Err(ActionError::new(StatusCode::CONFLICT, "widget already exists"))
    }

    #[derive(Deserialize)]
    #[allow(dead_code)]
    struct Widget {
        name: String,
    }

    fn test_service() -> RestService {
        ServiceDefinition::new()
            .with_path("/")
            .with_handler(ServiceHandler::post("/echo/:id", echo))
            .with_handler(
                ServiceHandler::post("/filtered/:id", echo)
                    .with_form_param("value"),
            )
            .with_handler(
                ServiceHandler::put("/typed/:id", echo)
                    .consuming(MediaType::APPLICATION_JSON)
                    .with_entity::<Widget>(),
            )
            .with_handler(
                ServiceHandler::get("/text/:id", echo)
                    .producing(MediaType::TEXT_PLAIN),
            )
            .with_handler(ServiceHandler::put("/conflict", conflict))
            .finalize()
            .unwrap()
    }

    fn log() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn body_json(body: &Bytes) -> serde_json::Value {
        serde_json::from_slice(body).unwrap()
    }

    fn form_request(path: &str, body: &'static str) -> InboundRequest {
        InboundRequest::new(Method::POST, path)
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            )
            .with_body(body)
    }

    #[tokio::test]
    async fn test_routing_errors() {
        let service = test_service();
        let error = service
            .handle(InboundRequest::new(Method::GET, "/nothing"), &log())
            .await
            .unwrap_err();
        assert_eq!(error.status_code, StatusCode::NOT_FOUND);

        let error = service
            .handle(InboundRequest::new(Method::DELETE, "/echo/a"), &log())
            .await
            .unwrap_err();
        assert_eq!(error.status_code, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(error.headers.get(header::ALLOW).unwrap(), "POST");
    }

    #[tokio::test]
    async fn test_form_params() {
        let service = test_service();
        let response = service
            .handle(form_request("/echo/a?value=q", "value=v&other=o"), &log())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type(), Some("application/json"));
        let body = body_json(&response.body);
        assert_eq!(body["id"], "a");
        assert_eq!(body["form"]["value"], serde_json::json!(["q", "v"]));
        assert_eq!(body["form"]["other"], serde_json::json!(["o"]));
        assert_eq!(body["entity"], serde_json::Value::Null);

        let response = service
            .handle(form_request("/filtered/a", "value=v&other=o"), &log())
            .await
            .unwrap();
        let body = body_json(&response.body);
        assert_eq!(body["form"], serde_json::json!({ "value": ["v"] }));
    }

    #[tokio::test]
    async fn test_entities() {
        let service = test_service();
        let request = InboundRequest::new(Method::PUT, "/typed/a")
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            )
            .with_body(r#"{"name":"w"}"#);
        let response = service.handle(request, &log()).await.unwrap();
        let body = body_json(&response.body);
        assert_eq!(body["entity"], serde_json::json!({ "name": "w" }));

        /* The declared type is used when the request doesn't name one. */
        let request = InboundRequest::new(Method::PUT, "/typed/a")
            .with_body(r#"{"name":"w"}"#);
        assert!(service.handle(request, &log()).await.is_ok());

        let request = InboundRequest::new(Method::PUT, "/typed/a")
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain"),
            )
            .with_body("w");
        let error = service.handle(request, &log()).await.unwrap_err();
        assert_eq!(error.status_code, StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let request =
            InboundRequest::new(Method::PUT, "/typed/a").with_body("{not json");
        let error = service.handle(request, &log()).await.unwrap_err();
        assert_eq!(error.status_code, StatusCode::BAD_REQUEST);

        let request = InboundRequest::new(Method::PUT, "/typed/a")
            .with_body(r#"{"name":3}"#);
        let error = service.handle(request, &log()).await.unwrap_err();
        assert_eq!(error.status_code, StatusCode::BAD_REQUEST);
        assert!(error.external_message.contains("name"), "{}", error);

        let request = InboundRequest::new(Method::PUT, "/typed/a");
        let error = service.handle(request, &log()).await.unwrap_err();
        assert_eq!(error.status_code, StatusCode::BAD_REQUEST);

        /* Without a declared type, an unknown representation is passed raw. */
        let request = InboundRequest::new(Method::POST, "/echo/a")
            .with_header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            )
            .with_body(&b"\x00\x01"[..]);
        let response = service.handle(request, &log()).await.unwrap();
        let body = body_json(&response.body);
        assert_eq!(body["entity"], serde_json::Value::Null);
        assert_eq!(body["body_len"], 2);
    }

    #[tokio::test]
    async fn test_not_acceptable() {
        let service = test_service();
        let request = InboundRequest::new(Method::GET, "/text/a")
            .with_header(
                header::ACCEPT,
                HeaderValue::from_static("application/json"),
            );
        let error = service.handle(request, &log()).await.unwrap_err();
        assert_eq!(error.status_code, StatusCode::NOT_ACCEPTABLE);
        assert_eq!(
            error.headers.get("alternates").unwrap(),
            "{\"/text/a\" 1.0 {type text/plain}}"
        );

        let request = InboundRequest::new(Method::GET, "/text/a")
            .with_header(header::ACCEPT, HeaderValue::from_static("text/*"));
        let response = service.handle(request, &log()).await.unwrap();
        assert_eq!(response.content_type(), Some("text/plain"));

        /* A path that can't go in a header as-is still gets a challenge. */
        let request = InboundRequest::new(Method::GET, "/text/caf\u{e9}")
            .with_header(
                header::ACCEPT,
                HeaderValue::from_static("application/json"),
            );
        let error = service.handle(request, &log()).await.unwrap_err();
        assert_eq!(error.status_code, StatusCode::NOT_ACCEPTABLE);
        assert_eq!(
            error.headers.get("alternates").unwrap(),
            "{\"/text/caf%C3%A9\" 1.0 {type text/plain}}"
        );
    }

    #[tokio::test]
    async fn test_action_error() {
        let service = test_service();
        let error = service
            .handle(InboundRequest::new(Method::PUT, "/conflict"), &log())
            .await
            .unwrap_err();
        assert_eq!(error.status_code, StatusCode::CONFLICT);
        assert_eq!(error.external_message, "widget already exists");
    }

    #[test]
    fn test_inbound_request() {
        let request = InboundRequest::new(Method::GET, "/a/b?x=1&y=2");
        assert_eq!(request.path, "/a/b");
        assert_eq!(request.query.as_deref(), Some("x=1&y=2"));
        assert_eq!(request.request_id.len(), 36);
        assert_eq!(request.accepted(), vec![MediaType::WILDCARD]);

        let request = request.with_request_id("req-1");
        let response = super::ServiceResponse {
            status: StatusCode::NO_CONTENT,
            headers: http::HeaderMap::new(),
            body: Bytes::new(),
        }
        .into_response(&request.request_id);
        assert_eq!(
            response.headers().get(crate::HEADER_REQUEST_ID).unwrap(),
            "req-1"
        );
    }
}
