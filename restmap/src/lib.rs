// Copyright 2024 Oxide Computer Company

//! restmap is a crate for declaring REST services as data.  A service is a
//! [`ServiceDefinition`]: a base path, the representations it produces and
//! consumes, and a list of [`ServiceHandler`]s, each binding an HTTP verb and a
//! path template to an [`Action`].  The same declaration is used on both sides
//! of the wire:
//!
//! * A server routes each incoming request through the definition's
//!   [`RouteTable`], extracts path variables, checks that it can produce a
//!   representation the client accepts, decodes the request entity, and
//!   invokes the bound action.
//!
//! * A [`DispatchClient`] uses the definition to fill in `Accept` and
//!   `Content-Type` for outgoing requests and to encode and decode entities.
//!
//! When a client asks for a representation the server doesn't produce, the
//! server answers "406 Not Acceptable" with an RFC 2295 `Alternates` header
//! listing what it can produce.  The client picks the first of those it
//! supports and retries the request, once.
//!
//! ## Usage
//!
//! Path variables may be written `{name}` or `:name`; the two are the same
//! template.
//!
//! ```
//! use restmap::ActionContext;
//! use restmap::ActionResponse;
//! use restmap::ActionResult;
//! use restmap::InboundRequest;
//! use restmap::ServiceDefinition;
//! use restmap::ServiceHandler;
//! use http::Method;
//! use http::StatusCode;
//!
//! async fn get_project(rqctx: ActionContext) -> ActionResult {
//!     let name = rqctx.path_variable("name")?;
//!     ActionResponse::ok(&format!("project {}", name))
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let service = ServiceDefinition::new()
//!         .with_path("/projects")
//!         .with_handler(ServiceHandler::get("/:name", get_project))
//!         .finalize()
//!         .map_err(|error| error.to_string())?;
//!
//!     let log = slog::Logger::root(slog::Discard, slog::o!());
//!     let response = service
//!         .handle(InboundRequest::new(Method::GET, "/projects/p1"), &log)
//!         .await
//!         .map_err(|error| error.to_string())?;
//!     assert_eq!(response.status, StatusCode::OK);
//!     assert_eq!(&response.body[..], br#""project p1""#);
//!     Ok(())
//! }
//! ```
//!
//! To serve the same service over HTTP, pass it to [`HttpServer::start()`]
//! with a [`ConfigServer`].  To call it, create a [`DispatchClient`] with the
//! server's URL and the same [`RestService`].
//!
//! ## Entities
//!
//! Request and response entities go through the definition's
//! [`CodecRegistry`], keyed by media type.  JSON and plain text are registered
//! by default; other formats can be added with
//! [`ServiceDefinition::with_codec()`].  A handler can declare the shape of
//! the entity it consumes with [`ServiceHandler::with_entity()`], in which case
//! a request whose entity doesn't deserialize as that type is rejected with a
//! 400 before the action runs.
//!
//! ## Errors
//!
//! An action fails with an [`ActionError`], a status code and reason phrase
//! that are sent to the client as they are.  Everything the dispatcher itself
//! rejects (an unknown route, an unsupported content type, an oversized body)
//! is an [`HttpError`].  Both are rendered as an [`HttpErrorResponseBody`]
//! carrying the request id.

mod action;
mod client;
mod codec;
mod config;
mod definition;
mod error;
mod handler;
mod http_util;
mod logging;
mod media_type;
mod negotiation;
mod router;
mod server;
mod service;
mod template;

pub mod test_util;

#[macro_use]
extern crate slog;

pub use action::Action;
pub use action::ActionBody;
pub use action::ActionContext;
pub use action::ActionError;
pub use action::ActionResponse;
pub use action::ActionResult;
pub use client::DispatchClient;
pub use client::DispatchError;
pub use client::DispatchRequest;
pub use client::DispatchResponse;
pub use codec::CodecError;
pub use codec::CodecRegistry;
pub use codec::EntityCodec;
pub use codec::JsonCodec;
pub use codec::PlainTextCodec;
pub use config::ConfigServer;
pub use definition::DefinitionError;
pub use definition::RestService;
pub use definition::ServiceDefinition;
pub use error::HttpError;
pub use error::HttpErrorResponseBody;
pub use handler::EntityShape;
pub use handler::ServiceHandler;
pub use http_util::FormParams;
pub use http_util::CONTENT_TYPE_JSON;
pub use http_util::CONTENT_TYPE_OCTET_STREAM;
pub use http_util::CONTENT_TYPE_TEXT;
pub use http_util::CONTENT_TYPE_URL_ENCODED;
pub use http_util::HEADER_REQUEST_ID;
pub use logging::ConfigLogging;
pub use logging::ConfigLoggingIfExists;
pub use logging::ConfigLoggingLevel;
pub use media_type::MediaType;
pub use media_type::MediaTypeError;
pub use negotiation::AlternatesNegotiationHandler;
pub use negotiation::AlternatesTokenGenerator;
pub use negotiation::NegotiationError;
pub use negotiation::NegotiationHandler;
pub use negotiation::NegotiationTokenGenerator;
pub use negotiation::HEADER_ALTERNATES;
pub use router::RouteLookupResult;
pub use router::RouteTable;
pub use router::RouteTableIter;
pub use server::HttpServer;
pub use service::InboundRequest;
pub use service::ServiceResponse;
pub use template::PathSegment;
pub use template::TemplateError;
pub use template::UriTemplate;
pub use template::VariableSet;

