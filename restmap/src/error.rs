// Copyright 2024 Oxide Computer Company

//! Generic server error handling facilities
//!
//! Error handling in a service
//! ---------------------------
//!
//! There are several kinds of failure in this crate, and they're deliberately
//! kept apart:
//!
//! * Configuration errors ([`crate::DefinitionError`]) are reported when a
//!   [`crate::ServiceDefinition`] is finalized.  They are fatal: a service with
//!   a broken definition never starts.
//! * Routing misses are not errors at the route table level (lookup returns
//!   `None`).  The transport-facing helper
//!   [`crate::RouteTable::lookup_route`] turns them into a 404 or 405
//!   `HttpError`.
//! * Application errors ([`crate::ActionError`]) carry a status code and reason
//!   phrase chosen by an `Action`.  They are passed through to the client
//!   unchanged.
//! * Negotiation failures ([`crate::NegotiationError`]) are produced on the
//!   client side when a 406 challenge can't be resolved.
//!
//! Everything that can reach the wire on the server side is funneled into
//! `HttpError`, defined here.  It provides a status code, an optional error
//! code, an external message (for sending in the response), an internal message
//! (for the log file), and any extra response headers (like `Allow` for a 405
//! or the negotiation challenge for a 406).

use crate::http_util::CONTENT_TYPE_JSON;
use crate::http_util::HEADER_REQUEST_ID;
use bytes::Bytes;
use http::HeaderMap;
use http::StatusCode;
use http_body_util::Full;
use serde::Deserialize;
use serde::Serialize;
use std::error::Error;
use std::fmt;

/// `HttpError` represents an error generated as part of handling a request.
/// When these bubble up to the top of the request handling stack (which is
/// most of the time that they're generated), these are turned into an HTTP
/// response, which includes:
///
///   * a status code, which is likely either 400-level (indicating a client
///     error, like bad input) or 500-level (indicating a server error).
///   * a structured (JSON) body, which includes:
///       * a string error code, which identifies the underlying error condition
///         so that clients can potentially make programmatic decisions based on
///         the error type
///       * a string error message, which is the human-readable summary of the
///         issue, intended to make sense for API users (i.e., not server
///         developers).  For an application error, this is the action's reason
///         phrase.
///   * any headers in `headers`.
///
/// Besides that, `HttpError`s also have an internal error message, which may
/// differ from the error message that gets reported to users.
#[derive(Debug)]
pub struct HttpError {
    /// HTTP status code for this error
    pub status_code: StatusCode,
    /// Optional string error code for this error.
    pub error_code: Option<String>,
    /// Error message to be sent to the client for this error
    pub external_message: String,
    /// Error message recorded in the log for this error
    pub internal_message: String,
    /// Additional headers to include in the response
    pub headers: HeaderMap,
}

/// Body of an HTTP response for an `HttpError`.  This type can be used to
/// deserialize an HTTP response corresponding to an error in order to access
/// the error code, message, etc.
#[derive(Debug, Deserialize, Serialize)]
pub struct HttpErrorResponseBody {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub message: String,
}

impl From<hyper::Error> for HttpError {
    fn from(error: hyper::Error) -> Self {
        HttpError::for_bad_request(
            None,
            format!("error processing request: {}", error),
        )
    }
}

impl From<http::Error> for HttpError {
    fn from(error: http::Error) -> Self {
        HttpError::for_bad_request(
            None,
            format!("error processing request: {}", error),
        )
    }
}

impl HttpError {
    /// Generates an `HttpError` for any 400-level client error with a custom
    /// `message` used for both the internal and external message.
    pub fn for_client_error(
        error_code: Option<String>,
        status_code: StatusCode,
        message: String,
    ) -> Self {
        assert!(status_code.is_client_error());
        HttpError {
            status_code,
            error_code,
            internal_message: message.clone(),
            external_message: message,
            headers: HeaderMap::new(),
        }
    }

    /// Generates an `HttpError` for a 500 "Internal Server Error" error with
    /// the given `internal_message` for the internal message.
    pub fn for_internal_error(internal_message: String) -> Self {
        let status_code = StatusCode::INTERNAL_SERVER_ERROR;
        HttpError {
            status_code,
            error_code: Some(String::from("Internal")),
            external_message: canonical_reason(status_code),
            internal_message,
            headers: HeaderMap::new(),
        }
    }

    /// Generates a 400 "Bad Request" error with the given `message` used for
    /// both the internal and external message.  This is a convenience wrapper
    /// around [`HttpError::for_client_error`].
    pub fn for_bad_request(
        error_code: Option<String>,
        message: String,
    ) -> Self {
        HttpError::for_client_error(
            error_code,
            StatusCode::BAD_REQUEST,
            message,
        )
    }

    /// Generates an `HttpError` for the given HTTP `status_code` where the
    /// internal and external messages for the error come from the standard
    /// label for this status code (e.g., the message for status code 404 is
    /// "Not Found").
    pub fn for_status(
        error_code: Option<String>,
        status_code: StatusCode,
    ) -> Self {
        let message = canonical_reason(status_code);
        HttpError {
            status_code,
            error_code,
            internal_message: message.clone(),
            external_message: message,
            headers: HeaderMap::new(),
        }
    }

    /// Generates an `HttpError` for a 404 "Not Found" error with a custom
    /// internal message `internal_message`.  The external message will be "Not
    /// Found" (i.e., the standard label for status code 404).
    pub fn for_not_found(
        error_code: Option<String>,
        internal_message: String,
    ) -> Self {
        let status_code = StatusCode::NOT_FOUND;
        HttpError {
            status_code,
            error_code,
            internal_message,
            external_message: canonical_reason(status_code),
            headers: HeaderMap::new(),
        }
    }

    /// Generates an `HttpError` with an arbitrary status code and a message
    /// used for both the internal and external message.  Application errors
    /// are converted with this.
    pub fn for_status_with_message(
        status_code: StatusCode,
        message: String,
    ) -> Self {
        HttpError {
            status_code,
            error_code: None,
            internal_message: message.clone(),
            external_message: message,
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header to the eventual error response.
    pub fn with_header(
        mut self,
        name: http::header::HeaderName,
        value: http::HeaderValue,
    ) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Generates an HTTP response for the given `HttpError`, using `request_id`
    /// for the response's request id.
    pub fn into_response(
        self,
        request_id: &str,
    ) -> hyper::Response<Full<Bytes>> {
        let body = serde_json::to_string_pretty(&HttpErrorResponseBody {
            request_id: request_id.to_string(),
            message: self.external_message,
            error_code: self.error_code,
        })
        .unwrap_or_else(|_| String::from("{}"));

        let mut response = hyper::Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = self.status_code;
        let headers = response.headers_mut();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static(CONTENT_TYPE_JSON),
        );
        if let Ok(value) = http::HeaderValue::from_str(request_id) {
            headers.insert(HEADER_REQUEST_ID, value);
        }
        for (name, value) in self.headers.iter() {
            headers.append(name, value.clone());
        }
        response
    }
}

fn canonical_reason(status_code: StatusCode) -> String {
    status_code.canonical_reason().unwrap_or("Unknown Status").to_string()
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HttpError({}): {}", self.status_code, self.external_message)
    }
}

impl Error for HttpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

#[cfg(test)]
mod test {
    use super::HttpError;
    use crate::HttpErrorResponseBody;
    use http::StatusCode;
    use http_body_util::BodyExt;

    #[test]
    fn test_serialize_error_response_body() {
        let err = HttpErrorResponseBody {
            request_id: "123".to_string(),
            error_code: None,
            message: "oy!".to_string(),
        };
        let out = serde_json::to_string(&err).unwrap();
        assert_eq!(out, r#"{"request_id":"123","message":"oy!"}"#);

        let err = HttpErrorResponseBody {
            request_id: "123".to_string(),
            error_code: Some("err".to_string()),
            message: "oy!".to_string(),
        };
        let out = serde_json::to_string(&err).unwrap();
        assert_eq!(
            out,
            r#"{"request_id":"123","error_code":"err","message":"oy!"}"#
        );
    }

    #[test]
    fn test_constructors() {
        let error = HttpError::for_not_found(None, "no route".to_string());
        assert_eq!(error.status_code, StatusCode::NOT_FOUND);
        assert_eq!(error.external_message, "Not Found");
        assert_eq!(error.internal_message, "no route");

        let error = HttpError::for_status(None, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(error.external_message, "Method Not Allowed");

        let error = HttpError::for_internal_error("db down".to_string());
        assert_eq!(error.status_code, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.external_message, "Internal Server Error");
        assert_eq!(error.error_code.as_deref(), Some("Internal"));

        let error = HttpError::for_status_with_message(
            StatusCode::CONFLICT,
            "already exists".to_string(),
        );
        assert_eq!(
            error.to_string(),
            "HttpError(409 Conflict): already exists"
        );
    }

    #[tokio::test]
    async fn test_into_response() {
        let error =
            HttpError::for_status(None, StatusCode::METHOD_NOT_ALLOWED)
                .with_header(
                    http::header::ALLOW,
                    http::HeaderValue::from_static("GET"),
                );
        let response = error.into_response("req-1");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(http::header::ALLOW).unwrap(), "GET");
        assert_eq!(
            response.headers().get(crate::HEADER_REQUEST_ID).unwrap(),
            "req-1"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: HttpErrorResponseBody =
            serde_json::from_slice(&body).unwrap();
        assert_eq!(body.request_id, "req-1");
        assert_eq!(body.message, "Method Not Allowed");
    }
}
