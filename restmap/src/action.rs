// Copyright 2024 Oxide Computer Company

//! Interface for the business-logic callbacks bound to service handlers
//!
//! An [`Action`] is invoked once per request with an [`ActionContext`]: a
//! snapshot of everything the transport extracted from the request, already
//! routed and decoded.  The action either produces an [`ActionResponse`] or
//! fails with an [`ActionError`], whose status code and reason phrase are sent
//! to the client unchanged.
//!
//! Any async function (or closure) with the right signature is an `Action`:
//!
//! ```
//! use restmap::ActionContext;
//! use restmap::ActionError;
//! use restmap::ActionResponse;
//! use restmap::ActionResult;
//! use restmap::ServiceHandler;
//! use http::StatusCode;
//!
//! async fn read_widget(rqctx: ActionContext) -> ActionResult {
//!     let id = rqctx.path_variable("id")?;
//!     if id == "missing" {
//!         let status = StatusCode::NOT_FOUND;
//!         return Err(ActionError::new(status, "no such widget"));
//!     }
//!     ActionResponse::ok(&vec![id])
//! }
//!
//! let handler = ServiceHandler::get("/widgets/:id", read_widget);
//! ```

use crate::http_util::FormParams;
use crate::template::VariableSet;
use async_trait::async_trait;
use bytes::Buf;
use bytes::Bytes;
use http::header::HeaderName;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use slog::Logger;
use std::fmt;
use std::future::Future;

/// Type alias for the result returned by an [`Action`].
pub type ActionResult = Result<ActionResponse, ActionError>;

/// `Action` is the business-logic capability bound to a
/// [`crate::ServiceHandler`].
#[async_trait]
pub trait Action: Send + Sync + 'static {
    async fn invoke(&self, rqctx: ActionContext) -> ActionResult;
}

#[async_trait]
impl<F, Fut> Action for F
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    async fn invoke(&self, rqctx: ActionContext) -> ActionResult {
        (self)(rqctx).await
    }
}

/// `ActionError` signals an application-level failure that must be reported
/// to the remote caller as-is, like a 404 for a missing object or a 409 for a
/// conflicting one.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{status_code}: {reason_phrase}")]
pub struct ActionError {
    pub status_code: StatusCode,
    pub reason_phrase: String,
}

impl ActionError {
    pub fn new<S: Into<String>>(
        status_code: StatusCode,
        reason_phrase: S,
    ) -> Self {
        ActionError { status_code, reason_phrase: reason_phrase.into() }
    }

    /// An error whose reason phrase is the standard label for `status_code`.
    pub fn for_status(status_code: StatusCode) -> Self {
        ActionError::new(
            status_code,
            status_code.canonical_reason().unwrap_or("Unknown Status"),
        )
    }

    pub fn bad_request<S: Into<String>>(reason_phrase: S) -> Self {
        ActionError::new(StatusCode::BAD_REQUEST, reason_phrase)
    }

    pub fn not_found<S: Into<String>>(reason_phrase: S) -> Self {
        ActionError::new(StatusCode::NOT_FOUND, reason_phrase)
    }

    pub fn internal<S: Into<String>>(reason_phrase: S) -> Self {
        ActionError::new(StatusCode::INTERNAL_SERVER_ERROR, reason_phrase)
    }
}

/// The body of an [`ActionResponse`].
#[derive(Clone, Debug, PartialEq)]
pub enum ActionBody {
    /// no body at all
    Empty,
    /// bytes sent verbatim with the given content type
    Raw { content_type: HeaderValue, bytes: Bytes },
    /// a value to be encoded in the negotiated representation
    Entity(serde_json::Value),
}

/// What an [`Action`] produces on success: a status code, extra headers, and a
/// body.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ActionBody,
}

impl ActionResponse {
    /// A response with the given status and no body.
    pub fn empty(status: StatusCode) -> Self {
        ActionResponse {
            status,
            headers: HeaderMap::new(),
            body: ActionBody::Empty,
        }
    }

    /// A response whose body is `entity` in the negotiated representation.
    pub fn entity<T: Serialize + ?Sized>(
        status: StatusCode,
        entity: &T,
    ) -> ActionResult {
        let value = serde_json::to_value(entity).map_err(|error| {
            ActionError::internal(format!(
                "failed to serialize entity: {}",
                error
            ))
        })?;
        Ok(ActionResponse {
            status,
            headers: HeaderMap::new(),
            body: ActionBody::Entity(value),
        })
    }

    /// A "200 OK" response with an entity body.
    pub fn ok<T: Serialize + ?Sized>(entity: &T) -> ActionResult {
        ActionResponse::entity(StatusCode::OK, entity)
    }

    /// A "201 Created" response with no body.
    pub fn created() -> ActionResult {
        Ok(ActionResponse::empty(StatusCode::CREATED))
    }

    /// A "204 No Content" response.
    pub fn no_content() -> ActionResult {
        Ok(ActionResponse::empty(StatusCode::NO_CONTENT))
    }

    /// A response whose body is sent verbatim with the given content type.
    pub fn raw(
        status: StatusCode,
        content_type: HeaderValue,
        bytes: Bytes,
    ) -> Self {
        ActionResponse {
            status,
            headers: HeaderMap::new(),
            body: ActionBody::Raw { content_type, bytes },
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// `ActionContext` is the per-request data passed to an [`Action`].
///
/// It's built once per request by the dispatcher after routing and body
/// decoding are complete, and it's never shared between requests.
pub struct ActionContext {
    method: Method,
    path: String,
    request_id: String,
    headers: HeaderMap,
    form_params: FormParams,
    path_variables: VariableSet,
    body: Bytes,
    entity: Option<serde_json::Value>,
    /// logger for this specific request
    pub log: Logger,
}

impl ActionContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        method: Method,
        path: String,
        request_id: String,
        headers: HeaderMap,
        form_params: FormParams,
        path_variables: VariableSet,
        body: Bytes,
        entity: Option<serde_json::Value>,
        log: Logger,
    ) -> Self {
        ActionContext {
            method,
            path,
            request_id,
            headers,
            form_params,
            path_variables,
            body,
            entity,
            log,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The concrete request path (not the template).
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the first value of header `name`, if it's present and valid
    /// UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn form_params(&self) -> &FormParams {
        &self.form_params
    }

    /// Returns the first value of form parameter `name`.
    pub fn form_param(&self, name: &str) -> Option<&str> {
        self.form_params
            .get(name)
            .and_then(|values| values.first())
            .map(|v| v.as_str())
    }

    /// Returns all values of form parameter `name`, in request order.
    pub fn form_values(&self, name: &str) -> &[String] {
        self.form_params.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn path_variables(&self) -> &VariableSet {
        &self.path_variables
    }

    /// Returns the value bound to path variable `name`.  A missing variable
    /// means the action was bound to a template that doesn't declare it, which
    /// is reported as a 500.
    pub fn path_variable(&self, name: &str) -> Result<&str, ActionError> {
        self.path_variables.get(name).map(|v| v.as_str()).ok_or_else(|| {
            ActionError::internal(format!(
                "path variable \"{}\" is not defined for this route",
                name
            ))
        })
    }

    /// The raw request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// The raw request body as a reader.
    pub fn body_reader(&self) -> impl std::io::Read {
        self.body.clone().reader()
    }

    /// The request entity, if the request had a body in a representation with
    /// a registered codec.
    pub fn entity_value(&self) -> Option<&serde_json::Value> {
        self.entity.as_ref()
    }

    /// Deserializes the request entity as a `T`.  A missing entity or one that
    /// doesn't have the expected shape is reported as a 400.
    pub fn entity<T: DeserializeOwned>(&self) -> Result<T, ActionError> {
        let value = self
            .entity
            .as_ref()
            .ok_or_else(|| ActionError::bad_request("request has no entity"))?;
        serde_path_to_error::deserialize(value).map_err(|error| {
            ActionError::bad_request(format!(
                "unable to parse request entity: {}",
                error
            ))
        })
    }
}

impl fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("request_id", &self.request_id)
            .field("headers", &self.headers)
            .field("form_params", &self.form_params)
            .field("path_variables", &self.path_variables)
            .field("body_len", &self.body.len())
            .field("entity", &self.entity)
            .finish()
    }
}
