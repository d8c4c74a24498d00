// Copyright 2024 Oxide Computer Company

//! Service handlers: the binding of one HTTP verb and path to an [`Action`]
//!
//! A [`ServiceHandler`] carries everything the dispatcher needs to route a
//! request to its action and to pick representations for it: the produced
//! media types, the consumed media type, the shape expected of the request
//! entity, and the names of the form parameters it reads.  Anything left
//! unset falls back to the defaults of the [`crate::ServiceDefinition`] the
//! handler is added to.

use crate::action::Action;
use crate::media_type::MediaType;
use debug_ignore::DebugIgnore;
use http::Method;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

/// `ServiceHandler` binds an HTTP verb and an optional path to an [`Action`].
///
/// The verb is fixed when the handler is constructed.  The path (if any) is
/// kept as written and is parsed into a [`crate::UriTemplate`] when the
/// handler is added to a service definition; a handler without a path is
/// served at the definition's base path.
#[derive(Debug)]
pub struct ServiceHandler {
    method: Method,
    path: Option<String>,
    action: DebugIgnore<Arc<dyn Action>>,
    produces: Vec<MediaType>,
    consumes: Option<MediaType>,
    entity_shape: Option<EntityShape>,
    form_params: Vec<String>,
    operation_name: Option<String>,
}

impl ServiceHandler {
    pub fn new<A: Action>(
        method: Method,
        path: Option<&str>,
        action: A,
    ) -> Self {
        ServiceHandler {
            method,
            path: path.map(str::to_string),
            action: DebugIgnore(Arc::new(action)),
            produces: Vec::new(),
            consumes: None,
            entity_shape: None,
            form_params: Vec::new(),
            operation_name: None,
        }
    }

    pub fn get<A: Action>(path: &str, action: A) -> Self {
        ServiceHandler::new(Method::GET, Some(path), action)
    }

    pub fn put<A: Action>(path: &str, action: A) -> Self {
        ServiceHandler::new(Method::PUT, Some(path), action)
    }

    pub fn post<A: Action>(path: &str, action: A) -> Self {
        ServiceHandler::new(Method::POST, Some(path), action)
    }

    pub fn delete<A: Action>(path: &str, action: A) -> Self {
        ServiceHandler::new(Method::DELETE, Some(path), action)
    }

    pub fn patch<A: Action>(path: &str, action: A) -> Self {
        ServiceHandler::new(Method::PATCH, Some(path), action)
    }

    pub fn head<A: Action>(path: &str, action: A) -> Self {
        ServiceHandler::new(Method::HEAD, Some(path), action)
    }

    pub fn options<A: Action>(path: &str, action: A) -> Self {
        ServiceHandler::new(Method::OPTIONS, Some(path), action)
    }

    /// Adds `media_type` to the representations this handler can produce.
    /// Order matters: when several are acceptable to a client, the first one
    /// listed is used.
    pub fn producing(mut self, media_type: MediaType) -> Self {
        if !self.produces.contains(&media_type) {
            self.produces.push(media_type);
        }
        self
    }

    /// Sets the representation this handler accepts for request bodies.
    pub fn consuming(mut self, media_type: MediaType) -> Self {
        self.consumes = Some(media_type);
        self
    }

    /// Declares that the request entity must deserialize as a `T`.
    pub fn with_entity<T: DeserializeOwned + 'static>(mut self) -> Self {
        self.entity_shape = Some(EntityShape::of::<T>());
        self
    }

    /// Declares a form parameter read by this handler.  Once any form
    /// parameter is declared, the action sees only declared ones.
    pub fn with_form_param(mut self, name: &str) -> Self {
        if !self.form_params.iter().any(|p| p == name) {
            self.form_params.push(name.to_string());
        }
        self
    }

    pub fn with_form_params<'a, I>(self, names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .fold(self, |handler, name| handler.with_form_param(name))
    }

    /// Sets a name for the operation, used in log messages.
    pub fn with_name(mut self, name: &str) -> Self {
        self.operation_name = Some(name.to_string());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The path as written, or `None` if the handler is served at the base
    /// path of its definition.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn action(&self) -> &Arc<dyn Action> {
        &self.action
    }

    /// The media types declared on this handler (not including the
    /// definition's defaults).
    pub fn produces(&self) -> &[MediaType] {
        &self.produces
    }

    pub fn consumes(&self) -> Option<&MediaType> {
        self.consumes.as_ref()
    }

    pub fn entity_shape(&self) -> Option<&EntityShape> {
        self.entity_shape.as_ref()
    }

    pub fn form_params(&self) -> &[String] {
        &self.form_params
    }

    /// The operation name, defaulting to the verb and path.
    pub fn operation_name(&self) -> String {
        match &self.operation_name {
            Some(name) => name.clone(),
            None => format!(
                "{} {}",
                self.method,
                self.path.as_deref().unwrap_or("<base path>")
            ),
        }
    }
}

/// `EntityShape` describes the type a request entity is expected to have.
///
/// The dispatcher uses it to reject a request whose entity decodes in the
/// right representation but has the wrong structure before the action is
/// invoked.
#[derive(Clone)]
pub struct EntityShape {
    type_name: &'static str,
    check: fn(&serde_json::Value) -> Result<(), String>,
}

impl EntityShape {
    pub fn of<T: DeserializeOwned + 'static>() -> Self {
        EntityShape {
            type_name: std::any::type_name::<T>(),
            check: check_as::<T>,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Checks that `value` deserializes as the expected type.  On failure,
    /// returns a message naming the offending field.
    pub fn check(&self, value: &serde_json::Value) -> Result<(), String> {
        (self.check)(value)
    }
}

fn check_as<T: DeserializeOwned>(
    value: &serde_json::Value,
) -> Result<(), String> {
    serde_path_to_error::deserialize::<_, T>(value)
        .map(|_| ())
        .map_err(|error| error.to_string())
}

impl fmt::Debug for EntityShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityShape")
            .field("type_name", &self.type_name)
            .finish()
    }
}
