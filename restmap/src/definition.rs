// Copyright 2024 Oxide Computer Company

//! Declarative service definitions

use crate::codec::CodecRegistry;
use crate::codec::EntityCodec;
use crate::handler::ServiceHandler;
use crate::media_type::MediaType;
use crate::negotiation::AlternatesTokenGenerator;
use crate::negotiation::NegotiationTokenGenerator;
use crate::router::RouteTable;
use crate::template::TemplateError;
use crate::template::UriTemplate;
use std::ops::Deref;
use std::sync::Arc;

/// `ServiceDefinition` describes a group of REST resources: a base path, the
/// handlers served under it, default representations, and the codecs and
/// negotiation policy used to serve them.
///
/// It's built with a consuming fluent interface:
///
/// ```
/// use restmap::ActionContext;
/// use restmap::ActionResponse;
/// use restmap::ActionResult;
/// use restmap::MediaType;
/// use restmap::ServiceDefinition;
/// use restmap::ServiceHandler;
///
/// async fn read(rqctx: ActionContext) -> ActionResult {
///     ActionResponse::ok(rqctx.path_variable("id")?)
/// }
///
/// let service = ServiceDefinition::new()
///     .with_path("/widgets")
///     .producing(MediaType::APPLICATION_JSON)
///     .with_handler(ServiceHandler::get("/:id", read))
///     .finalize()
///     .unwrap();
/// let route =
///     service.route_table().resolve(&http::Method::GET, "/widgets/w1");
/// assert_eq!(route.unwrap().template.to_string(), "/widgets/{id}");
/// ```
///
/// Every handler is registered in the route table as soon as it's added, at
/// its effective template (the base path joined with the handler's own path),
/// so the accessors always reflect what will be served.  Mistakes in the
/// definition, like a malformed template, don't interrupt the chain.  They're
/// recorded and reported by [`ServiceDefinition::finalize()`].
#[derive(Debug)]
pub struct ServiceDefinition {
    path: Option<UriTemplate>,
    produces: Vec<MediaType>,
    consumes: Option<MediaType>,
    handlers: Vec<Arc<ServiceHandler>>,
    route_table: RouteTable,
    codecs: CodecRegistry,
    negotiation_generator: Arc<dyn NegotiationTokenGenerator>,
    errors: Vec<DefinitionError>,
}

impl ServiceDefinition {
    pub fn new() -> Self {
        ServiceDefinition {
            path: None,
            produces: Vec::new(),
            consumes: None,
            handlers: Vec::new(),
            route_table: RouteTable::new(),
            codecs: CodecRegistry::default(),
            negotiation_generator: Arc::new(
                AlternatesTokenGenerator::default(),
            ),
            errors: Vec::new(),
        }
    }

    /// Sets the base path.  This may be done only once.  Handlers added
    /// before the base path is set are re-registered under it.
    pub fn with_path(mut self, path: &str) -> Self {
        if let Some(existing) = &self.path {
            self.errors.push(DefinitionError::PathAlreadySet {
                existing: existing.to_string(),
                requested: path.to_string(),
            });
            return self;
        }

        match UriTemplate::parse(path) {
            Ok(template) => {
                self.path = Some(template);
                self.reregister();
            }
            Err(error) => self.errors.push(DefinitionError::Template {
                path: path.to_string(),
                error,
            }),
        }
        self
    }

    /// Adds `handler` and registers it in the route table.
    pub fn with_handler(mut self, handler: ServiceHandler) -> Self {
        let handler = Arc::new(handler);
        self.handlers.push(Arc::clone(&handler));
        self.register(handler);
        self
    }

    /// Adds `media_type` to the representations produced by handlers that
    /// don't declare their own.
    pub fn producing(mut self, media_type: MediaType) -> Self {
        if !self.produces.contains(&media_type) {
            self.produces.push(media_type);
        }
        self
    }

    /// Sets the representation consumed by handlers that don't declare their
    /// own.
    pub fn consuming(mut self, media_type: MediaType) -> Self {
        self.consumes = Some(media_type);
        self
    }

    /// Registers an additional entity codec (replacing any existing codec
    /// for the same media type).
    pub fn with_codec<C: EntityCodec>(mut self, codec: C) -> Self {
        self.codecs.register(Arc::new(codec));
        self
    }

    /// Replaces the generator used for the challenge sent with 406 responses.
    pub fn with_negotiation_generator<G: NegotiationTokenGenerator>(
        mut self,
        generator: G,
    ) -> Self {
        self.negotiation_generator = Arc::new(generator);
        self
    }

    /// Validates the definition, producing a service that can be served.
    pub fn finalize(mut self) -> Result<RestService, DefinitionError> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }
        if self.path.is_none() {
            return Err(DefinitionError::MissingPath);
        }
        Ok(RestService(Arc::new(self)))
    }

    /// The base path, if one has been set.
    pub fn path(&self) -> Option<&UriTemplate> {
        self.path.as_ref()
    }

    /// Handlers in the order they were added.
    pub fn handlers(&self) -> &[Arc<ServiceHandler>] {
        &self.handlers
    }

    /// The default produced representations.
    pub fn produces(&self) -> &[MediaType] {
        &self.produces
    }

    /// The default consumed representation.
    pub fn consumes(&self) -> Option<&MediaType> {
        self.consumes.as_ref()
    }

    pub fn route_table(&self) -> &RouteTable {
        &self.route_table
    }

    pub fn codecs(&self) -> &CodecRegistry {
        &self.codecs
    }

    pub fn negotiation_generator(&self) -> &dyn NegotiationTokenGenerator {
        self.negotiation_generator.as_ref()
    }

    /// The template `handler` is served at: the base path joined with the
    /// handler's path.
    pub fn effective_template(
        &self,
        handler: &ServiceHandler,
    ) -> Result<UriTemplate, DefinitionError> {
        let base = self.path.clone().unwrap_or_else(UriTemplate::root);
        let Some(path) = handler.path() else {
            return Ok(base);
        };
        let template_error = |error| DefinitionError::Template {
            path: path.to_string(),
            error,
        };
        let relative = UriTemplate::parse(path).map_err(template_error)?;
        base.join(&relative).map_err(template_error)
    }

    /// The representations `handler` can produce, most preferred first: the
    /// handler's own, or the definition's defaults, or JSON if neither
    /// declares any.
    pub fn effective_produces(
        &self,
        handler: &ServiceHandler,
    ) -> Vec<MediaType> {
        if !handler.produces().is_empty() {
            handler.produces().to_vec()
        } else if !self.produces.is_empty() {
            self.produces.clone()
        } else {
            vec![MediaType::APPLICATION_JSON]
        }
    }

    /// The representation `handler` consumes, if it or the definition
    /// declares one.
    pub fn effective_consumes<'a>(
        &'a self,
        handler: &'a ServiceHandler,
    ) -> Option<&'a MediaType> {
        handler.consumes().or(self.consumes.as_ref())
    }

    fn register(&mut self, handler: Arc<ServiceHandler>) {
        match self.effective_template(&handler) {
            Ok(template) => {
                let method = handler.method().clone();
                self.route_table.register(&method, template, handler);
            }
            Err(error) => self.errors.push(error),
        }
    }

    fn reregister(&mut self) {
        self.route_table.clear();
        let handlers = self.handlers.clone();
        for handler in handlers {
            // A handler whose own path doesn't parse had that error recorded
            // when it was added.  Joining with the new base path can still
            // fail for the rest, and those errors are new.
            let own_path_is_valid = handler
                .path()
                .map_or(true, |path| UriTemplate::parse(path).is_ok());
            if own_path_is_valid {
                self.register(handler);
            }
        }
    }
}

impl Default for ServiceDefinition {
    fn default() -> Self {
        ServiceDefinition::new()
    }
}

/// Errors in a [`ServiceDefinition`], reported by
/// [`ServiceDefinition::finalize()`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    #[error("service definition has no base path")]
    MissingPath,
    #[error(
        "base path is already \"{existing}\" (attempted to set \"{requested}\")"
    )]
    PathAlreadySet { existing: String, requested: String },
    #[error("invalid path \"{path}\": {error}")]
    Template {
        path: String,
        #[source]
        error: TemplateError,
    },
}

/// `RestService` is a finalized [`ServiceDefinition`].  It's immutable and
/// cheap to clone, so it can be shared by every task serving requests.
#[derive(Clone, Debug)]
pub struct RestService(Arc<ServiceDefinition>);

impl Deref for RestService {
    type Target = ServiceDefinition;

    fn deref(&self) -> &ServiceDefinition {
        &self.0
    }
}
