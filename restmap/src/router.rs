// Copyright 2024 Oxide Computer Company

//! Routes incoming requests to service handlers

use crate::error::HttpError;
use crate::handler::ServiceHandler;
use crate::template::UriTemplate;
use crate::template::VariableSet;
use http::Method;
use http::StatusCode;
use indexmap::IndexMap;
use std::sync::Arc;

/// `RouteTable` maps (HTTP verb, URI template) pairs to service handlers.
///
/// Routes are keyed by the uppercased verb and the canonical text of the
/// template, so `"/widgets/:id"` and `"/widgets/{id}/"` name the same route.
/// There is at most one handler per key: registering a second one replaces
/// the first (which is returned to the caller) but keeps its place in the
/// table.
///
/// Lookups scan the routes in registration order and return the first one
/// whose verb and template both match.  Unlike a trie, nothing prevents two
/// different templates from matching the same path (say `"/projects/{id}"`
/// and `"/projects/default"`); in that case the one registered first wins.
/// Avoid overlapping templates.
///
/// The expectation is that during start-up, `register()` is invoked for each
/// handler of a service definition.  After that the table is read-only.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: IndexMap<(String, String), RouteEntry>,
}

#[derive(Debug)]
struct RouteEntry {
    method: Method,
    template: UriTemplate,
    handler: Arc<ServiceHandler>,
}

/// `RouteLookupResult` is the result of a successful lookup: the handler, the
/// template it was registered at, and the values of the template's variables.
#[derive(Debug)]
pub struct RouteLookupResult<'a> {
    pub handler: &'a Arc<ServiceHandler>,
    pub template: &'a UriTemplate,
    pub variables: VariableSet,
}

impl RouteTable {
    pub fn new() -> Self {
        RouteTable { routes: IndexMap::new() }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registers `handler` for `method` at `template`.  Returns the handler
    /// previously registered for the same verb and template, if any.
    pub fn register(
        &mut self,
        method: &Method,
        template: UriTemplate,
        handler: Arc<ServiceHandler>,
    ) -> Option<Arc<ServiceHandler>> {
        let key = (method.as_str().to_ascii_uppercase(), template.to_string());
        self.routes
            .insert(key, RouteEntry {
                method: method.clone(),
                template,
                handler,
            })
            .map(|previous| previous.handler)
    }

    /// Removes every route.
    pub fn clear(&mut self) {
        self.routes.clear();
    }

    /// Looks up the handler for `method` and the concrete request path
    /// `path`.  The verb comparison ignores ASCII case.
    pub fn resolve(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<RouteLookupResult<'_>> {
        self.routes
            .values()
            .filter(|entry| {
                entry.method.as_str().eq_ignore_ascii_case(method.as_str())
            })
            .find_map(|entry| {
                entry.template.matches(path).map(|variables| {
                    RouteLookupResult {
                        handler: &entry.handler,
                        template: &entry.template,
                        variables,
                    }
                })
            })
    }

    /// Returns the verbs of all routes whose template matches `path`, in
    /// registration order and without duplicates.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = Vec::new();
        for entry in self.routes.values() {
            if entry.template.matches(path).is_some()
                && !methods.contains(&entry.method)
            {
                methods.push(entry.method.clone());
            }
        }
        methods
    }

    /// Like [`RouteTable::resolve`], but reports a miss the way an HTTP
    /// server should: a 405 "Method Not Allowed" (with an `Allow` header) if
    /// some other verb is served at `path`, and a 404 "Not Found" otherwise.
    pub fn lookup_route(
        &self,
        method: &Method,
        path: &str,
    ) -> Result<RouteLookupResult<'_>, HttpError> {
        if let Some(result) = self.resolve(method, path) {
            return Ok(result);
        }

        let allowed = self.allowed_methods(path);
        if allowed.is_empty() {
            return Err(HttpError::for_not_found(
                None,
                format!("no route found for \"{}\"", path),
            ));
        }

        let allow = allowed
            .iter()
            .map(|m| m.as_str().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let mut error =
            HttpError::for_status(None, StatusCode::METHOD_NOT_ALLOWED);
        if let Ok(value) = http::HeaderValue::from_str(&allow) {
            error = error.with_header(http::header::ALLOW, value);
        }
        Err(error)
    }
}

impl<'a> IntoIterator for &'a RouteTable {
    type Item = (&'a UriTemplate, &'a Method, &'a Arc<ServiceHandler>);
    type IntoIter = RouteTableIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        RouteTableIter { inner: self.routes.values() }
    }
}

/// Iterator over the routes of a [`RouteTable`] in registration order,
/// yielding the template, verb, and handler of each.
pub struct RouteTableIter<'a> {
    inner: indexmap::map::Values<'a, (String, String), RouteEntry>,
}

impl<'a> Iterator for RouteTableIter<'a> {
    type Item = (&'a UriTemplate, &'a Method, &'a Arc<ServiceHandler>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|entry| (&entry.template, &entry.method, &entry.handler))
    }
}
