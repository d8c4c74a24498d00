// Copyright 2024 Oxide Computer Company

//! URI path templates: parsing, normalization, and matching

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

/// Variable bindings produced by matching a path against a template, keyed by
/// variable name.
pub type VariableSet = BTreeMap<String, String>;

/// `UriTemplate` is a parsed path pattern like `"/projects/{id}/info"`.
///
/// Paths are split into segments separated by one or more '/' characters.
/// Empty segments are ignored, so leading, trailing, and repeated slashes are
/// insignificant: `"/projects/{id}/info/"` and `"//projects//{id}/info"` are
/// the same template.  The template with no segments at all (`"/"` or `""`)
/// matches only the root path.
///
/// A segment is either a literal or a variable.  Variables are written either
/// by wrapping the segment in braces (`{id}`) or by prefixing it with a colon
/// (`:id`).  Both spellings produce the same template, and the canonical text
/// of a template (its `Display` form, used as the route table key) always uses
/// braces.
///
/// A variable matches exactly one segment, so `"/foo/{bar}"` matches
/// `"/foo/123"` (binding `bar` to `"123"`), but not `"/foo/123/456"`.  There
/// are no optional segments and no multi-segment variables: a path matches
/// only if it has as many segments as the template.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct UriTemplate {
    segments: Vec<PathSegment>,
}

/// `PathSegment` represents one segment of a [`UriTemplate`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PathSegment {
    /// a path segment for a literal string
    Literal(String),
    /// a path segment for a variable
    Varname(String),
}

impl PathSegment {
    /// Given a single segment of a path specification, determine whether it's
    /// a variable or a literal.
    pub fn parse(segment: &str) -> Result<PathSegment, TemplateError> {
        if let Some(name) = segment.strip_prefix(':') {
            if name.is_empty() {
                return Err(TemplateError::EmptyVarname(segment.to_string()));
            }
            return Ok(PathSegment::Varname(name.to_string()));
        }

        if segment.starts_with('{') || segment.ends_with('}') {
            if !segment.starts_with('{') {
                return Err(TemplateError::MissingLeadingBrace(
                    segment.to_string(),
                ));
            }
            if !segment.ends_with('}') {
                return Err(TemplateError::MissingTrailingBrace(
                    segment.to_string(),
                ));
            }
            if segment.len() <= 2 {
                return Err(TemplateError::EmptyVarname(segment.to_string()));
            }
            return Ok(PathSegment::Varname(
                segment[1..segment.len() - 1].to_string(),
            ));
        }

        Ok(PathSegment::Literal(segment.to_string()))
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Literal(s) => write!(f, "{}", s),
            PathSegment::Varname(s) => write!(f, "{{{}}}", s),
        }
    }
}

impl UriTemplate {
    /// The template with no segments, which matches only the root path.
    pub fn root() -> UriTemplate {
        UriTemplate { segments: Vec::new() }
    }

    /// Parses a path specification.  This fails for a variable segment with
    /// mismatched braces or an empty name, or if the same variable name
    /// appears more than once.
    pub fn parse(path: &str) -> Result<UriTemplate, TemplateError> {
        let segments = path_to_segments(path)
            .into_iter()
            .map(PathSegment::parse)
            .collect::<Result<Vec<_>, _>>()?;
        let template = UriTemplate { segments };
        template.check_varnames(path)?;
        Ok(template)
    }

    /// Returns the template for `self` followed by `relative`.
    pub fn join(
        &self,
        relative: &UriTemplate,
    ) -> Result<UriTemplate, TemplateError> {
        let mut segments = self.segments.clone();
        segments.extend(relative.segments.iter().cloned());
        let template = UriTemplate { segments };
        template.check_varnames(&template.to_string())?;
        Ok(template)
    }

    fn check_varnames(&self, path: &str) -> Result<(), TemplateError> {
        let mut varnames: BTreeSet<&str> = BTreeSet::new();
        for segment in &self.segments {
            if let PathSegment::Varname(name) = segment {
                if !varnames.insert(name.as_str()) {
                    return Err(TemplateError::DuplicateVarname {
                        path: path.to_string(),
                        varname: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Names of the variables in this template, in path order.
    pub fn varnames(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            PathSegment::Varname(name) => Some(name.as_str()),
            PathSegment::Literal(_) => None,
        })
    }

    /// Tests whether the concrete request path `path` matches this template.
    /// On a match, returns the value of each variable.
    pub fn matches(&self, path: &str) -> Option<VariableSet> {
        let path_segments = path_to_segments(path);
        if path_segments.len() != self.segments.len() {
            return None;
        }

        let mut variables = VariableSet::new();
        for (template_segment, path_segment) in
            self.segments.iter().zip(path_segments)
        {
            match template_segment {
                PathSegment::Literal(lit) => {
                    if lit != path_segment {
                        return None;
                    }
                }
                PathSegment::Varname(name) => {
                    variables.insert(name.clone(), path_segment.to_string());
                }
            }
        }

        Some(variables)
    }

    /// Substitutes `variables` into the template, producing a concrete path.
    /// Returns `None` if any variable in the template has no value.
    pub fn expand(&self, variables: &VariableSet) -> Option<String> {
        let components = self
            .segments
            .iter()
            .map(|segment| match segment {
                PathSegment::Literal(s) => Some(s.as_str()),
                PathSegment::Varname(name) => {
                    variables.get(name).map(|v| v.as_str())
                }
            })
            .collect::<Option<Vec<_>>>()?;
        Some(format!("/{}", components.join("/")))
    }
}

/// The canonical text of the template: a leading `/`, segments separated by a
/// single `/`, and variables in braces.
impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for UriTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<UriTemplate, TemplateError> {
        UriTemplate::parse(s)
    }
}

/// Errors produced when parsing a path specification into a [`UriTemplate`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TemplateError {
    #[error(
        "path segment \"{0}\": variable missing leading \"{{\""
    )]
    MissingLeadingBrace(String),
    #[error(
        "path segment \"{0}\": variable missing trailing \"}}\""
    )]
    MissingTrailingBrace(String),
    #[error("path segment \"{0}\": variable name cannot be empty")]
    EmptyVarname(String),
    #[error(
        "URI path \"{path}\": variable name \"{varname}\" is used more than \
         once"
    )]
    DuplicateVarname { path: String, varname: String },
}

/// Splits a URI path into its non-empty segments.
///
/// We're given the "path" portion of a URI (no scheme, authority, or query
/// string).  Consecutive "/" characters are treated as one, and a leading or
/// trailing "/" contributes nothing.  Segments are returned exactly as they
/// appear: no percent-decoding and no "." or ".." processing is done.
pub fn path_to_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect::<Vec<_>>()
}
