// Copyright 2024 Oxide Computer Company

//! Representation types (`type/subtype` pairs) and `Accept` header parsing

use serde::Deserialize;
use serde::Serialize;
use std::borrow::Cow;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::str::FromStr;

/// `MediaType` identifies a representation family, like `application/json`.
///
/// Either half may be the wildcard `*`.  Values are immutable.  Equality and
/// hashing ignore ASCII case, so `Application/JSON` and `application/json`
/// are the same media type.  Parameters (anything after a `;`) are not part of
/// the value: they're accepted by the parser and discarded.
///
/// The well-known types are associated constants, so they can be used in
/// `const` context and compared against without allocating:
///
/// ```
/// use restmap::MediaType;
///
/// let parsed: MediaType = "Application/Json; charset=utf-8".parse().unwrap();
/// assert_eq!(parsed, MediaType::APPLICATION_JSON);
/// assert!(MediaType::WILDCARD.is_compatible(&parsed));
/// ```
#[derive(Clone, Debug, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct MediaType {
    type_: Cow<'static, str>,
    subtype: Cow<'static, str>,
}

const WILDCARD_PART: &str = "*";

// The constants are written as plain struct expressions (not `from_static()`
// calls) so that `&MediaType::APPLICATION_JSON` is promoted to `'static`.
macro_rules! media_type_const {
    ($type_:literal, $subtype:literal) => {
        MediaType {
            type_: Cow::Borrowed($type_),
            subtype: Cow::Borrowed($subtype),
        }
    };
}

impl MediaType {
    pub const WILDCARD: MediaType = media_type_const!("*", "*");
    pub const APPLICATION_JSON: MediaType =
        media_type_const!("application", "json");
    pub const APPLICATION_XML: MediaType =
        media_type_const!("application", "xml");
    pub const APPLICATION_OCTET_STREAM: MediaType =
        media_type_const!("application", "octet-stream");
    pub const APPLICATION_FORM_URLENCODED: MediaType =
        media_type_const!("application", "x-www-form-urlencoded");
    pub const MULTIPART_FORM_DATA: MediaType =
        media_type_const!("multipart", "form-data");
    pub const TEXT_PLAIN: MediaType = media_type_const!("text", "plain");
    pub const TEXT_XML: MediaType = media_type_const!("text", "xml");
    pub const TEXT_HTML: MediaType = media_type_const!("text", "html");

    /// Builds a `MediaType` from static strings.  The caller is responsible
    /// for passing valid tokens; use [`MediaType::new`] or `parse()` for
    /// arbitrary input.
    pub const fn from_static(
        type_: &'static str,
        subtype: &'static str,
    ) -> MediaType {
        MediaType {
            type_: Cow::Borrowed(type_),
            subtype: Cow::Borrowed(subtype),
        }
    }

    /// Builds a `MediaType` from its two halves, validating each.
    pub fn new(
        type_: &str,
        subtype: &str,
    ) -> Result<MediaType, MediaTypeError> {
        let type_ = validate_part(type_)?;
        let subtype = validate_part(subtype)?;
        if type_ == WILDCARD_PART && subtype != WILDCARD_PART {
            return Err(MediaTypeError::WildcardType(format!(
                "{}/{}",
                type_, subtype
            )));
        }
        Ok(MediaType {
            type_: Cow::Owned(type_.to_string()),
            subtype: Cow::Owned(subtype.to_string()),
        })
    }

    pub fn type_(&self) -> &str {
        &self.type_
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn is_wildcard_type(&self) -> bool {
        self.type_ == WILDCARD_PART
    }

    pub fn is_wildcard_subtype(&self) -> bool {
        self.subtype == WILDCARD_PART
    }

    /// Returns whether `self` and `other` could describe the same
    /// representation, treating `*` on either side as matching anything.
    /// This relation is symmetric.
    pub fn is_compatible(&self, other: &MediaType) -> bool {
        if self.is_wildcard_type() || other.is_wildcard_type() {
            return true;
        }
        if !self.type_.eq_ignore_ascii_case(&other.type_) {
            return false;
        }
        self.is_wildcard_subtype()
            || other.is_wildcard_subtype()
            || self.subtype.eq_ignore_ascii_case(&other.subtype)
    }

    /// Parses the value of an `Accept` header into the list of media types it
    /// names, in the order given.  Entries that don't parse are skipped, as
    /// are entries carrying `q=0` (which explicitly mark a type as not
    /// acceptable).  Other quality values are not used for ordering.
    pub fn parse_accept(header_value: &str) -> Vec<MediaType> {
        header_value
            .split(',')
            .filter(|entry| !entry.trim().is_empty())
            .filter(|entry| !has_zero_quality(entry))
            .filter_map(|entry| entry.parse().ok())
            .collect()
    }

    /// Renders a list of media types as an `Accept` header value.
    pub fn to_accept(types: &[MediaType]) -> String {
        types.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
    }
}

fn validate_part(part: &str) -> Result<&str, MediaTypeError> {
    let part = part.trim();
    if part.is_empty() {
        return Err(MediaTypeError::Empty);
    }
    if let Some(c) = part.chars().find(|c| !is_token_char(*c)) {
        return Err(MediaTypeError::BadCharacter(c, part.to_string()));
    }
    Ok(part)
}

/// See the `token` production in RFC 9110, section 5.6.2.
fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn has_zero_quality(entry: &str) -> bool {
    entry.split(';').skip(1).any(|param| {
        let mut kv = param.splitn(2, '=');
        let key = kv.next().unwrap_or("").trim();
        let value = kv.next().unwrap_or("").trim();
        key.eq_ignore_ascii_case("q")
            && value.parse::<f32>().map(|q| q == 0.0).unwrap_or(false)
    })
}

impl PartialEq for MediaType {
    fn eq(&self, other: &MediaType) -> bool {
        self.type_.eq_ignore_ascii_case(&other.type_)
            && self.subtype.eq_ignore_ascii_case(&other.subtype)
    }
}

impl Hash for MediaType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.type_.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(b'/');
        for b in self.subtype.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_, self.subtype)
    }
}

impl FromStr for MediaType {
    type Err = MediaTypeError;

    fn from_str(s: &str) -> Result<MediaType, MediaTypeError> {
        let essence = s.split(';').next().unwrap_or("").trim();
        if essence.is_empty() {
            return Err(MediaTypeError::Empty);
        }
        match essence.split_once('/') {
            None => Err(MediaTypeError::MissingSlash(essence.to_string())),
            Some((type_, subtype)) => MediaType::new(type_, subtype),
        }
    }
}

impl TryFrom<String> for MediaType {
    type Error = MediaTypeError;

    fn try_from(s: String) -> Result<MediaType, MediaTypeError> {
        s.parse()
    }
}

impl From<MediaType> for String {
    fn from(media_type: MediaType) -> String {
        media_type.to_string()
    }
}

/// Errors produced when parsing a [`MediaType`].
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum MediaTypeError {
    #[error("media type is empty")]
    Empty,
    #[error("media type \"{0}\" is missing \"/\"")]
    MissingSlash(String),
    #[error("invalid character {0:?} in media type part \"{1}\"")]
    BadCharacter(char, String),
    #[error("media type \"{0}\" has a wildcard type with a concrete subtype")]
    WildcardType(String),
}

#[cfg(test)]
mod test {
    use super::MediaType;
    use super::MediaTypeError;
    use std::collections::HashSet;

    #[test]
    fn test_parse_basic() {
        let m: MediaType = "application/json".parse().unwrap();
        assert_eq!(m.type_(), "application");
        assert_eq!(m.subtype(), "json");
        assert_eq!(m.to_string(), "application/json");

        let m: MediaType = "  text/plain ; charset=utf-8".parse().unwrap();
        assert_eq!(m, MediaType::TEXT_PLAIN);

        let m: MediaType = "*/*".parse().unwrap();
        assert_eq!(m, MediaType::WILDCARD);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<MediaType>().unwrap_err(), MediaTypeError::Empty);
        assert_eq!(
            "json".parse::<MediaType>().unwrap_err(),
            MediaTypeError::MissingSlash("json".to_string())
        );
        assert_eq!(
            "application/".parse::<MediaType>().unwrap_err(),
            MediaTypeError::Empty
        );
        assert_eq!(
            "text/pl ain".parse::<MediaType>().unwrap_err(),
            MediaTypeError::BadCharacter(' ', "pl ain".to_string())
        );
        assert_eq!(
            "*/json".parse::<MediaType>().unwrap_err(),
            MediaTypeError::WildcardType("*/json".to_string())
        );
    }

    #[test]
    fn test_case_insensitive_equality() {
        let upper: MediaType = "APPLICATION/JSON".parse().unwrap();
        assert_eq!(upper, MediaType::APPLICATION_JSON);
        /* Display preserves what was given. */
        assert_eq!(upper.to_string(), "APPLICATION/JSON");

        let mut set = HashSet::new();
        set.insert(upper);
        assert!(set.contains(&MediaType::APPLICATION_JSON));
        assert!(!set.contains(&MediaType::APPLICATION_XML));
    }

    #[test]
    fn test_compatibility() {
        let text_any: MediaType = "text/*".parse().unwrap();
        assert!(MediaType::WILDCARD.is_compatible(&MediaType::APPLICATION_XML));
        assert!(MediaType::APPLICATION_XML.is_compatible(&MediaType::WILDCARD));
        assert!(text_any.is_compatible(&MediaType::TEXT_PLAIN));
        assert!(MediaType::TEXT_HTML.is_compatible(&text_any));
        assert!(!text_any.is_compatible(&MediaType::APPLICATION_JSON));
        assert!(!MediaType::APPLICATION_JSON
            .is_compatible(&MediaType::APPLICATION_XML));
        assert!(MediaType::APPLICATION_JSON
            .is_compatible(&"application/JSON".parse().unwrap()));
    }

    #[test]
    fn test_parse_accept() {
        let accepted = MediaType::parse_accept(
            "text/plain, application/json;q=0.9, bogus, application/xml;q=0, \
             */*;q=0.1",
        );
        assert_eq!(accepted, vec![
            MediaType::TEXT_PLAIN,
            MediaType::APPLICATION_JSON,
            MediaType::WILDCARD,
        ]);
        assert!(MediaType::parse_accept("").is_empty());
        assert_eq!(
            MediaType::to_accept(&[
                MediaType::APPLICATION_JSON,
                MediaType::TEXT_PLAIN
            ]),
            "application/json, text/plain"
        );
    }

    #[test]
    fn test_serde() {
        let m: MediaType = serde_json::from_str("\"text/xml\"").unwrap();
        assert_eq!(m, MediaType::TEXT_XML);
        assert_eq!(serde_json::to_string(&m).unwrap(), "\"text/xml\"");
        assert!(serde_json::from_str::<MediaType>("\"nope\"").is_err());
    }
}
