// Copyright 2024 Oxide Computer Company

//! Representation negotiation after a "406 Not Acceptable"
//!
//! When none of the representations a handler produces is acceptable to a
//! client, the server doesn't just fail: it answers 406 with a challenge
//! header (by default the RFC 2295 `Alternates` header) listing every
//! representation it could have sent instead:
//!
//! ```text
//! Alternates: {"/getX/a" 1.0 {type application/json}},
//!     {"/getX/a" 1.0 {type application/xml}}
//! ```
//!
//! (The value is one line on the wire.)  The quality is always `1.0`.
//! Candidates are enumerated, not ranked.  Bytes of the URI that can't be
//! carried in the quoted string are percent-encoded.
//!
//! A client that receives the challenge picks the first type from its own
//! list of supported types (in its order of preference) that the server
//! offered, and retries the request once with that type in `Accept`.
//!
//! The server half is a [`NegotiationTokenGenerator`] and the client half is a
//! [`NegotiationHandler`].  Both are stateless.

use crate::media_type::MediaType;
use http::HeaderMap;
use http::StatusCode;
use percent_encoding::utf8_percent_encode;
use percent_encoding::AsciiSet;
use percent_encoding::CONTROLS;
use std::fmt::Debug;

/// Default name of the challenge header
pub const HEADER_ALTERNATES: &str = "Alternates";

/// Bytes encoded in the quoted URI of a candidate.  Non-ASCII bytes are
/// always encoded.
const CANDIDATE_URI: &AsciiSet =
    &CONTROLS.add(b' ').add(b'"').add(b'{').add(b'}');

/// `NegotiationTokenGenerator` produces the value of the challenge header a
/// server sends along with a 406 response.
pub trait NegotiationTokenGenerator: Debug + Send + Sync + 'static {
    /// Name of the header carrying the challenge.
    fn challenged_header_name(&self) -> &str {
        HEADER_ALTERNATES
    }

    /// Generates the challenge for a request for `uri` served by a handler
    /// that can produce `produced`.
    fn generate_token(&self, uri: &str, produced: &[MediaType]) -> String;
}

/// `NegotiationHandler` interprets a 406 response on the client side.
pub trait NegotiationHandler: Debug + Send + Sync + 'static {
    /// Name of the header carrying the challenge.
    fn challenged_header_name(&self) -> &str {
        HEADER_ALTERNATES
    }

    /// Given the status, reason phrase, and headers of a response and the
    /// media types the client can accept (most preferred first), returns the
    /// type to retry with.
    fn negotiate(
        &self,
        status: StatusCode,
        reason: &str,
        headers: &HeaderMap,
        accepted: &[MediaType],
    ) -> Result<MediaType, NegotiationError>;
}

/// Generates `Alternates` challenges in the format described in the module
/// documentation.
#[derive(Clone, Debug)]
pub struct AlternatesTokenGenerator {
    header_name: String,
}

impl AlternatesTokenGenerator {
    /// A generator that puts its challenge in `header_name` instead of
    /// `Alternates`.
    pub fn with_header_name(header_name: &str) -> Self {
        AlternatesTokenGenerator { header_name: header_name.to_string() }
    }
}

impl Default for AlternatesTokenGenerator {
    fn default() -> Self {
        AlternatesTokenGenerator::with_header_name(HEADER_ALTERNATES)
    }
}

impl NegotiationTokenGenerator for AlternatesTokenGenerator {
    fn challenged_header_name(&self) -> &str {
        &self.header_name
    }

    fn generate_token(&self, uri: &str, produced: &[MediaType]) -> String {
        let uri = utf8_percent_encode(uri, CANDIDATE_URI).to_string();
        produced
            .iter()
            .map(|media_type| {
                format!("{{\"{}\" 1.0 {{type {}}}}}", uri, media_type)
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Resolves `Alternates` challenges produced by
/// [`AlternatesTokenGenerator`].
#[derive(Clone, Debug)]
pub struct AlternatesNegotiationHandler {
    header_name: String,
}

impl AlternatesNegotiationHandler {
    pub fn with_header_name(header_name: &str) -> Self {
        AlternatesNegotiationHandler { header_name: header_name.to_string() }
    }
}

impl Default for AlternatesNegotiationHandler {
    fn default() -> Self {
        AlternatesNegotiationHandler::with_header_name(HEADER_ALTERNATES)
    }
}

impl NegotiationHandler for AlternatesNegotiationHandler {
    fn challenged_header_name(&self) -> &str {
        &self.header_name
    }

    fn negotiate(
        &self,
        status: StatusCode,
        reason: &str,
        headers: &HeaderMap,
        accepted: &[MediaType],
    ) -> Result<MediaType, NegotiationError> {
        if status != StatusCode::NOT_ACCEPTABLE {
            return Err(NegotiationError::NotNegotiable {
                status,
                reason: reason.to_string(),
            });
        }

        let challenge = headers
            .get_all(self.header_name.as_str())
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>();
        if challenge.is_empty() {
            return Err(NegotiationError::MissingChallenge {
                header_name: self.header_name.clone(),
                status,
                reason: reason.to_string(),
            });
        }

        let mut offered = Vec::new();
        for value in challenge {
            for candidate in split_candidates(value) {
                let media_type = candidate_type(candidate).ok_or_else(|| {
                    NegotiationError::Malformed {
                        candidate: candidate.to_string(),
                        status,
                        reason: reason.to_string(),
                    }
                })?;
                offered.push(media_type);
            }
        }

        accepted
            .iter()
            .find(|wanted| offered.contains(wanted))
            .cloned()
            .ok_or_else(|| NegotiationError::NoMatch {
                offered,
                status,
                reason: reason.to_string(),
            })
    }
}

/// Splits a challenge into its candidates: commas separate candidates except
/// inside a quoted string.  Blank candidates are dropped.
fn split_candidates(challenge: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in challenge.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                candidates.push(&challenge[start..i]);
                start = i + 1;
            }
            _ => (),
        }
    }
    candidates.push(&challenge[start..]);
    candidates
        .into_iter()
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty())
        .collect()
}

/// Extracts the media type from one candidate: the text after `{type` up to
/// the next `}`.
fn candidate_type(candidate: &str) -> Option<MediaType> {
    let start = candidate.find("{type")? + "{type".len();
    let rest = &candidate[start..];
    let end = rest.find('}')?;
    rest[..end].trim().parse().ok()
}

/// Errors resolving a 406 challenge.  Each carries the status and reason
/// phrase of the response that triggered negotiation.
#[derive(Clone, Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error("response is not negotiable: {status}: {reason}")]
    NotNegotiable { status: StatusCode, reason: String },
    #[error("response has no \"{header_name}\" header: {status}: {reason}")]
    MissingChallenge {
        header_name: String,
        status: StatusCode,
        reason: String,
    },
    #[error(
        "unparsable negotiation candidate \"{candidate}\": {status}: {reason}"
    )]
    Malformed { candidate: String, status: StatusCode, reason: String },
    #[error(
        "none of the offered types ({}) is acceptable: {status}: {reason}",
        MediaType::to_accept(.offered)
    )]
    NoMatch { offered: Vec<MediaType>, status: StatusCode, reason: String },
    #[error(
        "request still not acceptable after negotiation: {status}: {reason}"
    )]
    RetryExhausted { status: StatusCode, reason: String },
}

impl NegotiationError {
    /// Status code of the response that triggered negotiation.
    pub fn status(&self) -> StatusCode {
        match self {
            NegotiationError::NotNegotiable { status, .. }
            | NegotiationError::MissingChallenge { status, .. }
            | NegotiationError::Malformed { status, .. }
            | NegotiationError::NoMatch { status, .. }
            | NegotiationError::RetryExhausted { status, .. } => *status,
        }
    }

    /// Reason phrase of the response that triggered negotiation.
    pub fn reason(&self) -> &str {
        match self {
            NegotiationError::NotNegotiable { reason, .. }
            | NegotiationError::MissingChallenge { reason, .. }
            | NegotiationError::Malformed { reason, .. }
            | NegotiationError::NoMatch { reason, .. }
            | NegotiationError::RetryExhausted { reason, .. } => reason,
        }
    }
}

#[cfg(test)]
mod test {
    use super::split_candidates;
    use super::AlternatesNegotiationHandler;
    use super::AlternatesTokenGenerator;
    use super::NegotiationError;
    use super::NegotiationHandler;
    use super::NegotiationTokenGenerator;
    use crate::MediaType;
    use http::HeaderMap;
    use http::HeaderValue;
    use http::StatusCode;

    fn challenge_headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_generate_token() {
        let generator = AlternatesTokenGenerator::default();
        assert_eq!(generator.challenged_header_name(), "Alternates");
        let token = generator.generate_token("/getX/a", &[
            MediaType::APPLICATION_JSON,
            MediaType::APPLICATION_XML,
        ]);
        assert_eq!(
            token,
            "{\"/getX/a\" 1.0 {type application/json}},\
             {\"/getX/a\" 1.0 {type application/xml}}"
        );
        assert_eq!(generator.generate_token("/getX/a", &[]), "");
    }

    #[test]
    fn test_generate_token_encodes_uri() {
        let generator = AlternatesTokenGenerator::default();
        let token = generator
            .generate_token("/getX/caf\u{e9} \"x\"", &[MediaType::TEXT_PLAIN]);
        assert_eq!(
            token,
            "{\"/getX/caf%C3%A9%20%22x%22\" 1.0 {type text/plain}}"
        );
        assert!(HeaderValue::from_str(&token).is_ok());

        /* Already-encoded paths are left alone. */
        let token = generator
            .generate_token("/getX/caf%C3%A9", &[MediaType::TEXT_PLAIN]);
        assert_eq!(token, "{\"/getX/caf%C3%A9\" 1.0 {type text/plain}}");

        let headers = challenge_headers("alternates", &token);
        let chosen = AlternatesNegotiationHandler::default()
            .negotiate(
                StatusCode::NOT_ACCEPTABLE,
                "Not Acceptable",
                &headers,
                &[MediaType::TEXT_PLAIN],
            )
            .unwrap();
        assert_eq!(chosen, MediaType::TEXT_PLAIN);
    }

    #[test]
    fn test_round_trip() {
        let generator = AlternatesTokenGenerator::default();
        let token = generator.generate_token("/getX/a", &[
            MediaType::APPLICATION_JSON,
            MediaType::APPLICATION_XML,
        ]);
        let headers = challenge_headers("alternates", &token);

        let handler = AlternatesNegotiationHandler::default();
        let chosen = handler
            .negotiate(
                StatusCode::NOT_ACCEPTABLE,
                "Not Acceptable",
                &headers,
                &[
                    MediaType::APPLICATION_XML,
                    MediaType::APPLICATION_JSON,
                ],
            )
            .unwrap();
        assert_eq!(chosen, MediaType::APPLICATION_XML);

        /* The client's order decides, not the server's. */
        let chosen = handler
            .negotiate(
                StatusCode::NOT_ACCEPTABLE,
                "Not Acceptable",
                &headers,
                &[
                    MediaType::TEXT_PLAIN,
                    MediaType::APPLICATION_JSON,
                ],
            )
            .unwrap();
        assert_eq!(chosen, MediaType::APPLICATION_JSON);
    }

    #[test]
    fn test_case_insensitive_match() {
        let headers = challenge_headers(
            "alternates",
            "{\"/x\" 1.0 {type Application/XML}} , \
             {\"/x\" 1.0 {type text/plain}}",
        );
        let chosen = AlternatesNegotiationHandler::default()
            .negotiate(
                StatusCode::NOT_ACCEPTABLE,
                "Not Acceptable",
                &headers,
                &[MediaType::APPLICATION_XML],
            )
            .unwrap();
        assert_eq!(chosen.to_string(), "application/xml");
    }

    #[test]
    fn test_missing_challenge() {
        let error = AlternatesNegotiationHandler::default()
            .negotiate(
                StatusCode::NOT_ACCEPTABLE,
                "no acceptable type",
                &HeaderMap::new(),
                &[MediaType::APPLICATION_JSON],
            )
            .unwrap_err();
        assert!(matches!(error, NegotiationError::MissingChallenge { .. }));
        assert_eq!(error.status(), StatusCode::NOT_ACCEPTABLE);
        assert_eq!(error.reason(), "no acceptable type");
    }

    #[test]
    fn test_negotiation_failures() {
        let handler = AlternatesNegotiationHandler::default();
        let headers = challenge_headers(
            "alternates",
            "{\"/x\" 1.0 {type application/json}}",
        );

        let error = handler
            .negotiate(StatusCode::NOT_FOUND, "Not Found", &headers, &[
                MediaType::APPLICATION_JSON,
            ])
            .unwrap_err();
        assert!(matches!(error, NegotiationError::NotNegotiable { .. }));
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
        assert_eq!(error.reason(), "Not Found");

        let error = handler
            .negotiate(
                StatusCode::NOT_ACCEPTABLE,
                "Not Acceptable",
                &headers,
                &[MediaType::TEXT_PLAIN],
            )
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "none of the offered types (application/json) is acceptable: \
             406 Not Acceptable: Not Acceptable"
        );

        let headers =
            challenge_headers("alternates", "{\"/x\" 1.0 {kind text/plain}}");
        let error = handler
            .negotiate(
                StatusCode::NOT_ACCEPTABLE,
                "Not Acceptable",
                &headers,
                &[MediaType::TEXT_PLAIN],
            )
            .unwrap_err();
        assert!(matches!(error, NegotiationError::Malformed { .. }));
    }

    #[test]
    fn test_custom_header_name() {
        let generator =
            AlternatesTokenGenerator::with_header_name("x-alternates");
        let handler =
            AlternatesNegotiationHandler::with_header_name("x-alternates");
        let token =
            generator.generate_token("/x", &[MediaType::APPLICATION_JSON]);
        let headers = challenge_headers("x-alternates", &token);
        let chosen = handler
            .negotiate(StatusCode::NOT_ACCEPTABLE, "", &headers, &[
                MediaType::APPLICATION_JSON,
            ])
            .unwrap();
        assert_eq!(chosen, MediaType::APPLICATION_JSON);

        /* The default handler doesn't see the challenge. */
        assert!(AlternatesNegotiationHandler::default()
            .negotiate(StatusCode::NOT_ACCEPTABLE, "", &headers, &[
                MediaType::APPLICATION_JSON,
            ])
            .is_err());
    }

    #[test]
    fn test_split_candidates() {
        assert_eq!(
            split_candidates(
                "{\"/a,b\" 1.0 {type a/b}}, {\"/c\" 1.0 {type c/d}},"
            ),
            vec!["{\"/a,b\" 1.0 {type a/b}}", "{\"/c\" 1.0 {type c/d}}"]
        );
        assert!(split_candidates("").is_empty());
    }
}
