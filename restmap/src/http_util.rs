// Copyright 2024 Oxide Computer Company

//! General-purpose HTTP-related facilities

use crate::error::HttpError;
use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::Limited;
use std::collections::BTreeMap;

/// header name for conveying request ids ("x-request-id")
pub const HEADER_REQUEST_ID: &str = "x-request-id";
/// MIME type for plain JSON data
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// MIME type for plain text
pub const CONTENT_TYPE_TEXT: &str = "text/plain";
/// MIME type for raw bytes
pub const CONTENT_TYPE_OCTET_STREAM: &str = "application/octet-stream";
/// MIME type for form/urlencoded data
pub const CONTENT_TYPE_URL_ENCODED: &str = "application/x-www-form-urlencoded";

/// Form and query parameters: each name maps to its values in the order they
/// appeared.
pub type FormParams = BTreeMap<String, Vec<String>>;

/// Reads the rest of the body from the request up to the given number of bytes.
/// If the body fits within the specified cap, a buffer is returned with all the
/// bytes read.  If not, an error is returned.
pub async fn http_read_body<T>(body: T, cap: usize) -> Result<Bytes, HttpError>
where
    T: hyper::body::Body,
    T::Error: std::error::Error + Send + Sync + 'static,
{
    match Limited::new(body, cap).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(error) => {
            if error
                .downcast_ref::<http_body_util::LengthLimitError>()
                .is_some()
            {
                Err(HttpError::for_bad_request(
                    None,
                    format!(
                        "request body exceeded maximum size of {} bytes",
                        cap
                    ),
                ))
            } else {
                Err(HttpError::for_bad_request(
                    None,
                    format!("error reading request body: {}", error),
                ))
            }
        }
    }
}

/// Appends the `name=value` pairs of an urlencoded string to `params`.
pub fn parse_form_into(params: &mut FormParams, encoded: &[u8]) {
    for (name, value) in form_urlencoded::parse(encoded) {
        params.entry(name.into_owned()).or_default().push(value.into_owned());
    }
}

/// Encodes `pairs` as an `application/x-www-form-urlencoded` string.
pub fn encode_form<'a, I>(pairs: I) -> String
where
    I: IntoIterator<Item = &'a (String, String)>,
{
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (name, value) in pairs {
        serializer.append_pair(name, value);
    }
    serializer.finish()
}
