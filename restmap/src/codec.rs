// Copyright 2024 Oxide Computer Company

//! Entity codecs: turning request and response bodies into values and back
//!
//! The dispatcher doesn't know any serialization format itself.  It asks the
//! [`CodecRegistry`] of the service definition for an [`EntityCodec`] that
//! handles the negotiated media type.  JSON and plain text are registered by
//! default; other representations are added with
//! [`crate::ServiceDefinition::with_codec`].

use crate::media_type::MediaType;
use bytes::Bytes;
use std::fmt::Debug;
use std::sync::Arc;

/// An `EntityCodec` converts between the bytes of one representation and a
/// [`serde_json::Value`].
pub trait EntityCodec: Debug + Send + Sync + 'static {
    /// The media type this codec produces and consumes.
    fn media_type(&self) -> &MediaType;

    fn encode(&self, value: &serde_json::Value) -> Result<Bytes, CodecError>;

    fn decode(&self, body: &[u8]) -> Result<serde_json::Value, CodecError>;
}

/// Errors produced by an [`EntityCodec`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {media_type} entity: {message}")]
    Encode { media_type: MediaType, message: String },
    #[error("failed to decode {media_type} entity: {message}")]
    Decode { media_type: MediaType, message: String },
}

/// `application/json`, via `serde_json`.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl EntityCodec for JsonCodec {
    fn media_type(&self) -> &MediaType {
        &MediaType::APPLICATION_JSON
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value).map(Bytes::from).map_err(|error| {
            CodecError::Encode {
                media_type: MediaType::APPLICATION_JSON,
                message: error.to_string(),
            }
        })
    }

    fn decode(&self, body: &[u8]) -> Result<serde_json::Value, CodecError> {
        serde_json::from_slice(body).map_err(|error| CodecError::Decode {
            media_type: MediaType::APPLICATION_JSON,
            message: error.to_string(),
        })
    }
}

/// `text/plain`.  A string value is written verbatim; anything else is written
/// as its JSON text.  Decoding always produces a string value.
#[derive(Debug, Default)]
pub struct PlainTextCodec;

impl EntityCodec for PlainTextCodec {
    fn media_type(&self) -> &MediaType {
        &MediaType::TEXT_PLAIN
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Bytes, CodecError> {
        match value {
            serde_json::Value::String(s) => Ok(Bytes::from(s.clone())),
            other => Ok(Bytes::from(other.to_string())),
        }
    }

    fn decode(&self, body: &[u8]) -> Result<serde_json::Value, CodecError> {
        std::str::from_utf8(body)
            .map(|s| serde_json::Value::String(s.to_string()))
            .map_err(|error| CodecError::Decode {
                media_type: MediaType::TEXT_PLAIN,
                message: error.to_string(),
            })
    }
}

/// An ordered set of codecs.  Lookups return the first registered codec whose
/// media type is compatible with the one requested, so registration order is
/// the tie-break for wildcard requests.
#[derive(Clone, Debug)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn EntityCodec>>,
}

impl CodecRegistry {
    /// A registry with no codecs at all.
    pub fn empty() -> Self {
        CodecRegistry { codecs: Vec::new() }
    }

    /// Adds `codec`.  A codec registered for a media type that's already
    /// present replaces the earlier one.
    pub fn register(&mut self, codec: Arc<dyn EntityCodec>) {
        match self
            .codecs
            .iter_mut()
            .find(|existing| existing.media_type() == codec.media_type())
        {
            Some(existing) => *existing = codec,
            None => self.codecs.push(codec),
        }
    }

    /// Finds a codec for `media_type`, preferring an exact match over a
    /// wildcard one.
    pub fn find(
        &self,
        media_type: &MediaType,
    ) -> Option<&Arc<dyn EntityCodec>> {
        self.codecs
            .iter()
            .find(|codec| codec.media_type() == media_type)
            .or_else(|| {
                self.codecs
                    .iter()
                    .find(|codec| codec.media_type().is_compatible(media_type))
            })
    }

    pub fn media_types(&self) -> impl Iterator<Item = &MediaType> {
        self.codecs.iter().map(|codec| codec.media_type())
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = CodecRegistry::empty();
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(PlainTextCodec));
        registry
    }
}

#[cfg(test)]
mod test {
    use super::CodecRegistry;
    use super::EntityCodec;
    use super::JsonCodec;
    use super::PlainTextCodec;
    use crate::MediaType;
    use std::sync::Arc;

    #[test]
    fn test_json_codec() {
        let value = serde_json::json!({ "values": ["v"] });
        let bytes = JsonCodec.encode(&value).unwrap();
        assert_eq!(&bytes[..], br#"{"values":["v"]}"#);
        assert_eq!(JsonCodec.decode(&bytes).unwrap(), value);

        let error = JsonCodec.decode(b"{not json").unwrap_err();
        assert!(error
            .to_string()
            .starts_with("failed to decode application/json entity: "));
    }

    #[test]
    fn test_plain_text_codec() {
        let bytes = PlainTextCodec.encode(&serde_json::json!("hello")).unwrap();
        assert_eq!(&bytes[..], b"hello");
        let bytes = PlainTextCodec.encode(&serde_json::json!(["v"])).unwrap();
        assert_eq!(&bytes[..], br#"["v"]"#);
        assert_eq!(
            PlainTextCodec.decode(b"hello").unwrap(),
            serde_json::json!("hello")
        );
        assert!(PlainTextCodec.decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = CodecRegistry::default();
        assert_eq!(
            registry.find(&MediaType::APPLICATION_JSON).unwrap().media_type(),
            &MediaType::APPLICATION_JSON
        );
        assert_eq!(
            registry.find(&"text/*".parse().unwrap()).unwrap().media_type(),
            &MediaType::TEXT_PLAIN
        );
        /* A full wildcard picks the first registered codec. */
        assert_eq!(
            registry.find(&MediaType::WILDCARD).unwrap().media_type(),
            &MediaType::APPLICATION_JSON
        );
        assert!(registry.find(&MediaType::APPLICATION_XML).is_none());
        assert!(CodecRegistry::empty().find(&MediaType::WILDCARD).is_none());
    }

    #[test]
    fn test_registry_replace() {
        let mut registry = CodecRegistry::default();
        registry.register(Arc::new(JsonCodec));
        assert_eq!(registry.media_types().count(), 2);
    }
}
