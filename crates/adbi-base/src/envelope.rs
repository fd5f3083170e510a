//! The two-element JSON array placed on the queue to announce a job: `[func_id, prefix_uri]`.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope body: {0}")]
    Malformed(String),
}

/// `[func_id, prefix_uri]`. Serializes as a bare two-element JSON array, not an object:
/// serde gives tuple structs array encoding for free, so there's no hand-written
/// `Serialize` impl to keep in sync with the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope(pub String, pub String);

impl Envelope {
    pub fn new(func_id: impl Into<String>, prefix_uri: impl Into<String>) -> Self {
        Self(func_id.into(), prefix_uri.into())
    }

    pub fn func_id(&self) -> &str {
        &self.0
    }

    pub fn prefix_uri(&self) -> &str {
        &self.1
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        // An Envelope is always two strings, so this can't fail.
        serde_json::to_vec(self).expect("Envelope serialization is infallible")
    }

    /// Parses a queue message body. Any shape other than a two-element JSON array of
    /// strings is malformed (§3 Invariants) and must be reported so the caller can
    /// delete the message rather than retry it.
    pub fn parse(body: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(body).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let envelope = Envelope::new("test.echo", "s3://bucket/prefix");
        let bytes = envelope.to_json_bytes();
        assert_eq!(bytes, br#"["test.echo","s3://bucket/prefix"]"#);
        assert_eq!(Envelope::parse(&bytes).unwrap(), envelope);
    }

    #[test]
    fn rejects_non_array_body() {
        assert!(Envelope::parse(br#""not-a-list""#).is_err());
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(Envelope::parse(br#"["only-one"]"#).is_err());
        assert!(Envelope::parse(br#"["a","b","c"]"#).is_err());
    }

    #[test]
    fn rejects_non_string_elements() {
        assert!(Envelope::parse(br#"[1,2]"#).is_err());
    }
}
