//! RFC 7951 JSON marshalling.
//!
//! All payloads on the bus are RFC 7951 JSON (YANG JSON) carried as
//! strings. The marshaller is the single place encode and decode happen;
//! anything with serde derives goes through it. Namespacing of top-level
//! keys (`module-name:leaf`) is a property of the payload structs, not of
//! the encoder.
//!
//! The one piece of policy here is [`Marshaller::decode_input`]: a payload
//! that canonicalizes to `{}` decodes to the *absent* value when the
//! target is nullable (`Option<T>`), rather than a zero-initialized
//! aggregate. Non-nullable targets decode the literal payload.

use crate::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// RFC 7951 JSON encoder/decoder with empty-object detection.
#[derive(Debug, Default, Clone, Copy)]
pub struct Marshaller;

impl Marshaller {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Encodes a value to its wire form.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<String, Error> {
        serde_json::to_string(value).map_err(|e| Error::Encode(e.to_string()))
    }

    /// Decodes a wire payload into a value.
    pub fn decode<T: DeserializeOwned>(&self, data: &str) -> Result<T, Error> {
        serde_json::from_str(data).map_err(|e| Error::Decode(e.to_string()))
    }

    /// True iff the canonicalized form of `data` is `{}`.
    #[must_use]
    pub fn is_empty_object(&self, data: &str) -> bool {
        matches!(
            serde_json::from_str::<serde_json::Value>(data),
            Ok(serde_json::Value::Object(m)) if m.is_empty()
        )
    }

    /// Decodes a handler input payload.
    ///
    /// An empty object decodes as `null` first, so a nullable target comes
    /// out absent ("no input") instead of zero-initialized ("empty
    /// container"). Targets that reject `null` fall back to the literal
    /// payload.
    pub fn decode_input<T: DeserializeOwned>(&self, data: &str) -> Result<T, Error> {
        if self.is_empty_object(data) {
            if let Ok(value) = serde_json::from_str::<T>("null") {
                return Ok(value);
            }
        }
        self.decode(data)
    }
}
