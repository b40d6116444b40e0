//! Typed value to text serialization.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FileError, Result};

/// Converts a typed value to and from its persisted text form.
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<String>;

    fn decode(&self, text: &str) -> Result<T>;

    /// Whether the encoded form is a JSON document the structural diff can read.
    fn is_structured(&self) -> bool {
        false
    }
}

/// JSON codec backed by `serde_json`.
pub struct JsonCodec<T> {
    pretty: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Pretty-printed output (the default for files meant to be read by humans).
    pub fn new() -> Self {
        Self {
            pretty: true,
            _marker: PhantomData,
        }
    }

    pub fn compact() -> Self {
        Self {
            pretty: false,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<String> {
        let text = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        text.map_err(|e| FileError::format("Failed to encode JSON", e))
    }

    fn decode(&self, text: &str) -> Result<T> {
        serde_json::from_str(text).map_err(|e| FileError::format("Failed to decode JSON", e))
    }

    fn is_structured(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        font_size: u32,
    }

    #[test]
    fn test_json_round_trip() {
        let codec = JsonCodec::<Settings>::new();
        let value = Settings {
            theme: "dark".into(),
            font_size: 12,
        };

        let text = codec.encode(&value).unwrap();
        assert!(text.contains('\n'));
        assert_eq!(codec.decode(&text).unwrap(), value);
    }

    #[test]
    fn test_compact_has_no_newlines() {
        let codec = JsonCodec::<Settings>::compact();
        let text = codec
            .encode(&Settings {
                theme: "light".into(),
                font_size: 10,
            })
            .unwrap();
        assert_eq!(text, r#"{"theme":"light","font_size":10}"#);
    }

    #[test]
    fn test_decode_failure_is_format_error() {
        let codec = JsonCodec::<Settings>::new();
        let err = codec.decode("{not json").unwrap_err();
        assert!(matches!(err, FileError::Format { .. }));
    }
}
