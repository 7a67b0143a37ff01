//! Typed metadata bag supplied with Initialize.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An opaque metadata value, decoded explicitly by the reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MetaValue {
    Text(String),
    /// Raw payload of a transport "any" box, expected to hold UTF-8 text
    Bytes(Vec<u8>),
    Integer(i64),
    Boolean(bool),
}

impl MetaValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Key/value metadata for one engine session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: HashMap<String, MetaValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read `key` as text.
    ///
    /// Absent keys yield `Ok(None)`. `Bytes` must be valid UTF-8; any other
    /// non-text value is rejected rather than coerced.
    pub fn text(&self, key: &str) -> Result<Option<Cow<'_, str>>> {
        let Some(value) = self.entries.get(key) else {
            return Ok(None);
        };

        match value {
            MetaValue::Text(s) => Ok(Some(Cow::Borrowed(s.as_str()))),
            MetaValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => Ok(Some(Cow::Borrowed(s))),
                Err(_) => Err(Error::InvalidMetadata {
                    key: key.to_string(),
                    expected: "UTF-8 text",
                    found: "non-UTF-8 bytes",
                }),
            },
            other => Err(Error::InvalidMetadata {
                key: key.to_string(),
                expected: "text",
                found: other.kind(),
            }),
        }
    }

    /// First non-empty text among `keys`, in order.
    pub fn first_text(&self, keys: &[&str]) -> Result<Option<String>> {
        for key in keys {
            if let Some(value) = self.text(key)? {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Ok(Some(trimmed.to_string()));
                }
            }
        }
        Ok(None)
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: Into<String>,
    V: Into<MetaValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
