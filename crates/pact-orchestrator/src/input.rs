//! Batch key lists.

use crate::error::Error;

/// Wrapper-object fields that may carry a key, in lookup order.
const KEY_FIELDS: [&str; 3] = ["key", "job_name", "promise_id"];

/// An ordered list of keys for a batch query.
///
/// Accepts a JSON array whose elements are key strings or objects carrying a
/// key field (`key`, `job_name` or `promise_id`), or a string containing such
/// an array. Anything else is [`Error::InvalidInput`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyList(Vec<String>);

impl KeyList {
  pub fn new(keys: Vec<String>) -> Self {
    Self(keys)
  }

  pub fn parse(input: &serde_json::Value) -> Result<Self, Error> {
    match input {
      serde_json::Value::String(encoded) => {
        let decoded: serde_json::Value =
          serde_json::from_str(encoded).map_err(|e| Error::InvalidInput {
            message: format!("key list is not valid JSON: {e}"),
          })?;
        match decoded {
          serde_json::Value::Array(items) => Self::from_items(&items),
          _ => Err(invalid("encoded key list is not an array")),
        }
      }
      serde_json::Value::Array(items) => Self::from_items(items),
      _ => Err(invalid("key list must be an array")),
    }
  }

  fn from_items(items: &[serde_json::Value]) -> Result<Self, Error> {
    items
      .iter()
      .enumerate()
      .map(|(index, item)| {
        key_of(item).ok_or_else(|| invalid(&format!("element {index} has no key")))
      })
      .collect::<Result<Vec<_>, _>>()
      .map(Self)
  }

  pub fn keys(&self) -> &[String] {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl From<Vec<String>> for KeyList {
  fn from(keys: Vec<String>) -> Self {
    Self(keys)
  }
}

fn key_of(item: &serde_json::Value) -> Option<String> {
  match item {
    serde_json::Value::String(key) => Some(key.clone()),
    serde_json::Value::Object(fields) => KEY_FIELDS
      .iter()
      .find_map(|name| fields.get(*name).and_then(|v| v.as_str()))
      .map(str::to_string),
    _ => None,
  }
}

fn invalid(message: &str) -> Error {
  Error::InvalidInput {
    message: message.to_string(),
  }
}
