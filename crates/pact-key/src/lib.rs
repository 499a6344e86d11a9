//! Idempotency key derivation.
//!
//! A key identifies one logical invocation. It is built from the operation
//! name, the input parameters and an optional time bucket, so that repeated
//! requests with the same intent inside one bucket collapse onto one promise:
//!
//! ```ignore
//! let key = KeyBuilder::new("forecast")
//!   .part(47.61)
//!   .part(-122.33)
//!   .bucket(TimeBucket::Day, Utc::now())
//!   .build();
//! // "forecast-47.61--122.33-2026-10-19"
//! ```
//!
//! Buckets that are too coarse make distinct requests share a result.

use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// Error returned when parsing a [`TimeBucket`].
#[derive(Debug, thiserror::Error)]
#[error("unknown time bucket '{0}' (expected none, day or month)")]
pub struct ParseBucketError(String);

/// Time coarsening applied to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeBucket {
  /// The key does not expire.
  #[default]
  None,
  /// One key per UTC calendar day.
  Day,
  /// One key per UTC calendar month.
  Month,
}

impl TimeBucket {
  /// The bucket label for `at`, or `None` for [`TimeBucket::None`].
  pub fn label(self, at: DateTime<Utc>) -> Option<String> {
    match self {
      Self::None => None,
      Self::Day => Some(at.format("%Y-%m-%d").to_string()),
      Self::Month => Some(at.format("%Y-%m").to_string()),
    }
  }
}

impl FromStr for TimeBucket {
  type Err = ParseBucketError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "none" => Ok(Self::None),
      "day" => Ok(Self::Day),
      "month" => Ok(Self::Month),
      _ => Err(ParseBucketError(s.to_string())),
    }
  }
}

/// Builds a key from ordered parts.
///
/// Parts added with [`KeyBuilder::part`] are used verbatim. Parts taken from a
/// JSON argument document are escaped when the key is built, so argument
/// values can never mimic a different split into parts.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
  parts: Vec<Part>,
  separator: String,
}

#[derive(Debug, Clone)]
enum Part {
  Raw(String),
  Arg(String),
  Field { name: String, value: String },
}

impl KeyBuilder {
  /// Start a key for `operation`, joined with `-` by default.
  pub fn new(operation: impl Display) -> Self {
    Self {
      parts: vec![Part::Raw(operation.to_string())],
      separator: "-".to_string(),
    }
  }

  pub fn separator(mut self, separator: impl Into<String>) -> Self {
    self.separator = separator.into();
    self
  }

  /// Append one input parameter.
  pub fn part(mut self, part: impl Display) -> Self {
    self.parts.push(Part::Raw(part.to_string()));
    self
  }

  /// Append a JSON argument document.
  ///
  /// Object fields are taken in name order as `name=value`, array elements in
  /// order, and a scalar as-is. Strings are used without quotes; null and
  /// empty objects contribute nothing. A backslash, `=` or separator inside a
  /// name or value is escaped with a backslash.
  pub fn args(mut self, args: &serde_json::Value) -> Self {
    match args {
      serde_json::Value::Null => {}
      serde_json::Value::Object(map) => {
        let mut entries: Vec<_> = map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        self.parts.extend(entries.into_iter().map(|(name, v)| Part::Field {
          name: name.clone(),
          value: render(v),
        }));
      }
      serde_json::Value::Array(items) => {
        self.parts.extend(items.iter().map(|v| Part::Arg(render(v))));
      }
      scalar => self.parts.push(Part::Arg(render(scalar))),
    }
    self
  }

  /// Append the bucket label for `at`, if the bucket has one.
  pub fn bucket(mut self, bucket: TimeBucket, at: DateTime<Utc>) -> Self {
    if let Some(label) = bucket.label(at) {
      self.parts.push(Part::Raw(label));
    }
    self
  }

  pub fn build(self) -> String {
    let separator = self.separator;
    self
      .parts
      .into_iter()
      .map(|part| match part {
        Part::Raw(text) => text,
        Part::Arg(value) => escape(&value, &separator),
        Part::Field { name, value } => {
          format!("{}={}", escape(&name, &separator), escape(&value, &separator))
        }
      })
      .collect::<Vec<_>>()
      .join(&separator)
  }
}

fn escape(text: &str, separator: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  let mut rest = text;
  while let Some(c) = rest.chars().next() {
    if !separator.is_empty() && rest.starts_with(separator) {
      escaped.push('\\');
      escaped.push_str(separator);
      rest = &rest[separator.len()..];
      continue;
    }
    if c == '\\' || c == '=' {
      escaped.push('\\');
    }
    escaped.push(c);
    rest = &rest[c.len_utf8()..];
  }
  escaped
}

fn render(value: &serde_json::Value) -> String {
  match value {
    serde_json::Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Derive a key for `operation` called with `args` inside the bucket containing `at`.
pub fn derive_key(
  operation: &str,
  args: &serde_json::Value,
  bucket: TimeBucket,
  at: DateTime<Utc>,
) -> String {
  KeyBuilder::new(operation)
    .args(args)
    .bucket(bucket, at)
    .build()
}
