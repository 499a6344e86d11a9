use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a promise.
///
/// A promise moves strictly forward: `Pending` → `Running` → `Resolved` or
/// `Rejected`. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PromiseState {
  Pending,
  Running,
  Resolved,
  Rejected,
}

impl PromiseState {
  /// Whether the state is `Resolved` or `Rejected`.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Resolved | Self::Rejected)
  }

  /// Position in the lifecycle. Both terminal states share the last rank.
  pub fn rank(self) -> u8 {
    match self {
      Self::Pending => 0,
      Self::Running => 1,
      Self::Resolved | Self::Rejected => 2,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Running => "running",
      Self::Resolved => "resolved",
      Self::Rejected => "rejected",
    }
  }
}

impl fmt::Display for PromiseState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for PromiseState {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(Self::Pending),
      "running" => Ok(Self::Running),
      "resolved" => Ok(Self::Resolved),
      "rejected" => Ok(Self::Rejected),
      other => Err(format!("unknown promise state: {other}")),
    }
  }
}

/// The durable record of one keyed invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Promise {
  pub key: String,
  /// Name of the step the promise was submitted with.
  pub step_name: String,
  /// Arguments the step was submitted with.
  pub args: serde_json::Value,
  pub state: PromiseState,
  /// Present only when `Resolved`.
  pub result: Option<serde_json::Value>,
  /// Present only when `Rejected`.
  pub error: Option<String>,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl Promise {
  /// A fresh `Pending` promise.
  pub fn pending(
    key: impl Into<String>,
    step_name: impl Into<String>,
    args: serde_json::Value,
  ) -> Self {
    Self {
      key: key.into(),
      step_name: step_name.into(),
      args,
      state: PromiseState::Pending,
      result: None,
      error: None,
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.state.is_terminal()
  }
}
