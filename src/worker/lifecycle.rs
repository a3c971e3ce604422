use serde::Deserialize;
use std::fmt;

/// Lifecycle of one worker instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
  /// Shell cache not seeded yet
  Installing,
  /// Installed, previous generation may still be in control
  Waiting,
  /// In control; caches of other generations are gone
  Active { version: String },
  /// Install failed; this instance will never activate
  Redundant,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Installing => write!(f, "installing"),
      Self::Waiting => write!(f, "waiting"),
      Self::Active { version } => write!(f, "active ({})", version),
      Self::Redundant => write!(f, "redundant"),
    }
  }
}

/// Out-of-band message from a client page.
///
/// Wire format: `{"type": "SKIP_WAITING"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  /// Activate now instead of waiting for old clients to go away
  SkipWaiting,
}

impl ControlMessage {
  /// Parse a JSON message. Anything unrecognised is `None`.
  pub fn parse(raw: &str) -> Option<Self> {
    serde_json::from_str(raw).ok()
  }
}
