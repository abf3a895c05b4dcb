use std::io;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LtestError>;

/// Structural misuse of the engine, or a failure while writing reports.
///
/// Failures of individual cases are never surfaced through this type; they
/// are recorded in the report and the chain moves on.
#[derive(Debug, Error)]
pub enum LtestError {
  #[error("cannot add case '{description}': the spec has already started running")]
  SpecStarted { description: String },
  #[error("timeout watchdog did not activate within {}ms", .0.as_millis())]
  WatchdogActivation(Duration),
  #[error("failed to spawn timeout watchdog thread")]
  WatchdogSpawn(#[source] io::Error),
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error("failed to serialize report")]
  Json(#[from] serde_json::Error),
}

impl LtestError {
  /// Whether this error is a protocol violation (misuse of the spec or container) rather than an
  /// I/O problem.
  pub fn is_protocol_violation(&self) -> bool {
    matches!(
      self,
      LtestError::SpecStarted { .. }
        | LtestError::WatchdogActivation(_)
        | LtestError::WatchdogSpawn(_)
    )
  }
}
