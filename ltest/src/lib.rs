//! Sequential test-execution engine.
//!
//! Cases run strictly one at a time in the order they were added. A case is either synchronous
//! (it finishes when its body returns) or asynchronous (it finishes when its [`Notifier`] is used,
//! possibly from another thread). A background watchdog flags cases that outlive their time budget
//! without ever interrupting them.

mod case;
mod chain;
mod container;
mod error;
mod initializer;
mod report;
mod spec;
mod watchdog;

pub use case::{Behavior, IntoCaseResult};
pub use chain::Notifier;
pub use container::{
  Container, ContainerConfig, Runnable, SequentialContainer, SharedRunnable,
  DEFAULT_ACTIVATION_TIMEOUT, DEFAULT_CASE_TIMEOUT,
};
pub use error::{LtestError, Result};
pub use initializer::{Applier, SpecInitializer, SpecItem};
pub use report::{
  format_case_line, format_summary_line, to_json_pretty, write_json_report,
  write_json_report_to_writer, CaseOutcome, CaseResult, ConsoleReporter, Report, Reporter,
  Summary, REPORT_SCHEMA_VERSION,
};
pub use spec::Spec;
pub use watchdog::Watchdog;
