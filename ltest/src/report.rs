use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
  Passed,
  Failed,
}

impl fmt::Display for CaseOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let value = match self {
      CaseOutcome::Passed => "passed",
      CaseOutcome::Failed => "failed",
    };
    f.write_str(value)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaseResult {
  /// Position of the case in the chain, starting at zero.
  pub index: usize,
  pub description: String,
  pub outcome: CaseOutcome,
  /// Set when the watchdog flagged the case; the outcome is still authoritative.
  #[serde(default)]
  pub timed_out: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  pub duration_ms: u64,
}

impl CaseResult {
  pub fn passed(&self) -> bool {
    self.outcome == CaseOutcome::Passed
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Summary {
  pub total: usize,
  pub passed: usize,
  pub failed: usize,
  pub timed_out: usize,
}

impl Summary {
  pub fn is_success(&self) -> bool {
    self.failed == 0
  }
}

/// Everything known about a spec run. `finished` is false while the chain still has cases left,
/// including when the run stalled on a case that never completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Report {
  pub schema_version: u32,
  pub finished: bool,
  pub summary: Summary,
  pub results: Vec<CaseResult>,
}

/// Receives results as the chain advances. Calls arrive in chain order, from whichever thread
/// completed the case.
///
/// Callbacks run after the chain has recorded the result and released its own lock, so a reporter
/// may call back into the [`Spec`](crate::Spec) it reports on. The next case starts only once
/// the callback returns. A panicking reporter loses that line but does not stall the chain.
pub trait Reporter: Send {
  fn case_finished(&mut self, result: &CaseResult);
  fn finished(&mut self, summary: &Summary);
}

/// Plain-text reporter: one line per case and a closing summary line.
pub struct ConsoleReporter<W> {
  out: W,
}

impl ConsoleReporter<io::Stdout> {
  pub fn stdout() -> Self {
    Self { out: io::stdout() }
  }
}

impl<W: Write + Send> ConsoleReporter<W> {
  pub fn new(out: W) -> Self {
    Self { out }
  }

  pub fn into_inner(self) -> W {
    self.out
  }
}

impl<W: Write + Send> Reporter for ConsoleReporter<W> {
  fn case_finished(&mut self, result: &CaseResult) {
    writeln!(self.out, "{}", format_case_line(result)).ok();
    if let Some(error) = &result.error {
      for line in error.lines() {
        writeln!(self.out, "    {line}").ok();
      }
    }
    self.out.flush().ok();
  }

  fn finished(&mut self, summary: &Summary) {
    writeln!(self.out).ok();
    writeln!(self.out, "{}", format_summary_line(summary)).ok();
    self.out.flush().ok();
  }
}

pub fn format_case_line(result: &CaseResult) -> String {
  let mark = match result.outcome {
    CaseOutcome::Passed => "\u{2713}",
    CaseOutcome::Failed => "\u{2717}",
  };
  if result.timed_out {
    format!("it {} {mark} (timeout)", result.description)
  } else {
    format!("it {} {mark}", result.description)
  }
}

pub fn format_summary_line(summary: &Summary) -> String {
  format!(
    "total:{} pass:{} fail:{}",
    summary.total, summary.passed, summary.failed
  )
}

/// Serialize `report` as pretty JSON. Field order follows the struct declarations and results
/// are kept in chain order, so the output is stable across runs with the same outcomes.
pub fn to_json_pretty(report: &Report) -> Result<String> {
  Ok(serde_json::to_string_pretty(report)?)
}

/// Write a pretty JSON report to `path`, creating parent directories as needed.
pub fn write_json_report(path: &Path, report: &Report) -> Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent)?;
  }

  let file = fs::File::create(path)?;
  let mut writer = BufWriter::new(file);
  write_json_report_to_writer(&mut writer, report)?;
  writer.flush()?;
  Ok(())
}

pub fn write_json_report_to_writer<W: Write>(writer: &mut W, report: &Report) -> Result<()> {
  serde_json::to_writer_pretty(&mut *writer, report)?;
  writeln!(&mut *writer)?;
  Ok(())
}
