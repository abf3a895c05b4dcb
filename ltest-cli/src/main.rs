use anyhow::{Context, Result};
use clap::Parser;
use ltest::{write_json_report, ContainerConfig, Spec};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

mod demo;

const DEFAULT_CASE_TIMEOUT_MS: u64 = 500;
const DEFAULT_ACTIVATION_TIMEOUT_MS: u64 = 1000;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the bundled ltest demonstration spec", long_about = None)]
struct Cli {
  /// Time budget per case before it is reported with a timeout annotation
  #[arg(long, default_value_t = DEFAULT_CASE_TIMEOUT_MS)]
  case_timeout_ms: u64,

  /// How long to wait for the timeout watchdog to start
  #[arg(long, default_value_t = DEFAULT_ACTIVATION_TIMEOUT_MS)]
  activation_timeout_ms: u64,

  /// Also write the JSON report to this path
  #[arg(long, value_name = "PATH")]
  json: Option<PathBuf>,

  /// Enable tracing output on stderr
  #[arg(long)]
  trace: bool,
}

impl Cli {
  fn container_config(&self) -> ContainerConfig {
    ContainerConfig {
      case_timeout: Duration::from_millis(self.case_timeout_ms),
      activation_timeout: Duration::from_millis(self.activation_timeout_ms),
    }
  }
}

fn main() -> ExitCode {
  match try_main() {
    Ok(code) => code,
    Err(err) => {
      eprintln!("error: {err:#}");
      ExitCode::from(1)
    }
  }
}

fn try_main() -> Result<ExitCode> {
  let cli = Cli::parse();
  init_tracing(cli.trace);

  let spec = Spec::new();
  spec
    .append_cases(demo::cases())
    .context("register demo cases")?;
  let report = spec
    .execute(cli.container_config())
    .context("run demo spec")?;

  if let Some(path) = &cli.json {
    write_json_report(path, &report).with_context(|| format!("write {}", path.display()))?;
  }

  if report.summary.is_success() {
    Ok(ExitCode::SUCCESS)
  } else {
    Ok(ExitCode::from(1))
  }
}

fn init_tracing(enable: bool) {
  if !enable {
    return;
  }

  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr);
  if let Err(err) = builder.try_init() {
    eprintln!("failed to install tracing subscriber: {err}");
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_library_budgets() {
    let cli = Cli::try_parse_from(["ltest"]).unwrap();
    assert_eq!(cli.container_config(), ContainerConfig::default());
    assert!(cli.json.is_none());
    assert!(!cli.trace);
  }

  #[test]
  fn parses_overrides() {
    let cli = Cli::try_parse_from([
      "ltest",
      "--case-timeout-ms",
      "50",
      "--json",
      "out/report.json",
      "--trace",
    ])
    .unwrap();
    assert_eq!(cli.container_config().case_timeout, Duration::from_millis(50));
    assert_eq!(cli.json, Some(PathBuf::from("out/report.json")));
    assert!(cli.trace);
  }
}
