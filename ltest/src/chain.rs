use crate::case::CaseBody;
use crate::container::{Container, Runnable};
use crate::error::{LtestError, Result};
use crate::report::{CaseOutcome, CaseResult, Report, Reporter, Summary, REPORT_SCHEMA_VERSION};
use anyhow::anyhow;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

pub(crate) struct Case {
  description: String,
  body: Mutex<Option<CaseBody>>,
}

/// Ordered cases plus the cursor that walks them during a run.
///
/// Cases are only appended before the run starts. Once started, the only thing that moves is the
/// cursor, and only the holder of the running case's notifier moves it.
///
/// The reporter sits behind its own lock and is only called once `state` is released, so a
/// reporter may read the chain back.
pub(crate) struct Chain {
  state: Mutex<ChainState>,
  reporter: Mutex<Box<dyn Reporter>>,
}

struct ChainState {
  cases: Vec<Case>,
  started: bool,
  cursor: Cursor,
  results: Vec<CaseResult>,
}

#[derive(Default)]
struct Cursor {
  /// Index of the case between promotion and completion.
  current: Option<usize>,
  total: usize,
  succeeded: usize,
  timed_out: usize,
  finished: bool,
  case_started: Option<Instant>,
  container: Option<Arc<dyn Container>>,
}

impl ChainState {
  fn summary(&self) -> Summary {
    let total = if self.started {
      self.cursor.total
    } else {
      self.cases.len()
    };
    Summary {
      total,
      passed: self.cursor.succeeded,
      failed: self.results.len() - self.cursor.succeeded,
      timed_out: self.cursor.timed_out,
    }
  }
}

impl Chain {
  pub(crate) fn new(reporter: Box<dyn Reporter>) -> Self {
    Self {
      state: Mutex::new(ChainState {
        cases: Vec::new(),
        started: false,
        cursor: Cursor::default(),
        results: Vec::new(),
      }),
      reporter: Mutex::new(reporter),
    }
  }

  pub(crate) fn append(&self, description: String, body: CaseBody) -> Result<()> {
    let mut state = self.state.lock();
    if state.started {
      return Err(LtestError::SpecStarted { description });
    }
    tracing::trace!(case = %description, index = state.cases.len(), "appended case");
    state.cases.push(Case {
      description,
      body: Mutex::new(Some(body)),
    });
    Ok(())
  }

  pub(crate) fn len(&self) -> usize {
    self.state.lock().cases.len()
  }

  pub(crate) fn is_started(&self) -> bool {
    self.state.lock().started
  }

  pub(crate) fn set_reporter(&self, reporter: Box<dyn Reporter>) {
    *self.reporter.lock() = reporter;
  }

  pub(crate) fn report(&self) -> Report {
    let state = self.state.lock();
    Report {
      schema_version: REPORT_SCHEMA_VERSION,
      finished: state.cursor.finished,
      summary: state.summary(),
      results: state.results.clone(),
    }
  }

  /// Binds the cursor to `container` and stages the head case. An empty chain finishes on the
  /// spot with an all-zero summary.
  pub(crate) fn let_it_run(self: &Arc<Self>, container: Arc<dyn Container>) {
    let summary = {
      let mut state = self.state.lock();
      if state.started {
        tracing::warn!("spec is already running or finished, ignoring second run");
        return;
      }
      state.started = true;
      state.cursor.total = state.cases.len();
      tracing::debug!(total = state.cursor.total, "spec started");

      if !state.cases.is_empty() {
        container.schedule_to_run(Arc::new(CaseRunnable {
          chain: Arc::clone(self),
          index: 0,
        }));
        state.cursor.container = Some(container);
        return;
      }
      state.cursor.finished = true;
      state.summary()
    };

    tracing::info!(total = 0, passed = 0, failed = 0, "all cases finished");
    self.reporter.lock().finished(&summary);
  }

  /// Marks case `index` as running and hands out its body.
  fn begin_case(&self, index: usize) -> Option<CaseBody> {
    let mut state = self.state.lock();
    let body = state.cases.get(index)?.body.lock().take()?;
    state.cursor.current = Some(index);
    state.cursor.case_started = Some(Instant::now());
    tracing::debug!(case = %state.cases[index].description, index, "case running");
    Some(body)
  }

  /// Records the outcome of the running case, stages its successor and releases the container.
  fn complete(self: &Arc<Self>, index: usize, outcome: anyhow::Result<()>) {
    let (container, result, summary) = {
      let mut state = self.state.lock();
      if state.cursor.current != Some(index) {
        tracing::warn!(index, "ignoring completion for a case that is not running");
        return;
      }
      let Some(container) = state.cursor.container.clone() else {
        return;
      };

      let next = index + 1;
      let exhausted = next >= state.cases.len();
      if !exhausted {
        container.schedule_to_run(Arc::new(CaseRunnable {
          chain: Arc::clone(self),
          index: next,
        }));
      }

      let timed_out = container.is_timeout();
      let duration_ms = state
        .cursor
        .case_started
        .take()
        .map(|started| started.elapsed().as_millis() as u64)
        .unwrap_or_default();
      let (outcome, error) = match outcome {
        Ok(()) => {
          state.cursor.succeeded += 1;
          (CaseOutcome::Passed, None)
        }
        Err(err) => (CaseOutcome::Failed, Some(format!("{err:#}"))),
      };
      if timed_out {
        state.cursor.timed_out += 1;
      }

      let result = CaseResult {
        index,
        description: state.cases[index].description.clone(),
        outcome,
        timed_out,
        error,
        duration_ms,
      };
      tracing::info!(
        case = %result.description,
        outcome = %result.outcome,
        timed_out,
        duration_ms,
        "case finished"
      );
      state.cursor.current = None;
      state.results.push(result.clone());

      let summary = if exhausted {
        // Let the container (and its watchdog thread) go once nothing is left to run.
        state.cursor.container = None;
        state.cursor.finished = true;
        let summary = state.summary();
        tracing::info!(
          total = summary.total,
          passed = summary.passed,
          failed = summary.failed,
          "all cases finished"
        );
        Some(summary)
      } else {
        None
      };
      (container, result, summary)
    };

    // The successor only runs after `end_run`, which keeps reporter calls in case order.
    let _release = EndRunOnDrop(container);
    let mut reporter = self.reporter.lock();
    reporter.case_finished(&result);
    if let Some(summary) = summary {
      reporter.finished(&summary);
    }
  }
}

/// Releases the container when dropped, including while a panicking reporter unwinds.
struct EndRunOnDrop(Arc<dyn Container>);

impl Drop for EndRunOnDrop {
  fn drop(&mut self) {
    self.0.end_run();
  }
}

struct CaseRunnable {
  chain: Arc<Chain>,
  index: usize,
}

impl Runnable for CaseRunnable {
  fn run(&self, container: &Arc<dyn Container>) {
    container.begin_run();
    let Some(body) = self.chain.begin_case(self.index) else {
      tracing::error!(index = self.index, "case body already consumed");
      container.end_run();
      return;
    };
    body(Notifier {
      chain: Arc::clone(&self.chain),
      index: self.index,
      signaled: false,
    });
  }
}

/// Completion handle for one case.
///
/// Consumed by [`done`](Notifier::done) or [`fail`](Notifier::fail), so a case completes at most
/// once. Dropping it without signaling fails the case, which keeps the chain moving when an
/// asynchronous body loses its notifier or panics.
pub struct Notifier {
  chain: Arc<Chain>,
  index: usize,
  signaled: bool,
}

impl Notifier {
  pub fn done(mut self) {
    self.signaled = true;
    self.chain.complete(self.index, Ok(()));
  }

  pub fn fail(mut self, error: impl Into<anyhow::Error>) {
    self.signaled = true;
    self.chain.complete(self.index, Err(error.into()));
  }

  /// Signals `done` for `Ok` and `fail` for `Err`.
  pub fn finish<E: Into<anyhow::Error>>(self, result: std::result::Result<(), E>) {
    match result {
      Ok(()) => self.done(),
      Err(err) => self.fail(err),
    }
  }

  /// Position of the case this notifier completes.
  pub fn index(&self) -> usize {
    self.index
  }
}

impl Drop for Notifier {
  fn drop(&mut self) {
    if !self.signaled {
      self.signaled = true;
      self.chain.complete(
        self.index,
        Err(anyhow!("notifier dropped without signaling completion")),
      );
    }
  }
}

impl fmt::Debug for Notifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Notifier")
      .field("index", &self.index)
      .field("signaled", &self.signaled)
      .finish()
  }
}
