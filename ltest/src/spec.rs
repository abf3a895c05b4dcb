use crate::case::{Behavior, IntoCaseResult};
use crate::chain::{Chain, Notifier};
use crate::container::{Container, ContainerConfig, Runnable, SequentialContainer};
use crate::error::Result;
use crate::initializer::{SpecInitializer, SpecItem};
use crate::report::{ConsoleReporter, Report, Reporter};
use std::fmt;
use std::sync::Arc;

/// An ordered chain of cases, built up front and then run as a single runnable.
///
/// `Spec` is a cheap handle; clones share the same chain. Cases can be added until the spec
/// starts running, after which every append fails with [`LtestError::SpecStarted`].
///
/// ```no_run
/// use ltest::{ContainerConfig, Spec};
/// use std::thread;
///
/// let spec = Spec::new();
/// spec
///   .it("adds numbers", || assert_eq!(1 + 1, 2))?
///   .it_async("completes later", |notifier| {
///     thread::spawn(move || notifier.done());
///   })?;
/// let report = spec.execute(ContainerConfig::default())?;
/// assert!(report.summary.is_success());
/// # Ok::<(), ltest::LtestError>(())
/// ```
///
/// [`LtestError::SpecStarted`]: crate::LtestError::SpecStarted
#[derive(Clone)]
pub struct Spec {
  chain: Arc<Chain>,
}

impl Spec {
  /// A spec that reports to stdout.
  pub fn new() -> Self {
    Self::with_reporter(ConsoleReporter::stdout())
  }

  pub fn with_reporter(reporter: impl Reporter + 'static) -> Self {
    Self {
      chain: Arc::new(Chain::new(Box::new(reporter))),
    }
  }

  pub fn set_reporter(&self, reporter: impl Reporter + 'static) {
    self.chain.set_reporter(Box::new(reporter));
  }

  /// Appends a synchronous case. The body passes by returning `()` or `Ok(())`; returning an
  /// error or panicking fails it.
  pub fn it<F, R>(&self, description: impl Into<String>, body: F) -> Result<&Self>
  where
    F: FnOnce() -> R + Send + 'static,
    R: IntoCaseResult,
  {
    self.case(description, Behavior::sync(body))
  }

  /// Appends an asynchronous case. The body receives the case's notifier and the case stays
  /// running until the notifier is used, from any thread.
  pub fn it_async<F>(&self, description: impl Into<String>, body: F) -> Result<&Self>
  where
    F: FnOnce(Notifier) + Send + 'static,
  {
    self.case(description, Behavior::with_notifier(body))
  }

  pub fn case(&self, description: impl Into<String>, behavior: Behavior) -> Result<&Self> {
    self.chain.append(description.into(), behavior.into_body())?;
    Ok(self)
  }

  /// Applies a nested set of registration items, depth-first and in order.
  pub fn append_cases(&self, items: impl IntoIterator<Item = SpecItem>) -> Result<&Self> {
    SpecInitializer::new(self).append_cases(items)?;
    Ok(self)
  }

  pub fn len(&self) -> usize {
    self.chain.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_started(&self) -> bool {
    self.chain.is_started()
  }

  /// Snapshot of the results so far.
  pub fn report(&self) -> Report {
    self.chain.report()
  }

  /// Runs the spec in a fresh [`SequentialContainer`] on the calling thread and returns the
  /// report once the loop drains.
  pub fn execute(&self, config: ContainerConfig) -> Result<Report> {
    let container = Arc::new(SequentialContainer::new(config));
    container.schedule_to_run(Arc::new(self.clone()));
    container.start()?;
    Ok(self.report())
  }
}

impl Default for Spec {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for Spec {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Spec")
      .field("len", &self.len())
      .field("started", &self.is_started())
      .finish()
  }
}

impl Runnable for Spec {
  fn run(&self, container: &Arc<dyn Container>) {
    container.begin_run();
    self.chain.let_it_run(Arc::clone(container));
    container.end_run();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::report::{CaseResult, Summary};
  use crate::LtestError;

  struct Silent;

  impl Reporter for Silent {
    fn case_finished(&mut self, _result: &CaseResult) {}
    fn finished(&mut self, _summary: &Summary) {}
  }

  #[test]
  fn appends_are_chainable() {
    let spec = Spec::with_reporter(Silent);
    spec
      .it("one", || ())
      .unwrap()
      .it("two", || Ok::<(), std::io::Error>(()))
      .unwrap()
      .it_async("three", |notifier| notifier.done())
      .unwrap();
    assert_eq!(spec.len(), 3);
    assert!(!spec.is_started());
  }

  #[test]
  fn clones_share_the_chain() {
    let spec = Spec::with_reporter(Silent);
    let other = spec.clone();
    other.it("shared", || ()).unwrap();
    assert_eq!(spec.len(), 1);
  }

  #[test]
  fn executing_twice_does_not_rerun_cases() {
    let spec = Spec::with_reporter(Silent);
    spec.it("once", || ()).unwrap();
    let first = spec.execute(ContainerConfig::default()).unwrap();
    let second = spec.execute(ContainerConfig::default()).unwrap();
    assert_eq!(first, second);
    assert_eq!(second.results.len(), 1);
  }

  #[test]
  fn replaced_reporter_receives_every_callback() {
    #[derive(Clone, Default)]
    struct Counts(Arc<parking_lot::Mutex<(usize, usize)>>);

    impl Reporter for Counts {
      fn case_finished(&mut self, _result: &CaseResult) {
        self.0.lock().0 += 1;
      }
      fn finished(&mut self, _summary: &Summary) {
        self.0.lock().1 += 1;
      }
    }

    let counts = Counts::default();
    let spec = Spec::with_reporter(Silent);
    spec.it("a", || ()).unwrap().it("b", || ()).unwrap();
    spec.set_reporter(counts.clone());
    spec.execute(ContainerConfig::default()).unwrap();
    assert_eq!(*counts.0.lock(), (2, 1));
  }

  #[test]
  fn append_after_execute_fails() {
    let spec = Spec::with_reporter(Silent);
    spec.execute(ContainerConfig::default()).unwrap();
    let err = spec.it("late", || ()).unwrap_err();
    assert!(matches!(err, LtestError::SpecStarted { .. }));
    assert!(err.is_protocol_violation());
    assert_eq!(spec.len(), 0);
  }
}
