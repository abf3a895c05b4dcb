use crate::case::panic_message;
use crate::error::Result;
use crate::watchdog::Watchdog;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CASE_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_ACTIVATION_TIMEOUT: Duration = Duration::from_secs(1);

/// Something the container can promote into its running slot.
pub trait Runnable: Send + Sync {
  /// Executes inside `container`. Implementations call [`Container::begin_run`] before doing any
  /// visible work and make sure [`Container::end_run`] eventually follows, possibly from another
  /// thread.
  fn run(&self, container: &Arc<dyn Container>);
}

pub type SharedRunnable = Arc<dyn Runnable>;

/// Control surface shared by the scheduler loop, the runnables it drives and the completion
/// notifiers. Every method may be called from any thread.
pub trait Container: Send + Sync {
  /// Stages `runnable` as the next thing to run, replacing anything staged before.
  fn schedule_to_run(&self, runnable: SharedRunnable);
  fn begin_run(&self);
  /// Marks the running runnable as finished and frees the running slot.
  fn end_run(&self);
  /// Whether the watchdog flagged the runnable that is finishing now.
  fn is_timeout(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerConfig {
  /// Detection window for a single case.
  pub case_timeout: Duration,
  /// Upper bound on how long `start` waits for the watchdog thread to come alive.
  pub activation_timeout: Duration,
}

impl Default for ContainerConfig {
  fn default() -> Self {
    Self {
      case_timeout: DEFAULT_CASE_TIMEOUT,
      activation_timeout: DEFAULT_ACTIVATION_TIMEOUT,
    }
  }
}

#[derive(Default)]
struct Slots {
  pending: Option<SharedRunnable>,
  running: Option<SharedRunnable>,
}

/// Runs one runnable at a time, in the order they are staged, until nothing is left.
pub struct SequentialContainer {
  config: ContainerConfig,
  started: AtomicBool,
  slots: Mutex<Slots>,
  changed: Condvar,
  watchdog: OnceCell<Watchdog>,
}

impl SequentialContainer {
  pub fn new(config: ContainerConfig) -> Self {
    Self {
      config,
      started: AtomicBool::new(false),
      slots: Mutex::new(Slots::default()),
      changed: Condvar::new(),
      watchdog: OnceCell::new(),
    }
  }

  pub fn config(&self) -> &ContainerConfig {
    &self.config
  }

  /// Drives the run loop on the calling thread until both slots are empty.
  ///
  /// Only the first call does anything; later calls return `Ok(())` immediately. The watchdog is
  /// brought up on the first call that finds something staged, and an activation failure is
  /// returned before any runnable executes.
  pub fn start(self: &Arc<Self>) -> Result<()> {
    if self.started.swap(true, Ordering::AcqRel) {
      tracing::debug!("container already started");
      return Ok(());
    }
    if self.slots.lock().pending.is_none() {
      tracing::debug!("nothing scheduled, container finished");
      return Ok(());
    }

    self
      .watchdog
      .get_or_try_init(|| Watchdog::spawn(self.config.case_timeout, self.config.activation_timeout))?;

    let container: Arc<dyn Container> = Arc::clone(self) as Arc<dyn Container>;
    self.run_loop(&container);
    tracing::debug!("container finished");
    Ok(())
  }

  pub fn is_started(&self) -> bool {
    self.started.load(Ordering::Acquire)
  }

  /// True when nothing is staged and nothing is running.
  pub fn is_idle(&self) -> bool {
    let slots = self.slots.lock();
    slots.pending.is_none() && slots.running.is_none()
  }

  fn run_loop(&self, container: &Arc<dyn Container>) {
    while let Some(runnable) = self.promote_next() {
      if let Some(watchdog) = self.watchdog.get() {
        watchdog.reset();
      }
      self.begin_run();

      if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| runnable.run(container))) {
        tracing::error!(
          panic = %panic_message(payload.as_ref()),
          "runnable panicked, continuing with the next one"
        );
        self.release_if_running(&runnable);
      }
    }
  }

  /// Ends the run of a runnable that unwound before calling `end_run` itself. A runnable that
  /// already released its slot is left alone.
  fn release_if_running(&self, runnable: &SharedRunnable) {
    let mut slots = self.slots.lock();
    let still_running = slots
      .running
      .as_ref()
      .is_some_and(|running| Arc::ptr_eq(running, runnable));
    if !still_running {
      return;
    }
    if let Some(watchdog) = self.watchdog.get() {
      watchdog.notify_end_run();
    }
    slots.running = None;
    self.changed.notify_all();
  }

  /// Blocks until a staged runnable can move into the empty running slot, or returns `None` once
  /// both slots are empty.
  fn promote_next(&self) -> Option<SharedRunnable> {
    let mut slots = self.slots.lock();
    loop {
      if slots.running.is_none() {
        let Some(runnable) = slots.pending.take() else {
          return None;
        };
        slots.running = Some(Arc::clone(&runnable));
        tracing::trace!("promoted pending runnable");
        return Some(runnable);
      }
      // Something is in flight; its completion may arrive from any thread.
      self.changed.wait(&mut slots);
    }
  }
}

impl Default for SequentialContainer {
  fn default() -> Self {
    Self::new(ContainerConfig::default())
  }
}

impl Container for SequentialContainer {
  fn schedule_to_run(&self, runnable: SharedRunnable) {
    let mut slots = self.slots.lock();
    if slots.pending.replace(runnable).is_some() {
      tracing::trace!("replaced previously staged runnable");
    }
    self.changed.notify_all();
  }

  fn begin_run(&self) {
    tracing::trace!("begin run");
    if let Some(watchdog) = self.watchdog.get() {
      watchdog.notify_begin_run();
    }
  }

  fn end_run(&self) {
    tracing::trace!("end run");
    if let Some(watchdog) = self.watchdog.get() {
      watchdog.notify_end_run();
    }
    let mut slots = self.slots.lock();
    slots.running = None;
    self.changed.notify_all();
  }

  fn is_timeout(&self) -> bool {
    self
      .watchdog
      .get()
      .is_some_and(|watchdog| watchdog.is_timed_out())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::thread;

  /// Counts its runs and finishes synchronously.
  struct Counting {
    runs: Arc<AtomicUsize>,
  }

  impl Runnable for Counting {
    fn run(&self, container: &Arc<dyn Container>) {
      container.begin_run();
      self.runs.fetch_add(1, Ordering::SeqCst);
      container.end_run();
    }
  }

  /// Finishes from a helper thread after `delay`, then stages `next` if present.
  struct Deferred {
    delay: Duration,
    next: Mutex<Option<SharedRunnable>>,
    timed_out: Arc<Mutex<Option<bool>>>,
  }

  impl Runnable for Deferred {
    fn run(&self, container: &Arc<dyn Container>) {
      container.begin_run();
      let container = Arc::clone(container);
      let delay = self.delay;
      let next = self.next.lock().take();
      let timed_out = Arc::clone(&self.timed_out);
      thread::spawn(move || {
        thread::sleep(delay);
        if let Some(next) = next {
          container.schedule_to_run(next);
        }
        *timed_out.lock() = Some(container.is_timeout());
        container.end_run();
      });
    }
  }

  fn config(case_timeout_ms: u64) -> ContainerConfig {
    ContainerConfig {
      case_timeout: Duration::from_millis(case_timeout_ms),
      ..ContainerConfig::default()
    }
  }

  #[test]
  fn start_without_anything_scheduled_returns_immediately() {
    let container = Arc::new(SequentialContainer::default());
    container.start().unwrap();
    assert!(container.is_started());
    assert!(container.is_idle());
    assert!(!container.is_timeout());
  }

  #[test]
  fn staging_overwrites_previous_pending() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let container = Arc::new(SequentialContainer::default());
    container.schedule_to_run(Arc::new(Counting {
      runs: Arc::clone(&first),
    }));
    container.schedule_to_run(Arc::new(Counting {
      runs: Arc::clone(&second),
    }));
    container.start().unwrap();

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert!(container.is_idle());
  }

  #[test]
  fn start_is_single_shot() {
    let runs = Arc::new(AtomicUsize::new(0));
    let container = Arc::new(SequentialContainer::default());
    container.schedule_to_run(Arc::new(Counting {
      runs: Arc::clone(&runs),
    }));
    container.start().unwrap();

    container.schedule_to_run(Arc::new(Counting {
      runs: Arc::clone(&runs),
    }));
    container.start().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!container.is_idle());
  }

  #[test]
  fn waits_for_completion_from_another_thread() {
    let runs = Arc::new(AtomicUsize::new(0));
    let first_flag = Arc::new(Mutex::new(None));
    let container = Arc::new(SequentialContainer::new(config(500)));
    container.schedule_to_run(Arc::new(Deferred {
      delay: Duration::from_millis(30),
      next: Mutex::new(Some(Arc::new(Counting {
        runs: Arc::clone(&runs),
      }))),
      timed_out: Arc::clone(&first_flag),
    }));
    container.start().unwrap();

    assert_eq!(*first_flag.lock(), Some(false));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(container.is_idle());
  }

  #[test]
  fn slow_completion_is_flagged_and_flag_resets_on_promotion() {
    let flag = Arc::new(Mutex::new(None));
    let runs = Arc::new(AtomicUsize::new(0));
    let container = Arc::new(SequentialContainer::new(config(40)));
    container.schedule_to_run(Arc::new(Deferred {
      delay: Duration::from_millis(200),
      next: Mutex::new(Some(Arc::new(Counting {
        runs: Arc::clone(&runs),
      }))),
      timed_out: Arc::clone(&flag),
    }));
    container.start().unwrap();

    assert_eq!(*flag.lock(), Some(true));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    // The quick follow-up was promoted after the slow one and cleared the flag.
    assert!(!container.is_timeout());
  }

  #[test]
  fn config_is_kept_as_given() {
    let container = SequentialContainer::new(config(75));
    assert_eq!(container.config().case_timeout, Duration::from_millis(75));
    assert_eq!(container.config().activation_timeout, DEFAULT_ACTIVATION_TIMEOUT);
  }

  #[test]
  fn panicking_runnable_does_not_stop_the_loop() {
    struct Panicking;
    impl Runnable for Panicking {
      fn run(&self, container: &Arc<dyn Container>) {
        container.end_run();
        panic!("boom");
      }
    }

    let container = Arc::new(SequentialContainer::default());
    container.schedule_to_run(Arc::new(Panicking));
    container.start().unwrap();
    assert!(container.is_idle());
  }

  #[test]
  fn runnable_panicking_before_end_run_is_released() {
    /// Stages a follow-up, then unwinds without ever calling `end_run`.
    struct Early {
      next: Mutex<Option<SharedRunnable>>,
    }
    impl Runnable for Early {
      fn run(&self, container: &Arc<dyn Container>) {
        if let Some(next) = self.next.lock().take() {
          container.schedule_to_run(next);
        }
        panic!("early");
      }
    }

    let runs = Arc::new(AtomicUsize::new(0));
    let container = Arc::new(SequentialContainer::new(config(500)));
    container.schedule_to_run(Arc::new(Early {
      next: Mutex::new(Some(Arc::new(Counting {
        runs: Arc::clone(&runs),
      }))),
    }));

    let (tx, rx) = std::sync::mpsc::channel();
    let driver = Arc::clone(&container);
    thread::spawn(move || {
      let _ = tx.send(driver.start().is_ok());
    });
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(container.is_idle());
    assert!(!container.is_timeout());
  }
}
