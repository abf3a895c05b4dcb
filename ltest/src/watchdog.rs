use crate::error::{LtestError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Advisory observer that flags a running case once it outlives its time budget.
///
/// The watchdog never interrupts anything. Arming it starts a detection window; if the window
/// elapses before it is disarmed the timed-out flag is raised and the watchdog goes idle again, so
/// a stalled case is flagged exactly once. Disarming does not lower the flag, only [`reset`]
/// does.
///
/// [`reset`]: Watchdog::reset
pub struct Watchdog {
  inner: Arc<WatchdogInner>,
  thread: Mutex<Option<JoinHandle<()>>>,
}

struct WatchdogInner {
  budget: Duration,
  state: Mutex<WatchdogState>,
  cv: Condvar,
}

#[derive(Default)]
struct WatchdogState {
  deadline: Option<Instant>,
  timed_out: bool,
  shutdown: bool,
}

impl Watchdog {
  /// Spawns the watchdog thread and waits up to `activation_timeout` for it to come alive.
  pub fn spawn(budget: Duration, activation_timeout: Duration) -> Result<Self> {
    let inner = Arc::new(WatchdogInner {
      budget,
      state: Mutex::new(WatchdogState::default()),
      cv: Condvar::new(),
    });
    let (activated_tx, activated_rx) = mpsc::channel();
    let thread_inner = Arc::clone(&inner);
    let handle = std::thread::Builder::new()
      .name("ltest-watchdog".to_string())
      .spawn(move || {
        // The receiver is gone if activation already timed out; nobody is waiting then.
        let _ = activated_tx.send(());
        watchdog_thread(thread_inner)
      })
      .map_err(LtestError::WatchdogSpawn)?;

    let watchdog = Self {
      inner,
      thread: Mutex::new(Some(handle)),
    };
    if activated_rx.recv_timeout(activation_timeout).is_err() {
      return Err(LtestError::WatchdogActivation(activation_timeout));
    }
    tracing::debug!(budget_ms = budget.as_millis() as u64, "timeout watchdog activated");
    Ok(watchdog)
  }

  pub fn budget(&self) -> Duration {
    self.inner.budget
  }

  /// Opens a fresh detection window. Arming an already armed watchdog restarts the window.
  pub fn notify_begin_run(&self) {
    let mut state = self.inner.state.lock();
    state.deadline = Some(Instant::now() + self.inner.budget);
    self.inner.cv.notify_one();
  }

  pub fn notify_end_run(&self) {
    let mut state = self.inner.state.lock();
    state.deadline = None;
    self.inner.cv.notify_one();
  }

  pub fn is_timed_out(&self) -> bool {
    self.inner.state.lock().timed_out
  }

  /// Lowers the timed-out flag ahead of the next runnable.
  pub fn reset(&self) {
    self.inner.state.lock().timed_out = false;
  }
}

impl Drop for Watchdog {
  fn drop(&mut self) {
    {
      let mut state = self.inner.state.lock();
      state.shutdown = true;
      self.inner.cv.notify_one();
    }

    if let Some(handle) = self.thread.lock().take() {
      let _ = handle.join();
    }
  }
}

fn watchdog_thread(inner: Arc<WatchdogInner>) {
  let mut state = inner.state.lock();
  loop {
    if state.shutdown {
      return;
    }

    match state.deadline {
      None => inner.cv.wait(&mut state),
      Some(deadline) => {
        if Instant::now() >= deadline {
          // Going idle here stops the same stalled case from being flagged over and over.
          state.timed_out = true;
          state.deadline = None;
          tracing::warn!(
            budget_ms = inner.budget.as_millis() as u64,
            "running case exceeded its time budget"
          );
          continue;
        }
        inner.cv.wait_until(&mut state, deadline);
      }
    }
  }
}
