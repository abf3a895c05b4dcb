use crate::chain::Notifier;
use anyhow::anyhow;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// What a case does once it is promoted to running.
///
/// A synchronous behavior finishes when it returns: an `Err` or a panic fails the case, anything
/// else passes it. An asynchronous behavior receives the case's [`Notifier`] and may hand it to
/// another thread; the case stays running until the notifier is used or dropped.
pub enum Behavior {
  Sync(Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>),
  Async(Box<dyn FnOnce(Notifier) + Send + 'static>),
}

/// A behavior with the synchronous shape already adapted to notifier-driven completion.
pub(crate) type CaseBody = Box<dyn FnOnce(Notifier) + Send + 'static>;

impl Behavior {
  pub fn sync<F, R>(body: F) -> Self
  where
    F: FnOnce() -> R + Send + 'static,
    R: IntoCaseResult,
  {
    Behavior::Sync(Box::new(move || body().into_case_result()))
  }

  pub fn with_notifier<F>(body: F) -> Self
  where
    F: FnOnce(Notifier) + Send + 'static,
  {
    Behavior::Async(Box::new(body))
  }

  pub fn is_async(&self) -> bool {
    matches!(self, Behavior::Async(_))
  }

  pub(crate) fn into_body(self) -> CaseBody {
    match self {
      Behavior::Sync(body) => Box::new(move |notifier: Notifier| {
        match panic::catch_unwind(AssertUnwindSafe(body)) {
          Ok(Ok(())) => notifier.done(),
          Ok(Err(err)) => notifier.fail(err),
          Err(payload) => notifier.fail(anyhow!("panicked: {}", panic_message(payload.as_ref()))),
        }
      }),
      Behavior::Async(body) => body,
    }
  }
}

impl std::fmt::Debug for Behavior {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Behavior::Sync(_) => f.write_str("Behavior::Sync(..)"),
      Behavior::Async(_) => f.write_str("Behavior::Async(..)"),
    }
  }
}

/// Return types accepted from synchronous case bodies.
pub trait IntoCaseResult {
  fn into_case_result(self) -> anyhow::Result<()>;
}

impl IntoCaseResult for () {
  fn into_case_result(self) -> anyhow::Result<()> {
    Ok(())
  }
}

impl<E> IntoCaseResult for Result<(), E>
where
  E: Into<anyhow::Error>,
{
  fn into_case_result(self) -> anyhow::Result<()> {
    self.map_err(Into::into)
  }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "<non-string panic payload>".to_string()
  }
}
