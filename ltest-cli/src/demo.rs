//! The bundled demonstration spec: a few fixture groups that exercise every reportable outcome.

use anyhow::bail;
use ltest::{Behavior, SpecItem};
use std::thread;
use std::time::Duration;

/// How long the deliberately slow case sleeps. Comfortably past the default case budget.
pub const SLOW_CASE_SLEEP: Duration = Duration::from_secs(1);

pub fn cases() -> Vec<SpecItem> {
  vec![basics(), SpecItem::group([asynchronous(), misbehaving()])]
}

fn basics() -> SpecItem {
  SpecItem::group([
    SpecItem::case("should be ok", Behavior::sync(|| ())),
    SpecItem::case(
      "should recover from an error it handles itself",
      Behavior::sync(|| {
        if let Err(err) = throw_something() {
          tracing::debug!(%err, "handled inside the case");
        }
      }),
    ),
  ])
}

fn asynchronous() -> SpecItem {
  SpecItem::group([
    SpecItem::case(
      "should work asynchronously",
      Behavior::with_notifier(|notifier| notifier.done()),
    ),
    SpecItem::case(
      "should work from another thread",
      Behavior::with_notifier(|notifier| {
        thread::spawn(move || {
          thread::sleep(Duration::from_millis(20));
          notifier.done();
        });
      }),
    ),
  ])
}

fn misbehaving() -> SpecItem {
  SpecItem::group([
    SpecItem::case("should be ok, but actually not", Behavior::sync(throw_something)),
    SpecItem::case(
      "should be ok, but timeout",
      Behavior::sync(|| thread::sleep(SLOW_CASE_SLEEP)),
    ),
  ])
}

fn throw_something() -> anyhow::Result<()> {
  bail!("something was thrown")
}
