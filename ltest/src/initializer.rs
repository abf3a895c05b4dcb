//! Bulk registration of cases contributed by fixture modules.
//!
//! A fixture hands over [`SpecItem`]s: either a single applier that appends whatever it likes to
//! the spec, or a group of further items. Groups nest to any depth and are applied depth-first,
//! left to right, so `[a, [b, c], d]` registers exactly what `a`, `b`, `c`, `d` applied one after
//! another would.

use crate::case::Behavior;
use crate::error::Result;
use crate::spec::Spec;
use std::fmt;

pub type Applier = Box<dyn FnOnce(&Spec) -> Result<()> + 'static>;

pub enum SpecItem {
  Single(Applier),
  Group(Vec<SpecItem>),
}

impl SpecItem {
  pub fn single<F>(apply: F) -> Self
  where
    F: FnOnce(&Spec) -> Result<()> + 'static,
  {
    SpecItem::Single(Box::new(apply))
  }

  pub fn group(items: impl IntoIterator<Item = SpecItem>) -> Self {
    SpecItem::Group(items.into_iter().collect())
  }

  /// An applier that appends one case.
  pub fn case(description: impl Into<String>, behavior: Behavior) -> Self {
    let description = description.into();
    SpecItem::single(move |spec| spec.case(description, behavior).map(|_| ()))
  }

  /// Number of appliers reachable from this item.
  pub fn leaf_count(&self) -> usize {
    match self {
      SpecItem::Single(_) => 1,
      SpecItem::Group(items) => items.iter().map(SpecItem::leaf_count).sum(),
    }
  }
}

impl From<Vec<SpecItem>> for SpecItem {
  fn from(items: Vec<SpecItem>) -> Self {
    SpecItem::Group(items)
  }
}

impl fmt::Debug for SpecItem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SpecItem::Single(_) => f.write_str("Single(..)"),
      SpecItem::Group(items) => f.debug_tuple("Group").field(items).finish(),
    }
  }
}

pub struct SpecInitializer<'a> {
  spec: &'a Spec,
}

impl<'a> SpecInitializer<'a> {
  pub fn new(spec: &'a Spec) -> Self {
    Self { spec }
  }

  /// Applies `items` in order. Stops at the first applier that fails; everything applied before
  /// it stays registered.
  pub fn append_cases(&self, items: impl IntoIterator<Item = SpecItem>) -> Result<()> {
    for item in items {
      self.append_case(item)?;
    }
    Ok(())
  }

  fn append_case(&self, item: SpecItem) -> Result<()> {
    match item {
      SpecItem::Single(apply) => apply(self.spec),
      SpecItem::Group(items) => self.append_cases(items),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::report::{CaseResult, Reporter, Summary};
  use crate::ContainerConfig;

  struct Silent;

  impl Reporter for Silent {
    fn case_finished(&mut self, _result: &CaseResult) {}
    fn finished(&mut self, _summary: &Summary) {}
  }

  fn named(description: &'static str) -> SpecItem {
    SpecItem::case(description, Behavior::sync(|| ()))
  }

  fn descriptions(spec: &Spec) -> Vec<String> {
    spec
      .execute(ContainerConfig::default())
      .unwrap()
      .results
      .into_iter()
      .map(|result| result.description)
      .collect()
  }

  #[test]
  fn deep_nesting_flattens_in_order() {
    let spec = Spec::with_reporter(Silent);
    let items = vec![
      SpecItem::group(vec![SpecItem::group(vec![named("a"), SpecItem::group(vec![named("b")])])]),
      named("c"),
      SpecItem::group(Vec::new()),
      vec![named("d"), vec![named("e")].into()].into(),
    ];
    assert_eq!(items.iter().map(SpecItem::leaf_count).sum::<usize>(), 5);

    SpecInitializer::new(&spec).append_cases(items).unwrap();
    assert_eq!(descriptions(&spec), ["a", "b", "c", "d", "e"]);
  }

  #[test]
  fn applier_may_register_several_cases() {
    let spec = Spec::with_reporter(Silent);
    spec
      .append_cases([SpecItem::single(|spec| {
        spec.it("first", || ())?.it("second", || ())?;
        Ok(())
      })])
      .unwrap();
    assert_eq!(spec.len(), 2);
  }

  #[test]
  fn stops_at_first_failing_applier() {
    let spec = Spec::with_reporter(Silent);
    spec.execute(ContainerConfig::default()).unwrap();

    let err = SpecInitializer::new(&spec)
      .append_cases([named("late"), named("later")])
      .unwrap_err();
    assert!(err.is_protocol_violation());
    assert_eq!(spec.len(), 0);
  }
}
