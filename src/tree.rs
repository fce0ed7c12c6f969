use std::collections::BTreeMap;
use std::fmt::{self, Write};

use crate::symbols::UNRESOLVED;

/// Rooted ordered tree of call frames with a per-node aggregate byte count.
///
/// Keyed by raw frame address while report trees are being built, and by
/// symbol label after [`CallTree::rekey`]. Child iteration follows the key's
/// natural order, which is what keeps report output deterministic.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CallTree<K: Ord> {
  children: BTreeMap<K, CallTree<K>>,
  value: u64,
}

impl<K: Ord> Default for CallTree<K> {
  fn default() -> Self {
    Self {
      children: BTreeMap::new(),
      value: 0,
    }
  }
}

impl<K: Ord + Clone> CallTree<K> {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Create-or-get the child at `key`.
  pub fn insert(&mut self, key: K) -> &mut CallTree<K> {
    self.children.entry(key).or_default()
  }

  #[must_use]
  pub fn get(&self, key: &K) -> Option<&CallTree<K>> {
    self.children.get(key)
  }

  #[must_use]
  pub fn children(&self) -> &BTreeMap<K, CallTree<K>> {
    &self.children
  }

  #[must_use]
  pub fn is_leaf(&self) -> bool {
    self.children.is_empty()
  }

  #[must_use]
  pub fn value(&self) -> u64 {
    self.value
  }

  pub fn set_value(&mut self, value: u64) {
    self.value = value;
  }

  /// Deep union, summing values at matching keys.
  pub fn merge(&mut self, other: &CallTree<K>) {
    self.value += other.value;

    for (key, child) in &other.children {
      self.insert(key.clone()).merge(child);
    }
  }

  /// Recompute every internal node as the sum of its children; leaves keep
  /// their current value. Returns the new root value.
  pub fn recalc(&mut self) -> u64 {
    if !self.children.is_empty() {
      self.value = self.children.values_mut().map(CallTree::recalc).sum();
    }

    self.value
  }

  /// Structurally identical tree with keys remapped through `map`. Paths
  /// whose key has no mapping are dropped.
  #[must_use]
  pub fn rekey<U: Ord + Clone>(&self, map: &BTreeMap<K, U>) -> CallTree<U> {
    let mut out = CallTree::default();

    for (key, child) in &self.children {
      let Some(new_key) = map.get(key) else {
        continue;
      };

      let slot = out.insert(new_key.clone());
      slot.merge(&child.rekey(map));
      slot.value = child.value;
    }

    out
  }

  /// Render one line per node, `[<sibling-count>] <label> (<value>)`,
  /// indented one `tab` per depth. Keys missing from `labels` print as the
  /// unresolved placeholder.
  pub fn print<W: Write>(
    &self,
    labels: &BTreeMap<K, String>,
    out: &mut W,
    depth: usize,
    tab: &str,
    linefeed: &str,
  ) -> fmt::Result {
    for (key, child) in &self.children {
      for _ in 0..depth {
        out.write_str(tab)?;
      }

      let label = labels.get(key).map_or(UNRESOLVED, String::as_str);

      write!(
        out,
        "[{}] {label} ({}){linefeed}",
        self.children.len(),
        child.value
      )?;

      child.print(labels, out, depth + 1, tab, linefeed)?;
    }

    Ok(())
  }
}
