use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};

use crate::config::TracerConfig;
use crate::registry::{LeakRecord, RegistrySnapshot};
use crate::symbols;
use crate::tree::CallTree;
use crate::{url, version};

// Synthetic branch keys, chosen so the bottom-up branch sorts first.
pub(crate) const BOTTOM_UP_KEY: usize = usize::MAX - 1;
pub(crate) const TOP_DOWN_KEY: usize = usize::MAX;

const BOTTOM_UP_LABEL: &str = "bottom-up tree (useful to find leak endings)";
const TOP_DOWN_LABEL: &str = "top-down tree (useful to find leak beginnings)";

const PREFIX: &str = "leakscope: ";

/// Renders a snapshot of surviving allocations into the textual leak
/// report.
#[derive(Debug)]
pub struct ReportBuilder<'a> {
  config: &'a TracerConfig,
}

impl<'a> ReportBuilder<'a> {
  #[must_use]
  pub fn new(config: &'a TracerConfig) -> Self {
    Self { config }
  }

  /// Produce the full report document for `snapshot`, stamped with
  /// `generated_at`.
  ///
  /// Infallible: symbolization failures degrade to placeholders and a
  /// diagnostic line rather than an error.
  #[must_use]
  pub fn build(
    &self,
    snapshot: &RegistrySnapshot,
    generated_at: DateTime<Utc>,
  ) -> String {
    let lf = self.config.linefeed;

    let leak_count = snapshot.leaks.len() as u64;
    let wasted: u64 = snapshot.leaks.iter().map(|leak| leak.size as u64).sum();
    let score = quality_score(leak_count, snapshot.lifetime_allocations);
    let verdict = if leak_count == 0 { "ok" } else { "error" };

    let mut out = String::new();

    out.push_str("<html><body><xmp>");
    out.push_str(lf);
    out.push_str(&format!(
      "{PREFIX}generated with {} ({}){lf}",
      version(),
      url()
    ));
    out.push_str(&format!(
      "{PREFIX}generated on {}{lf}",
      generated_at.to_rfc2822()
    ));
    out.push_str(&format!(
      "{PREFIX}best viewed in a foldable text editor with tabs=2sp and no \
       word-wrap{lf}"
    ));
    out.push_str(&format!(
      "{PREFIX}{verdict}, {leak_count} leaks found; {wasted} bytes wasted \
       ('{score}' score){lf}"
    ));

    let (mut combined, addresses) = self.frame_trees(&snapshot.leaks);

    if addresses.is_empty() {
      if leak_count > 0 {
        symbols::warn_symbols_unavailable();
        out.push_str(&format!("{PREFIX}failed to resolve symbols{lf}"));
      }
    } else {
      let unique: Vec<usize> = addresses.into_iter().collect();
      let resolved = symbols::resolve_addresses(&unique);

      let mut labels: BTreeMap<usize, String> =
        unique.into_iter().zip(resolved).collect();

      labels.insert(BOTTOM_UP_KEY, BOTTOM_UP_LABEL.to_string());
      labels.insert(TOP_DOWN_KEY, TOP_DOWN_LABEL.to_string());

      combined.recalc();

      let _ = combined.print(&labels, &mut out, 0, self.config.tab, lf);
    }

    out.push_str("</xmp></body></html>");

    out
  }

  /// Both tree orientations under one combined root, plus the set of unique
  /// frame addresses the trees reference.
  ///
  /// Each leak walks its frames once, setting every visited node's value to
  /// the leak's size; `recalc` later turns leaf values into true aggregates.
  pub(crate) fn frame_trees(
    &self,
    leaks: &[LeakRecord],
  ) -> (CallTree<usize>, BTreeSet<usize>) {
    let mut bottom_up = CallTree::new();
    let mut top_down = CallTree::new();
    let mut addresses = BTreeSet::new();

    for leak in leaks {
      let frames = leak.stack.frames();

      let Some(end) = frames.len().checked_sub(1 + self.config.skip_end)
      else {
        continue;
      };

      let start = self.config.skip_begin;

      if start > end {
        continue;
      }

      let size = leak.size as u64;
      let mut newest = &mut bottom_up;
      let mut oldest = &mut top_down;

      for i in 0..=(end - start) {
        newest = newest.insert(frames[start + i]);
        newest.set_value(size);
        addresses.insert(frames[start + i]);

        oldest = oldest.insert(frames[end - i]);
        oldest.set_value(size);
        addresses.insert(frames[end - i]);
      }
    }

    let mut combined = CallTree::new();

    *combined.insert(BOTTOM_UP_KEY) = bottom_up;
    *combined.insert(TOP_DOWN_KEY) = top_down;

    (combined, addresses)
  }
}

/// Quality bucket for the summary line, rated against every allocation the
/// process ever made. `"perfect!"` iff nothing leaked.
#[must_use]
pub fn quality_score(
  leak_count: u64,
  lifetime_allocations: u64,
) -> &'static str {
  if leak_count == 0 {
    return "perfect!";
  }

  let pct = leak_count as f64 * 100.0 / lifetime_allocations.max(1) as f64;

  if pct <= 1.25 {
    "excellent"
  } else if pct <= 2.5 {
    "good"
  } else if pct <= 5.0 {
    "poor"
  } else if pct <= 10.0 {
    "mediocre"
  } else {
    "lame"
  }
}

/// Write `report_html` next to the system temp dir and hand it to the
/// platform's default viewer. Returns the path written.
///
/// # Errors
///
/// Returns an error if the file cannot be written or the viewer cannot be
/// spawned.
pub fn view(report_html: &str) -> io::Result<PathBuf> {
  let path = std::env::temp_dir()
    .join(format!("leakscope-report-{}.html", std::process::id()));

  std::fs::write(&path, report_html)?;
  open_in_viewer(&path)?;

  Ok(path)
}

#[cfg(target_os = "windows")]
fn open_in_viewer(path: &Path) -> io::Result<()> {
  Command::new("cmd").args(["/C", "start", ""]).arg(path).spawn()?;
  Ok(())
}

#[cfg(target_os = "macos")]
fn open_in_viewer(path: &Path) -> io::Result<()> {
  Command::new("open").arg(path).spawn()?;
  Ok(())
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn open_in_viewer(path: &Path) -> io::Result<()> {
  Command::new("xdg-open").arg(path).spawn()?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::registry::AllocationRegistry;
  use crate::stack::CallStack;

  fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).expect("epoch timestamp")
  }

  #[test]
  fn clean_run_scores_perfect() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x1, 8, CallStack::from_frames(&[0x10]));
    registry.remove(0x1);

    let config = TracerConfig::default();
    let report =
      ReportBuilder::new(&config).build(&registry.snapshot(), epoch());

    assert!(report.contains("ok, 0 leaks found; 0 bytes wasted"));
    assert!(report.contains("'perfect!' score"));
  }

  #[test]
  fn single_leak_is_attributed_in_full() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x2, 16, CallStack::from_frames(&[0x10, 0x20]));

    let config = TracerConfig::default();
    let builder = ReportBuilder::new(&config);
    let snapshot = registry.snapshot();

    let report = builder.build(&snapshot, epoch());

    assert!(report.contains("error, 1 leaks found; 16 bytes wasted"));

    let (mut combined, _) = builder.frame_trees(&snapshot.leaks);

    combined.recalc();

    let bottom_up =
      combined.get(&BOTTOM_UP_KEY).expect("missing bottom-up branch");

    assert_eq!(bottom_up.children().len(), 1);
    assert_eq!(bottom_up.value(), 16);

    let leaf = bottom_up
      .get(&0x10)
      .and_then(|node| node.get(&0x20))
      .expect("missing leaf");

    assert!(leaf.is_leaf());
    assert_eq!(leaf.value(), 16);
  }

  #[test]
  fn leaks_sharing_outer_frames_share_a_prefix() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x10, 8, CallStack::from_frames(&[0xa1, 0x51, 0x52]));
    registry.insert(0x20, 24, CallStack::from_frames(&[0xb1, 0x51, 0x52]));

    let config = TracerConfig::default();
    let builder = ReportBuilder::new(&config);
    let snapshot = registry.snapshot();

    let (mut combined, _) = builder.frame_trees(&snapshot.leaks);

    combined.recalc();

    let top_down =
      combined.get(&TOP_DOWN_KEY).expect("missing top-down branch");

    let shared = top_down
      .get(&0x52)
      .and_then(|node| node.get(&0x51))
      .expect("missing shared prefix");

    assert_eq!(shared.value(), 32);
    assert_eq!(shared.children().len(), 2);
  }

  #[test]
  fn leaks_sharing_inner_frames_branch_in_the_bottom_up_tree() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x10, 8, CallStack::from_frames(&[0x51, 0xa1]));
    registry.insert(0x20, 24, CallStack::from_frames(&[0x51, 0xb1]));

    let config = TracerConfig::default();
    let builder = ReportBuilder::new(&config);
    let snapshot = registry.snapshot();

    let (mut combined, _) = builder.frame_trees(&snapshot.leaks);

    combined.recalc();

    let bottom_up =
      combined.get(&BOTTOM_UP_KEY).expect("missing bottom-up branch");

    let shared = bottom_up.get(&0x51).expect("missing shared frame");

    assert_eq!(shared.value(), 32);
    assert_eq!(shared.children().len(), 2);
  }

  #[test]
  fn reset_filters_older_allocations_out_of_the_report() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0xa, 5, CallStack::from_frames(&[0x1]));
    registry.reset();
    registry.insert(0xb, 7, CallStack::from_frames(&[0x2]));

    let config = TracerConfig::default();
    let report =
      ReportBuilder::new(&config).build(&registry.snapshot(), epoch());

    assert!(report.contains("1 leaks found; 7 bytes wasted"));
  }

  #[test]
  fn score_rates_leaks_against_lifetime_allocations_across_resets() {
    let mut registry = AllocationRegistry::new();

    for i in 0..200_usize {
      registry.insert(0x1000 + i, 8, CallStack::from_frames(&[0x1]));
      registry.remove(0x1000 + i);
    }

    registry.reset();
    registry.insert(0x2, 16, CallStack::from_frames(&[0x2]));

    let config = TracerConfig::default();
    let report =
      ReportBuilder::new(&config).build(&registry.snapshot(), epoch());

    assert!(report.contains("1 leaks found"));
    assert!(report.contains("'excellent' score"));
  }

  #[test]
  fn identical_snapshots_render_identical_bytes() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x2, 16, CallStack::from_frames(&[0x10, 0x20]));
    registry.insert(0x3, 8, CallStack::from_frames(&[0x30]));

    let config = TracerConfig::default();
    let builder = ReportBuilder::new(&config);
    let snapshot = registry.snapshot();

    assert_eq!(
      builder.build(&snapshot, epoch()),
      builder.build(&snapshot, epoch())
    );
  }

  #[test]
  fn depth_zero_leaks_contribute_to_neither_tree() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x9, 4, CallStack::default());

    let config = TracerConfig::default();
    let builder = ReportBuilder::new(&config);
    let snapshot = registry.snapshot();

    let (combined, addresses) = builder.frame_trees(&snapshot.leaks);

    assert!(addresses.is_empty());
    assert!(combined.get(&BOTTOM_UP_KEY).expect("branch").is_leaf());
    assert!(combined.get(&TOP_DOWN_KEY).expect("branch").is_leaf());

    let report = builder.build(&snapshot, epoch());

    assert!(report.contains("failed to resolve symbols"));
  }

  #[test]
  fn full_depth_stacks_are_reportable() {
    let frames: Vec<usize> = (1..=crate::stack::MAX_FRAMES).collect();

    let mut registry = AllocationRegistry::new();

    registry.insert(0x2, 32, CallStack::from_frames(&frames));

    let config = TracerConfig::default();
    let builder = ReportBuilder::new(&config);
    let snapshot = registry.snapshot();

    let (mut combined, addresses) = builder.frame_trees(&snapshot.leaks);

    assert_eq!(addresses.len(), crate::stack::MAX_FRAMES);
    assert_eq!(combined.recalc(), 64);
  }

  #[test]
  fn skip_bounds_trim_frames_from_both_ends() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x2, 8, CallStack::from_frames(&[0x1, 0x2, 0x3, 0x4]));

    let config = TracerConfig {
      skip_begin: 1,
      skip_end: 1,
      ..TracerConfig::default()
    };

    let builder = ReportBuilder::new(&config);
    let snapshot = registry.snapshot();

    let (combined, addresses) = builder.frame_trees(&snapshot.leaks);

    assert_eq!(addresses, BTreeSet::from([0x2, 0x3]));

    let bottom_up =
      combined.get(&BOTTOM_UP_KEY).expect("missing bottom-up branch");

    assert!(bottom_up
      .get(&0x2)
      .and_then(|node| node.get(&0x3))
      .is_some());
  }

  #[test]
  fn score_buckets_follow_leak_percentage() {
    assert_eq!(quality_score(0, 0), "perfect!");
    assert_eq!(quality_score(0, 100), "perfect!");
    assert_eq!(quality_score(1, 100), "excellent");
    assert_eq!(quality_score(2, 100), "good");
    assert_eq!(quality_score(4, 100), "poor");
    assert_eq!(quality_score(8, 100), "mediocre");
    assert_eq!(quality_score(20, 100), "lame");
  }
}
