/// Controls how allocations are tracked and how leak reports are rendered.
#[derive(Debug, Clone)]
pub struct TracerConfig {
  /// Multiplier routing collaborators apply to simulate bigger memory
  /// requirements. Always at least `1.0`; the observing core never applies
  /// it itself.
  pub allocation_overhead: f64,
  /// Line terminator used in report output.
  pub linefeed: &'static str,
  /// Maximum number of return addresses captured per allocation.
  pub max_frames: usize,
  /// Whether routing collaborators should zero-fill fresh allocations.
  pub memset_allocations: bool,
  /// Whether `shutdown` renders a final report and hands it to the viewer.
  pub report_on_exit: bool,
  /// Whether frees of untracked pointers emit a diagnostic.
  pub report_wild_pointers: bool,
  /// Innermost frames dropped from every stack when building report trees.
  pub skip_begin: usize,
  /// Outermost frames dropped from every stack when building report trees.
  pub skip_end: usize,
  /// Whether the tracer starts with tracking armed.
  pub start_enabled: bool,
  /// Indentation unit used in report output.
  pub tab: &'static str,
}

impl Default for TracerConfig {
  fn default() -> Self {
    Self {
      allocation_overhead: 1.0,
      linefeed: "\n",
      max_frames: 128,
      memset_allocations: true,
      report_on_exit: true,
      report_wild_pointers: false,
      skip_begin: 0,
      skip_end: 0,
      start_enabled: true,
      tab: "\t",
    }
  }
}

impl TracerConfig {
  /// Explicitly disable eager tracking.
  #[must_use]
  pub fn disabled(mut self) -> Self {
    self.start_enabled = false;
    self
  }

  /// Builder-style helper to adjust the capture depth.
  #[must_use]
  pub fn with_max_frames(mut self, frames: usize) -> Self {
    self.max_frames = frames;
    self
  }

  /// One line per knob, for diagnostics and the status page.
  #[must_use]
  pub fn describe(&self) -> String {
    let lf = self.linefeed;

    let mut out = String::new();

    out.push_str(&format!(
      "with allocation_overhead=x{}{lf}",
      self.allocation_overhead
    ));
    out.push_str(&format!("with max_frames={}{lf}", self.max_frames));
    out.push_str(&format!(
      "with memset_allocations={}{lf}",
      yes_no(self.memset_allocations)
    ));
    out.push_str(&format!(
      "with report_on_exit={}{lf}",
      yes_no(self.report_on_exit)
    ));
    out.push_str(&format!(
      "with report_wild_pointers={}{lf}",
      yes_no(self.report_wild_pointers)
    ));
    out.push_str(&format!("with skip_begin={}{lf}", self.skip_begin));
    out.push_str(&format!("with skip_end={}{lf}", self.skip_end));
    out.push_str(&format!(
      "with start_enabled={}{lf}",
      yes_no(self.start_enabled)
    ));

    out
  }
}

fn yes_no(value: bool) -> &'static str {
  if value {
    "yes"
  } else {
    "no"
  }
}
