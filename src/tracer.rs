use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::Utc;
use tracing::warn;

use crate::config::TracerConfig;
use crate::registry::{
  AllocationRegistry, RegistrySnapshot, RemoveOutcome, TracerStats,
};
use crate::report::{self, ReportBuilder};
use crate::stack::CallStack;
use crate::symbols;

thread_local! {
  static IN_TRACER: Cell<bool> = const { Cell::new(false) };
}

// Frames the tracer itself adds between the host's call site and the
// capture loop.
const SELF_FRAMES: usize = 2;

static GLOBAL: OnceLock<Tracer> = OnceLock::new();

/// Clears the reentrancy flag when the tracked operation unwinds.
struct ReentrancyGuard;

impl ReentrancyGuard {
  fn enter() -> Option<Self> {
    IN_TRACER.with(|flag| {
      if flag.get() {
        None
      } else {
        flag.set(true);
        Some(Self)
      }
    })
  }
}

impl Drop for ReentrancyGuard {
  fn drop(&mut self) {
    IN_TRACER.with(|flag| flag.set(false));
  }
}

/// Thin builder that customizes `TracerConfig` without exposing all knobs
/// up front.
#[derive(Debug, Default)]
pub struct TracerBuilder {
  config: TracerConfig,
}

impl TracerBuilder {
  #[must_use]
  pub fn new() -> Self {
    Self {
      config: TracerConfig::default(),
    }
  }

  #[must_use]
  pub fn with_config(mut self, config: TracerConfig) -> Self {
    self.config = config;
    self
  }

  #[must_use]
  pub fn max_frames(mut self, frames: usize) -> Self {
    self.config.max_frames = frames;
    self
  }

  #[must_use]
  pub fn skip_frames(mut self, begin: usize, end: usize) -> Self {
    self.config.skip_begin = begin;
    self.config.skip_end = end;
    self
  }

  /// Clamped to at least `1.0`.
  #[must_use]
  pub fn allocation_overhead(mut self, overhead: f64) -> Self {
    self.config.allocation_overhead = overhead.max(1.0);
    self
  }

  #[must_use]
  pub fn report_wild_pointers(mut self, report: bool) -> Self {
    self.config.report_wild_pointers = report;
    self
  }

  #[must_use]
  pub fn report_on_exit(mut self, report: bool) -> Self {
    self.config.report_on_exit = report;
    self
  }

  #[must_use]
  pub fn start_enabled(mut self, enabled: bool) -> Self {
    self.config.start_enabled = enabled;
    self
  }

  #[must_use]
  pub fn finish(self) -> Tracer {
    Tracer::with_config(self.config)
  }
}

#[derive(Debug)]
struct TracerInner {
  config: TracerConfig,
  enabled: AtomicBool,
  registry: Mutex<AllocationRegistry>,
}

/// Entry point for registering allocations and producing leak reports.
///
/// Cheap to clone; every handle shares the same registry. A process-global
/// instance backs the free-function surface and is created on first use.
///
/// Every tracked mutation funnels through one critical section, entered
/// only when the calling thread's reentrancy flag is clear: a nested
/// `watch` or `forget` triggered by the tracer's own work (symbolization,
/// diagnostics, report I/O) returns without touching the registry.
#[derive(Clone, Debug)]
pub struct Tracer {
  inner: Arc<TracerInner>,
}

impl Tracer {
  #[must_use]
  pub fn new() -> Self {
    Self::with_config(TracerConfig::default())
  }

  #[must_use]
  pub fn with_config(config: TracerConfig) -> Self {
    let enabled = AtomicBool::new(config.start_enabled);

    let inner = TracerInner {
      config,
      enabled,
      registry: Mutex::new(AllocationRegistry::new()),
    };

    Self {
      inner: Arc::new(inner),
    }
  }

  #[must_use]
  pub fn builder() -> TracerBuilder {
    TracerBuilder::new()
  }

  #[must_use]
  pub fn config(&self) -> &TracerConfig {
    &self.inner.config
  }

  pub fn enable(&self) {
    self.inner.enabled.store(true, Ordering::Release);
  }

  pub fn disable(&self) {
    self.inner.enabled.store(false, Ordering::Release);
  }

  #[must_use]
  pub fn enabled(&self) -> bool {
    self.inner.enabled.load(Ordering::Acquire)
  }

  /// Register a live allocation of `size` bytes at `ptr`, capturing the
  /// current call stack.
  ///
  /// Null pointers, reentrant calls, and a disabled tracer are silent
  /// no-ops. Registering an address that is already live replaces the
  /// previous record.
  pub fn watch(&self, ptr: *const u8, size: usize) {
    if ptr.is_null() || !self.enabled() {
      return;
    }

    let Some(_guard) = ReentrancyGuard::enter() else {
      return;
    };

    let stack = CallStack::capture(SELF_FRAMES, self.inner.config.max_frames);

    self.lock_registry().insert(ptr as usize, size, stack);
  }

  /// Deregister a live allocation.
  ///
  /// Null pointers, reentrant calls, and a disabled tracer are silent
  /// no-ops; an untracked address is absorbed after the optional
  /// wild-pointer diagnostic.
  pub fn forget(&self, ptr: *const u8) {
    if ptr.is_null() || !self.enabled() {
      return;
    }

    let Some(_guard) = ReentrancyGuard::enter() else {
      return;
    };

    let outcome = self.lock_registry().remove(ptr as usize);

    if outcome == RemoveOutcome::NotTracked
      && self.inner.config.report_wild_pointers
    {
      self.report_wild_free(ptr as usize);
    }
  }

  fn report_wild_free(&self, address: usize) {
    let stack = CallStack::capture(SELF_FRAMES, self.inner.config.max_frames);
    let resolved = symbols::resolve_addresses(stack.frames());

    let rendered = resolved
      .iter()
      .enumerate()
      .skip(self.inner.config.skip_begin)
      .map(|(index, frame)| format!("#{} {frame}", index + 1))
      .collect::<Vec<String>>()
      .join(self.inner.config.linefeed);

    warn!(address, stack = %rendered, "wild pointer deallocation");
  }

  /// Tracked size of `ptr`, or 0 when it is not live.
  #[must_use]
  pub fn size_of(&self, ptr: *const u8) -> usize {
    if ptr.is_null() {
      return 0;
    }

    let Some(_guard) = ReentrancyGuard::enter() else {
      return 0;
    };

    self.lock_registry().size_of(ptr as usize)
  }

  /// Snapshot of the running counters.
  #[must_use]
  pub fn stats(&self) -> TracerStats {
    let Some(_guard) = ReentrancyGuard::enter() else {
      return TracerStats::default();
    };

    self.lock_registry().stats()
  }

  /// Copy out the surviving records for external consumers.
  #[must_use]
  pub fn snapshot(&self) -> RegistrySnapshot {
    let Some(_guard) = ReentrancyGuard::enter() else {
      return RegistrySnapshot::default();
    };

    self.lock_registry().snapshot()
  }

  /// Advance the reset watermark and drop every record, so later reports
  /// cover only younger allocations.
  pub fn reset(&self) {
    let Some(_guard) = ReentrancyGuard::enter() else {
      return;
    };

    self.lock_registry().reset();
  }

  /// Build and return the textual leak report for the current survivors.
  ///
  /// Returns an empty document when called reentrantly from inside a
  /// tracked operation.
  #[must_use]
  pub fn report(&self) -> String {
    let Some(_guard) = ReentrancyGuard::enter() else {
      return String::new();
    };

    // Symbolization allocates; it runs on the copied records with the lock
    // released.
    let snapshot = self.lock_registry().snapshot();

    ReportBuilder::new(&self.inner.config).build(&snapshot, Utc::now())
  }

  /// Disable tracking exactly once and, when configured, emit the final
  /// report through the platform viewer.
  ///
  /// Frees arriving after shutdown are silent no-ops, so hosts can tear
  /// down static state in any order.
  pub fn shutdown(&self) {
    if !self.inner.enabled.swap(false, Ordering::AcqRel) {
      return;
    }

    if self.inner.config.report_on_exit {
      let report = self.report();

      if let Err(err) = report::view(&report) {
        warn!(%err, "failed to hand the shutdown report to a viewer");
      }
    }
  }

  fn lock_registry(&self) -> MutexGuard<'_, AllocationRegistry> {
    match self.inner.registry.lock() {
      Ok(guard) => guard,
      Err(err) => err.into_inner(),
    }
  }
}

/// The process-global tracer, created on first use.
pub fn global() -> &'static Tracer {
  GLOBAL.get_or_init(Tracer::new)
}

/// Seed the process-global tracer with `config`. The first caller wins; a
/// tracer that already exists is returned untouched.
pub fn init(config: TracerConfig) -> &'static Tracer {
  GLOBAL.get_or_init(|| Tracer::with_config(config))
}

/// Register a new live allocation with the global tracer.
pub fn watch(ptr: *const u8, size: usize) {
  global().watch(ptr, size);
}

/// Deregister a live allocation from the global tracer.
pub fn forget(ptr: *const u8) {
  global().forget(ptr);
}

/// Counters of the global tracer.
#[must_use]
pub fn stats() -> TracerStats {
  global().stats()
}

/// Advance the global tracer's reset watermark and drop every record.
pub fn reset() {
  global().reset();
}

/// Leak report for the global tracer's current survivors.
#[must_use]
pub fn report() -> String {
  global().report()
}

/// Tracked size of `ptr` in the global tracer, or 0 when it is not live.
#[must_use]
pub fn size_of(ptr: *const u8) -> usize {
  global().size_of(ptr)
}

/// Shut the global tracer down, emitting the final report if configured.
pub fn shutdown() {
  global().shutdown();
}

/// One line per configuration knob of the global tracer.
#[must_use]
pub fn settings() -> String {
  let config = global().config();

  format!(
    "{} ready{}{}",
    crate::version(),
    config.linefeed,
    config.describe()
  )
}
