//! Process-embedded memory-leak detector.
//!
//! The host routes its allocation hooks into [`watch`] and [`forget`]; the
//! tracer records every live allocation together with the call stack that
//! produced it and, on demand, renders a report that attributes unfreed
//! bytes to the code paths responsible, as two call-frame trees (bottom-up
//! and top-down).
//!
//! ## Example
//!
//! ```rust
//! let tracer = leakscope::Tracer::builder().report_on_exit(false).finish();
//!
//! let data = [0_u8; 64];
//! tracer.watch(data.as_ptr(), 64);
//!
//! assert_eq!(tracer.stats().live_bytes, 64);
//!
//! tracer.forget(data.as_ptr());
//!
//! assert_eq!(tracer.stats().live_bytes, 0);
//! ```

mod config;
mod registry;
mod report;
mod stack;
mod symbols;
mod tracer;
mod tree;

pub use {
  config::TracerConfig,
  registry::{
    Address, AllocationRecord, AllocationRegistry, LeakRecord,
    RegistrySnapshot, RemoveOutcome, TracerStats,
  },
  report::{quality_score, view, ReportBuilder},
  stack::{CallStack, MAX_FRAMES},
  symbols::{resolve_addresses, UNRESOLVED},
  tracer::{
    forget, global, init, report, reset, settings, shutdown, size_of, stats,
    watch, Tracer, TracerBuilder,
  },
  tree::CallTree,
};

/// Constant identification used in the report banner.
#[must_use]
pub fn version() -> &'static str {
  concat!("leakscope-", env!("CARGO_PKG_VERSION"))
}

/// Where the project lives.
#[must_use]
pub fn url() -> &'static str {
  "https://github.com/leakscope/leakscope"
}
