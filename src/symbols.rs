use std::ffi::{c_void, OsStr};
use std::path::Path;
use std::sync::Once;

use tracing::warn;

/// Placeholder emitted when an address resolves to nothing.
pub const UNRESOLVED: &str = "????";

static SYMBOLS_UNAVAILABLE: Once = Once::new();

/// Resolve every address to a human-readable frame label, preserving order.
///
/// Produces `"name (file, line N)"` when line info is known, `"name"` when
/// only the symbol is, and `"????"` otherwise. A non-empty batch that
/// resolves to placeholders only is reported once per process on the
/// diagnostic channel.
///
/// Must not be called while holding the registry lock: resolution allocates.
#[must_use]
pub fn resolve_addresses(addresses: &[usize]) -> Vec<String> {
  let labels: Vec<String> =
    addresses.iter().map(|&address| resolve_one(address)).collect();

  if !labels.is_empty() && labels.iter().all(|label| label == UNRESOLVED) {
    warn_symbols_unavailable();
  }

  labels
}

fn resolve_one(address: usize) -> String {
  if address == 0 {
    return UNRESOLVED.to_string();
  }

  let mut label = None;

  backtrace::resolve(address as *mut c_void, |symbol| {
    if label.is_some() {
      return;
    }

    let Some(name) = symbol.name() else {
      return;
    };

    label = Some(match (symbol.filename(), symbol.lineno()) {
      (Some(file), Some(line)) => {
        format!("{name} ({}, line {line})", path_to_str(file))
      }
      _ => name.to_string(),
    });
  });

  label.unwrap_or_else(|| UNRESOLVED.to_string())
}

fn path_to_str(path: &Path) -> &str {
  path
    .to_str()
    .or_else(|| path.file_name().and_then(OsStr::to_str))
    .unwrap_or(UNRESOLVED)
}

/// Report the missing symbol facility once per process.
pub(crate) fn warn_symbols_unavailable() {
  SYMBOLS_UNAVAILABLE.call_once(|| {
    warn!("failed to resolve symbols; is debug information available?");
  });
}
