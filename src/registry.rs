use std::collections::HashMap;
use std::io::Write;

use nohash_hasher::BuildNoHashHasher;
use serde::Serialize;

use crate::stack::CallStack;

/// Live-pointer value; keys the registry and is never dereferenced.
pub type Address = usize;

// Addresses hash as themselves.
type AddressMap =
  HashMap<Address, AllocationRecord, BuildNoHashHasher<Address>>;

/// Everything retained about one live allocation.
#[derive(Debug, Clone)]
pub struct AllocationRecord {
  pub id: u64,
  pub size: usize,
  pub stack: CallStack,
}

/// One surviving allocation copied out of the registry.
#[derive(Debug, Clone)]
pub struct LeakRecord {
  pub address: Address,
  pub id: u64,
  pub size: usize,
  pub stack: CallStack,
}

/// Running counters, readable atomically with respect to the registry lock.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct TracerStats {
  pub live_bytes: u64,
  pub live_count: u64,
  pub peak_bytes: u64,
}

impl TracerStats {
  /// Serialize the counters to JSON using the provided writer.
  ///
  /// # Errors
  ///
  /// Returns an error if serialization to JSON fails.
  pub fn export_json<W: Write>(
    &self,
    writer: W,
  ) -> Result<(), serde_json::Error> {
    serde_json::to_writer(writer, self)
  }
}

/// Surviving allocations copied out under the lock, plus the totals a
/// report needs.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
  pub leaks: Vec<LeakRecord>,
  /// Allocations ever registered, across resets.
  pub lifetime_allocations: u64,
  pub stats: TracerStats,
}

/// Result of deregistering an address.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RemoveOutcome {
  /// The address was never registered, or already forgotten.
  NotTracked,
  /// The address was live; its byte count has been released.
  Removed(usize),
}

/// Map of live pointers with running statistics and the reset watermark.
///
/// The registry itself is unsynchronized; [`crate::Tracer`] owns it behind
/// a mutex and funnels every mutation through one critical section.
#[derive(Debug, Default)]
pub struct AllocationRegistry {
  lifetime_allocations: u64,
  live: AddressMap,
  next_id: u64,
  reset_id: u64,
  stats: TracerStats,
}

impl AllocationRegistry {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a live allocation, overwriting any record already present at
  /// `address` (the newest wins; prior accounting is released). Returns the
  /// assigned id.
  pub fn insert(
    &mut self,
    address: Address,
    size: usize,
    stack: CallStack,
  ) -> u64 {
    self.next_id += 1;
    self.lifetime_allocations += 1;

    let record = AllocationRecord {
      id: self.next_id,
      size,
      stack,
    };

    if let Some(previous) = self.live.insert(address, record) {
      self.stats.live_bytes -= previous.size as u64;
    } else {
      self.stats.live_count += 1;
    }

    self.stats.live_bytes += size as u64;
    self.stats.peak_bytes = self.stats.peak_bytes.max(self.stats.live_bytes);

    self.next_id
  }

  /// Deregister `address`, releasing its accounting if present.
  pub fn remove(&mut self, address: Address) -> RemoveOutcome {
    match self.live.remove(&address) {
      Some(record) => {
        self.stats.live_count -= 1;
        self.stats.live_bytes -= record.size as u64;
        RemoveOutcome::Removed(record.size)
      }
      None => RemoveOutcome::NotTracked,
    }
  }

  #[must_use]
  pub fn size_of(&self, address: Address) -> usize {
    self.live.get(&address).map_or(0, |record| record.size)
  }

  #[must_use]
  pub fn stats(&self) -> TracerStats {
    self.stats
  }

  /// Copy out the records younger than the reset watermark, sorted by
  /// address for deterministic downstream output.
  #[must_use]
  pub fn snapshot(&self) -> RegistrySnapshot {
    let mut leaks: Vec<LeakRecord> = self
      .live
      .iter()
      .filter(|(_, record)| record.id > self.reset_id)
      .map(|(&address, record)| LeakRecord {
        address,
        id: record.id,
        size: record.size,
        stack: record.stack.clone(),
      })
      .collect();

    leaks.sort_by_key(|leak| leak.address);

    RegistrySnapshot {
      leaks,
      lifetime_allocations: self.lifetime_allocations,
      stats: self.stats,
    }
  }

  /// Clear the map, zero the counters, and advance the reset watermark so
  /// later reports see only younger allocations. The lifetime allocation
  /// count survives.
  pub fn reset(&mut self) {
    self.live.clear();
    self.reset_id = self.next_id;
    self.stats = TracerStats::default();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tracks_live_bytes_and_peak() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x1, 8, CallStack::default());

    assert_eq!(
      registry.stats(),
      TracerStats {
        live_bytes: 8,
        live_count: 1,
        peak_bytes: 8,
      }
    );

    registry.remove(0x1);

    assert_eq!(
      registry.stats(),
      TracerStats {
        live_bytes: 0,
        live_count: 0,
        peak_bytes: 8,
      }
    );
  }

  #[test]
  fn duplicate_insert_replaces_the_previous_record() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x3, 10, CallStack::default());
    registry.insert(0x3, 20, CallStack::default());

    assert_eq!(registry.stats().live_count, 1);
    assert_eq!(registry.stats().live_bytes, 20);
    assert_eq!(registry.snapshot().lifetime_allocations, 2);

    registry.remove(0x3);

    assert_eq!(registry.stats().live_count, 0);
    assert_eq!(registry.stats().live_bytes, 0);
  }

  #[test]
  fn zero_byte_allocations_are_counted() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x4, 0, CallStack::default());

    assert_eq!(registry.stats().live_count, 1);
    assert_eq!(registry.stats().live_bytes, 0);
    assert_eq!(registry.size_of(0x4), 0);
  }

  #[test]
  fn removing_an_unknown_address_is_observational() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x1, 4, CallStack::default());

    let before = registry.stats();

    assert_eq!(registry.remove(0xDEAD_BEEF), RemoveOutcome::NotTracked);
    assert_eq!(registry.stats(), before);
  }

  #[test]
  fn reset_zeroes_counters_and_filters_older_records() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0xa, 5, CallStack::default());
    registry.reset();

    assert_eq!(registry.stats(), TracerStats::default());

    registry.insert(0xb, 7, CallStack::default());

    let snapshot = registry.snapshot();

    assert_eq!(snapshot.leaks.len(), 1);
    assert_eq!(snapshot.leaks[0].address, 0xb);
  }

  #[test]
  fn reset_preserves_the_lifetime_allocation_count() {
    let mut registry = AllocationRegistry::new();

    for i in 0..3_usize {
      registry.insert(0x100 + i, 8, CallStack::default());
      registry.remove(0x100 + i);
    }

    registry.reset();
    registry.insert(0x1, 16, CallStack::default());

    let snapshot = registry.snapshot();

    assert_eq!(snapshot.lifetime_allocations, 4);
    assert_eq!(snapshot.leaks.len(), 1);
  }

  #[test]
  fn snapshot_sorts_records_by_address() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0xb, 1, CallStack::default());
    registry.insert(0xa, 1, CallStack::default());

    let addresses: Vec<Address> = registry
      .snapshot()
      .leaks
      .iter()
      .map(|leak| leak.address)
      .collect();

    assert_eq!(addresses, vec![0xa, 0xb]);
  }

  #[test]
  fn ids_increase_with_each_insertion() {
    let mut registry = AllocationRegistry::new();

    let first = registry.insert(0x1, 1, CallStack::default());
    let second = registry.insert(0x2, 1, CallStack::default());

    assert!(second > first);
  }

  #[test]
  fn size_of_reports_zero_for_unknown_addresses() {
    let registry = AllocationRegistry::new();

    assert_eq!(registry.size_of(0x1), 0);
  }

  #[test]
  fn stats_export_as_json() {
    let mut registry = AllocationRegistry::new();

    registry.insert(0x1, 8, CallStack::default());

    let mut buffer = Vec::new();

    registry
      .stats()
      .export_json(&mut buffer)
      .expect("stats should serialize");

    let encoded = String::from_utf8(buffer).expect("json is utf-8");

    assert!(encoded.contains("\"live_bytes\":8"));
  }
}
