//! Symbolic byte-addressable memory.
//!
//! Memory is a timestamped list of entries, each saying which data point
//! occupies a byte range. A data point's value is right-aligned to the end of
//! its range. Later entries shadow earlier ones byte by byte; a read that does
//! not line up with a single entry is reconstructed from the live fragments of
//! every overlapping entry ([`AliasInfo`]).

use crate::data_point::DataPoint;
use crate::error::{Result, SynthError};
use revm::primitives::U256;
use std::collections::BTreeMap;
use std::ops::Range;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryEntry {
  pub offset: usize,
  pub size: usize,
  pub data: DataPoint,
}

impl MemoryEntry {
  pub fn new(offset: usize, size: usize, data: DataPoint) -> Self {
    Self { offset, size, data }
  }

  pub fn end(&self) -> usize {
    self.offset + self.size
  }

  fn overlaps(&self, range: &Range<usize>) -> bool {
    self.offset < range.end && range.start < self.end()
  }

  /// Byte stored at absolute address `addr`, which must lie in the entry.
  pub fn byte_at(&self, addr: usize) -> u8 {
    let from_end = self.end() - 1 - addr;
    if from_end >= 32 {
      return 0;
    }
    self.data.value.to_le_bytes::<32>()[from_end]
  }
}

/// How to extract one fragment's contribution to a word read.
///
/// `shift` is in bits: positive means shift left. `mask` keeps the bytes of
/// the view this fragment owns, in view coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliasInfo {
  pub data: DataPoint,
  pub shift: isize,
  pub mask: U256,
}

/// The bytes of one entry still visible inside a view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
  pub entry: MemoryEntry,
  /// Contiguous absolute address runs, ascending.
  pub valid: Vec<Range<usize>>,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryPt {
  entries: BTreeMap<u64, MemoryEntry>,
  next_timestamp: u64,
}

impl MemoryPt {
  pub fn new() -> Self {
    Self::default()
  }

  /// Rebuild a memory by writing `entries` in order.
  pub fn simulate(entries: impl IntoIterator<Item = MemoryEntry>) -> Self {
    let mut memory = Self::new();
    memory.write_batch(entries);
    memory
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Store an entry, dropping every older entry it fully covers.
  pub fn write(&mut self, entry: MemoryEntry) {
    if entry.size == 0 {
      return;
    }
    self
      .entries
      .retain(|_, old| !(old.offset >= entry.offset && old.end() <= entry.end()));
    self.entries.insert(self.next_timestamp, entry);
    self.next_timestamp += 1;
  }

  pub fn write_batch(&mut self, entries: impl IntoIterator<Item = MemoryEntry>) {
    for entry in entries {
      self.write(entry);
    }
  }

  /// Timestamp of the entry owning each byte of the view.
  fn owners(&self, view: &Range<usize>) -> Vec<Option<u64>> {
    let mut owners = vec![None; view.len()];
    for (&timestamp, entry) in &self.entries {
      if !entry.overlaps(view) {
        continue;
      }
      let start = entry.offset.max(view.start);
      let end = entry.end().min(view.end);
      for owner in &mut owners[start - view.start..end - view.start] {
        *owner = Some(timestamp);
      }
    }
    owners
  }

  /// Entries visible in `[offset, offset + len)` with the bytes each still
  /// owns, oldest first.
  pub fn fragments(&self, offset: usize, len: usize) -> Vec<Fragment> {
    let view = offset..offset + len;
    let owners = self.owners(&view);
    let mut runs: BTreeMap<u64, Vec<Range<usize>>> = BTreeMap::new();
    for (i, owner) in owners.iter().enumerate() {
      let Some(timestamp) = owner else { continue };
      let addr = view.start + i;
      let entry_runs = runs.entry(*timestamp).or_default();
      match entry_runs.last_mut() {
        Some(run) if run.end == addr => run.end = addr + 1,
        _ => entry_runs.push(addr..addr + 1),
      }
    }
    runs
      .into_iter()
      .filter_map(|(timestamp, valid)| {
        self.entries.get(&timestamp).map(|entry| Fragment {
          entry: entry.clone(),
          valid,
        })
      })
      .collect()
  }

  /// Entries needed to reproduce `[offset, offset + len)`, oldest first.
  pub fn read(&self, offset: usize, len: usize) -> Vec<MemoryEntry> {
    self.fragments(offset, len).into_iter().map(|f| f.entry).collect()
  }

  /// Decompose a word read of at most 32 bytes into per-fragment shifts and
  /// masks. An empty result means every byte reads as zero.
  pub fn data_alias(&self, offset: usize, len: usize) -> Result<Vec<AliasInfo>> {
    if len > 32 {
      return Err(SynthError::precondition(format!(
        "memory alias over {len} bytes exceeds one word"
      )));
    }
    let view_end = offset + len;
    self
      .fragments(offset, len)
      .into_iter()
      .map(|fragment| {
        let mut mask = U256::ZERO;
        for run in &fragment.valid {
          if run.start < offset || run.end > view_end {
            return Err(SynthError::referential(format!(
              "fragment bytes {run:?} escape the view {offset}..{view_end}"
            )));
          }
          for addr in run.clone() {
            mask |= U256::from(0xffu64) << (8 * (view_end - 1 - addr));
          }
        }
        let shift = (view_end as isize - fragment.entry.end() as isize) * 8;
        Ok(AliasInfo {
          data: fragment.entry.data,
          shift,
          mask,
        })
      })
      .collect()
  }

  /// Reconstruct concrete bytes; unwritten bytes read as zero.
  pub fn view(&self, offset: usize, len: usize) -> Vec<u8> {
    let view = offset..offset + len;
    let owners = self.owners(&view);
    owners
      .iter()
      .enumerate()
      .map(|(i, owner)| {
        owner
          .and_then(|timestamp| self.entries.get(&timestamp))
          .map(|entry| entry.byte_at(offset + i))
          .unwrap_or(0)
      })
      .collect()
  }
}

/// Value of a word read after applying every alias.
pub fn resolve_aliases(aliases: &[AliasInfo]) -> U256 {
  aliases.iter().fold(U256::ZERO, |acc, alias| {
    let shifted = shift_value(alias.data.value, alias.shift);
    acc | (shifted & alias.mask)
  })
}

/// Shift left for positive `bits`, right for negative.
pub fn shift_value(value: U256, bits: isize) -> U256 {
  let magnitude = bits.unsigned_abs();
  if magnitude >= 256 {
    return U256::ZERO;
  }
  if bits >= 0 { value << magnitude } else { value >> magnitude }
}
