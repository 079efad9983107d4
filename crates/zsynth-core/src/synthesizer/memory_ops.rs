//! Memory manager: turning alias decompositions into placements.

use super::state::CircuitState;
use crate::arith::ArithOp;
use crate::data_point::DataPoint;
use crate::error::{Result, SynthError};
use crate::memory::{AliasInfo, MemoryEntry, MemoryPt};
use revm::primitives::U256;
use std::ops::Range;

/// Mask keeping `width` bytes that sit `low` bytes above the least
/// significant byte.
fn byte_window_mask(low: usize, width: usize) -> U256 {
  let ones = |bytes: usize| {
    if bytes >= 32 {
      U256::MAX
    } else {
      (U256::from(1u64) << (8 * bytes)) - U256::from(1u64)
    }
  };
  ones(low + width) & !ones(low)
}

impl CircuitState {
  /// Shift left for positive `bits`, right for negative. Shifting by a full
  /// word or more always yields zero, which is loaded as a constant.
  pub(crate) fn place_shift(&mut self, data: DataPoint, bits: isize) -> Result<DataPoint> {
    let magnitude = bits.unsigned_abs();
    if magnitude == 0 {
      return Ok(data);
    }
    if magnitude >= 256 {
      return self.load_shared_static(U256::ZERO, 256, "Zero word");
    }
    let shifter = self.load_shared_static(U256::from(magnitude), 256, "Shift amount")?;
    let op = if bits > 0 { ArithOp::Shl } else { ArithOp::Shr };
    self.place_arith_single(op, &[shifter, data])
  }

  /// AND with `mask`, skipped when the mask would not change the value.
  pub(crate) fn place_mask(&mut self, data: DataPoint, mask: U256) -> Result<DataPoint> {
    if data.value & mask == data.value {
      return Ok(data);
    }
    let mask_pt = self.load_shared_static(mask, 256, "Byte mask")?;
    self.place_arith_single(ArithOp::And, &[data, mask_pt])
  }

  /// Realize a word read from its aliases. Fragments own disjoint bytes, so
  /// their masked contributions are summed.
  pub fn place_memory_to_stack(&mut self, aliases: &[AliasInfo]) -> Result<DataPoint> {
    if aliases.is_empty() {
      return self.load_shared_static(U256::ZERO, 256, "Zero word");
    }
    let limit = self.frontend.accumulator_input_limit;
    if aliases.len() > limit {
      return Err(SynthError::capacity("Accumulator inputs", aliases.len(), limit));
    }
    let mut parts = Vec::with_capacity(aliases.len());
    for alias in aliases {
      let shifted = self.place_shift(alias.data.clone(), alias.shift)?;
      parts.push(self.place_mask(shifted, alias.mask)?);
    }
    if parts.len() == 1 {
      return parts
        .pop()
        .ok_or_else(|| SynthError::referential("alias reconstruction lost its only part"));
    }
    self.place_arith_single(ArithOp::Accumulator, &parts)
  }

  /// Value stored by MSTORE (32 bytes) or MSTORE8 (1 byte).
  pub fn place_mstore(&mut self, data: DataPoint, truncate_bytes: usize) -> Result<DataPoint> {
    if truncate_bytes >= 32 {
      return Ok(data);
    }
    self.place_mask(data, byte_window_mask(0, truncate_bytes))
  }

  /// Entries reproducing `len` bytes of `source` at `src`, relocated to
  /// `dst`. Each surviving run of an entry is masked to the run, then shifted
  /// down so its value ends at the run's end. Unwritten bytes become zero
  /// entries.
  pub fn copy_memory(
    &mut self,
    source: &MemoryPt,
    src: usize,
    len: usize,
    dst: usize,
  ) -> Result<Vec<MemoryEntry>> {
    let mut copied = Vec::new();
    let mut covered = vec![false; len];
    for fragment in source.fragments(src, len) {
      for run in &fragment.valid {
        let width = run.len();
        let low = fragment.entry.end() - run.end;
        let masked = self.place_mask(fragment.entry.data.clone(), byte_window_mask(low, width))?;
        let data = self.place_shift(masked, -((8 * low) as isize))?;
        copied.push(MemoryEntry::new(dst + run.start - src, width, data));
        covered[run.start - src..run.end - src].fill(true);
      }
    }
    for gap in uncovered_runs(&covered) {
      let zero = self.load_shared_static(U256::ZERO, 256, "Zero word")?;
      copied.push(MemoryEntry::new(dst + gap.start, gap.len(), zero));
    }
    copied.sort_by_key(|entry| entry.offset);
    Ok(copied)
  }
}

fn uncovered_runs(covered: &[bool]) -> Vec<Range<usize>> {
  let mut runs: Vec<Range<usize>> = Vec::new();
  for (i, _) in covered.iter().enumerate().filter(|(_, c)| !**c) {
    match runs.last_mut() {
      Some(run) if run.end == i => run.end = i + 1,
      _ => runs.push(i..i + 1),
    }
  }
  runs
}
