//! From a captured placement list to prover inputs.
//!
//! [`variables`] rewrites the placements into 128-bit template wires and
//! computes every placement's local witness; [`permutation`] derives the copy
//! constraints between them. [`build`] runs both against one catalogue.

pub mod evaluator;
pub mod permutation;
pub mod variables;

pub use evaluator::{NativeEvaluator, WitnessEvaluator};
pub use permutation::{Permutation, PermutationEntry};
pub use variables::{NormalizedCircuit, PlacementVariables, PublicInstance};

use crate::config::Catalogue;
use crate::error::{Result, SynthError};
use crate::synthesizer::SynthesisOutput;
use revm::primitives::U256;
use tracing::{info, instrument};

/// Width of one template wire.
pub const WIRE_BITS: usize = 128;

fn low_mask() -> U256 {
  (U256::from(1u64) << WIRE_BITS) - U256::from(1u64)
}

/// `[lower, upper]` 128-bit halves of `value`.
pub fn split_value(value: U256) -> [U256; 2] {
  [value & low_mask(), value >> WIRE_BITS]
}

/// Inverse of [`split_value`]; both halves must fit a wire.
pub fn join_halves(lower: U256, upper: U256) -> Result<U256> {
  if lower.bit_len() > WIRE_BITS || upper.bit_len() > WIRE_BITS {
    return Err(SynthError::precondition(format!(
      "halves {lower:#x} and {upper:#x} do not fit {WIRE_BITS}-bit wires"
    )));
  }
  Ok((upper << WIRE_BITS) | lower)
}

/// Normalized placements, their witness, the public instance and the copy
/// constraints of one transaction.
#[derive(Clone, Debug)]
pub struct Circuit {
  pub normalized: NormalizedCircuit,
  pub permutation: Permutation,
}

#[instrument(skip_all)]
pub fn build(output: &SynthesisOutput, catalogue: &Catalogue, evaluator: &impl WitnessEvaluator) -> Result<Circuit> {
  if output.frontend != catalogue.frontend {
    return Err(SynthError::Catalogue(format!(
      "placements were captured with {:?} but the catalogue was compiled for {:?}",
      output.frontend, catalogue.frontend
    )));
  }
  let normalized = variables::normalize(&output.placements, catalogue, evaluator)?;
  let permutation = permutation::generate(&normalized, catalogue)?;
  info!(
    placements = normalized.placements.len(),
    copy_edges = permutation.entries.len(),
    "circuit built"
  );
  Ok(Circuit {
    normalized,
    permutation,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_split_join_round_trip() {
    for value in [
      U256::ZERO,
      U256::from(12u64),
      U256::from(1u64) << 128,
      (U256::from(1u64) << 200) + U256::from(77u64),
      U256::MAX,
    ] {
      let [lower, upper] = split_value(value);
      assert!(lower.bit_len() <= WIRE_BITS && upper.bit_len() <= WIRE_BITS);
      assert_eq!(upper * (U256::from(1u64) << 128) + lower, value);
      assert_eq!(join_halves(lower, upper).unwrap(), value);
    }
  }

  #[test]
  fn test_join_rejects_wide_halves() {
    assert!(join_halves(U256::from(1u64) << 128, U256::ZERO).is_err());
  }
}
