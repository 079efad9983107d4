//! Per-template witness evaluation.
//!
//! A template instance is evaluated from its padded input wires alone. The
//! returned vector is the template's full local assignment: wire 0 is the
//! constant one, followed by the outputs, the inputs and any internals.

use super::{join_halves, split_value};
use crate::arith::{ArithOp, ops};
use crate::config::{Subcircuit, SubcircuitInfo};
use crate::error::{Result, SynthError};
use itertools::Itertools;
use revm::primitives::U256;

pub trait WitnessEvaluator: Sync {
  fn evaluate(&self, template: &SubcircuitInfo, inputs: &[U256]) -> Result<Vec<U256>>;
}

/// Evaluates every template with the native operator semantics. Its
/// assignments carry no internal wires, matching [`Catalogue::synthetic`].
///
/// [`Catalogue::synthetic`]: crate::config::Catalogue::synthetic
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeEvaluator;

impl WitnessEvaluator for NativeEvaluator {
  fn evaluate(&self, template: &SubcircuitInfo, inputs: &[U256]) -> Result<Vec<U256>> {
    let kind = template.kind()?;
    if inputs.len() != template.n_in() {
      return Err(SynthError::precondition(format!(
        "{} takes {} input wires, got {}",
        template.name,
        template.n_in(),
        inputs.len()
      )));
    }
    let outputs = if kind.is_buffer() {
      inputs.to_vec()
    } else {
      evaluate_operator(kind, inputs)?
    };
    if outputs.len() > template.n_out() {
      return Err(SynthError::precondition(format!(
        "{} produced {} output wires, the template has {}",
        template.name,
        outputs.len(),
        template.n_out()
      )));
    }

    let mut variables = vec![U256::ZERO; template.n_wires];
    variables[0] = U256::from(1u64);
    for (j, value) in outputs.into_iter().enumerate() {
      variables[template.output_local(j)] = value;
    }
    for (j, value) in inputs.iter().enumerate() {
      variables[template.input_local(j)] = *value;
    }
    Ok(variables)
  }
}

/// Joins consecutive `[lower, upper]` wire pairs.
fn join_pairs(wires: &[U256]) -> Result<Vec<U256>> {
  if wires.len() % 2 != 0 {
    return Err(SynthError::precondition(format!(
      "{} wires cannot be joined into pairs",
      wires.len()
    )));
  }
  wires.iter().copied().tuples().map(|(lower, upper)| join_halves(lower, upper)).collect()
}

/// `split` leading wire pairs followed by single-wire bits.
fn pairs_then_bits(inputs: &[U256], split: usize) -> Result<Vec<U256>> {
  if inputs.len() < 2 * split {
    return Err(SynthError::precondition(format!(
      "expected at least {} input wires, got {}",
      2 * split,
      inputs.len()
    )));
  }
  let (pairs, bits) = inputs.split_at(2 * split);
  let mut operands = join_pairs(pairs)?;
  operands.extend_from_slice(bits);
  Ok(operands)
}

fn alu_arity(op: ArithOp) -> usize {
  match op {
    ArithOp::Not | ArithOp::IsZero => 1,
    ArithOp::AddMod | ArithOp::MulMod => 3,
    _ => 2,
  }
}

fn evaluate_operator(kind: Subcircuit, inputs: &[U256]) -> Result<Vec<U256>> {
  use Subcircuit as S;
  let (op, operands) = match kind {
    S::Alu1 | S::Alu2 | S::Alu3 | S::Alu4 | S::Alu5 => {
      let (selector, rest) = inputs
        .split_first()
        .ok_or_else(|| SynthError::precondition(format!("{} needs a selector wire", kind.name())))?;
      let op = ArithOp::from_selector(kind, *selector).ok_or_else(|| {
        SynthError::precondition(format!("{} has no operator with selector {selector:#x}", kind.name()))
      })?;
      let mut operands = join_pairs(rest)?;
      operands.truncate(alu_arity(op));
      (op, operands)
    }
    S::And => (ArithOp::And, join_pairs(inputs)?),
    S::Or => (ArithOp::Or, join_pairs(inputs)?),
    S::Xor => (ArithOp::Xor, join_pairs(inputs)?),
    S::DecToBit => (ArithOp::DecToBit, join_pairs(inputs)?),
    S::SubExpBatch => (ArithOp::SubExpBatch, pairs_then_bits(inputs, 2)?),
    S::JubjubExpBatch => (ArithOp::JubjubExpBatch, pairs_then_bits(inputs, 4)?),
    S::Accumulator => (ArithOp::Accumulator, join_pairs(inputs)?),
    S::Poseidon => (ArithOp::Poseidon, join_pairs(inputs)?),
    S::Poseidon2xCompress => (ArithOp::Poseidon2xCompress, join_pairs(inputs)?),
    S::EdDsaVerify => (ArithOp::EdDsaVerify, join_pairs(inputs)?),
    S::VerifyMerkleProof => (ArithOp::VerifyMerkleProof, join_pairs(inputs)?),
    S::VerifyMerkleProof2x => (ArithOp::VerifyMerkleProof2x, join_pairs(inputs)?),
    S::VerifyMerkleProof3x => (ArithOp::VerifyMerkleProof3x, join_pairs(inputs)?),
    S::BufferPubOut | S::BufferPubIn | S::BufferBlockIn | S::BufferEvmIn | S::BufferPrvIn => {
      return Err(SynthError::precondition(format!("{} is not an operator", kind.name())));
    }
  };
  let outputs = ops::evaluate(op, &operands)?;
  // bits stay single wires
  if op == ArithOp::DecToBit {
    return Ok(outputs);
  }
  Ok(outputs.into_iter().flat_map(split_value).collect())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{BufferCapacity, Catalogue, FrontendConfig};

  fn catalogue() -> Catalogue {
    Catalogue::synthetic(FrontendConfig::default(), BufferCapacity::default()).unwrap()
  }

  fn pair(v: U256) -> [U256; 2] {
    split_value(v)
  }

  #[test]
  fn test_alu_selector_picks_operator() {
    let catalogue = catalogue();
    let alu1 = catalogue.info(Subcircuit::Alu1).unwrap();
    let mut inputs = vec![ArithOp::Add.selector().unwrap()];
    inputs.extend(pair(U256::from(5u64)));
    inputs.extend(pair(U256::from(7u64)));
    let variables = NativeEvaluator.evaluate(alu1, &inputs).unwrap();
    assert_eq!(variables.len(), alu1.n_wires);
    assert_eq!(variables[0], U256::from(1u64));
    assert_eq!(variables[alu1.output_local(0)], U256::from(12u64));
    assert_eq!(variables[alu1.output_local(1)], U256::ZERO);
    assert_eq!(variables[alu1.input_local(1)], U256::from(5u64));
  }

  #[test]
  fn test_unary_alu_ignores_padding() {
    let catalogue = catalogue();
    let alu1 = catalogue.info(Subcircuit::Alu1).unwrap();
    let mut inputs = vec![ArithOp::Not.selector().unwrap()];
    inputs.extend(pair(U256::ZERO));
    inputs.extend([U256::ZERO, U256::ZERO]);
    let variables = NativeEvaluator.evaluate(alu1, &inputs).unwrap();
    let out = join_halves(variables[alu1.output_local(0)], variables[alu1.output_local(1)]).unwrap();
    assert_eq!(out, U256::MAX);
  }

  #[test]
  fn test_dec_to_bit_outputs_single_wires() {
    let catalogue = catalogue();
    let template = catalogue.info(Subcircuit::DecToBit).unwrap();
    let value = (U256::from(1u64) << 200) | U256::from(5u64);
    let variables = NativeEvaluator.evaluate(template, &pair(value)).unwrap();
    let bits: Vec<U256> = (0..256).map(|i| variables[template.output_local(i)]).collect();
    assert_eq!(bits[0], U256::from(1u64));
    assert_eq!(bits[1], U256::ZERO);
    assert_eq!(bits[2], U256::from(1u64));
    assert_eq!(bits[200], U256::from(1u64));
    assert_eq!(bits.iter().filter(|b| !b.is_zero()).count(), 3);
  }

  #[test]
  fn test_buffer_outputs_mirror_inputs() {
    let catalogue = catalogue();
    let template = catalogue.info(Subcircuit::BufferEvmIn).unwrap();
    let mut inputs = vec![U256::ZERO; template.n_in()];
    inputs[0] = U256::from(1u64);
    inputs[3] = U256::from(99u64);
    let variables = NativeEvaluator.evaluate(template, &inputs).unwrap();
    assert_eq!(variables[template.output_local(3)], U256::from(99u64));
    assert_eq!(variables[template.input_local(3)], U256::from(99u64));
  }

  #[test]
  fn test_wrong_input_count_is_rejected() {
    let catalogue = catalogue();
    let template = catalogue.info(Subcircuit::And).unwrap();
    assert!(NativeEvaluator.evaluate(template, &[U256::ZERO]).is_err());
  }

  #[test]
  fn test_unknown_selector_is_rejected() {
    let catalogue = catalogue();
    let template = catalogue.info(Subcircuit::Alu2).unwrap();
    let mut inputs = vec![ArithOp::Add.selector().unwrap()];
    inputs.resize(template.n_in(), U256::ZERO);
    assert!(matches!(
      NativeEvaluator.evaluate(template, &inputs),
      Err(SynthError::Precondition(_))
    ));
  }
}
