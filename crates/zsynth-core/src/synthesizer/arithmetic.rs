//! Arithmetic manager: operator placements and the multi-placement protocols
//! built on top of them.

use super::state::CircuitState;
use crate::arith::{ArithOp, ops};
use crate::buffer::ReservedVariable;
use crate::crypto::{merkle, poseidon};
use crate::data_point::{DataPoint, Placement};
use crate::error::{Result, SynthError};
use revm::primitives::U256;
use tracing::debug;

/// A Jubjub point as a pair of coordinate wires.
pub type PointPt = (DataPoint, DataPoint);

const POSEIDON_RATE: usize = poseidon::RATE;
const POSEIDON_2X_INPUTS: usize = POSEIDON_RATE * POSEIDON_RATE;
const MAX_MERKLE_BATCH: usize = 3;

impl CircuitState {
  /// Append one operator placement and return its output wires.
  pub fn place_arith(&mut self, op: ArithOp, inputs: &[DataPoint]) -> Result<Vec<DataPoint>> {
    if op.has_byte_sized_first_operand()
      && let Some(first) = inputs.first()
      && first.value > U256::from(255u64)
    {
      return Err(SynthError::precondition(format!(
        "{} operand {:#x} exceeds 255",
        op.usage(),
        first.value
      )));
    }
    let values: Vec<U256> = inputs.iter().map(|input| input.value).collect();
    let outputs = ops::evaluate(op, &values)?;

    let mut placement = Placement::new(op.subcircuit(), op.usage());
    if let Some(selector) = op.selector() {
      let selector_pt = self.load_shared_static(selector, 128, &format!("Selector of {}", op.usage()))?;
      placement.inputs.push(selector_pt);
    }
    placement.inputs.extend_from_slice(inputs);
    self.push_placement(placement, &outputs, op.output_bit_size())
  }

  /// Convenience for single-output operators.
  pub fn place_arith_single(&mut self, op: ArithOp, inputs: &[DataPoint]) -> Result<DataPoint> {
    self
      .place_arith(op, inputs)?
      .into_iter()
      .next()
      .ok_or_else(|| SynthError::referential(format!("{} produced no output", op.usage())))
  }

  /// Fold `inputs` down to a single Poseidon digest.
  pub fn place_poseidon(&mut self, inputs: &[DataPoint]) -> Result<DataPoint> {
    let mut level = inputs.to_vec();
    if level.is_empty() {
      level.push(self.poseidon_padding()?);
    }
    loop {
      level = if level.len() % POSEIDON_2X_INPUTS == 0 {
        level
          .chunks(POSEIDON_2X_INPUTS)
          .map(|chunk| self.place_arith_single(ArithOp::Poseidon2xCompress, chunk))
          .collect::<Result<Vec<_>>>()?
      } else {
        while level.len() % POSEIDON_RATE != 0 {
          level.push(self.poseidon_padding()?);
        }
        level
          .chunks(POSEIDON_RATE)
          .map(|chunk| self.place_arith_single(ArithOp::Poseidon, chunk))
          .collect::<Result<Vec<_>>>()?
      };
      if level.len() == 1 {
        return level
          .pop()
          .ok_or_else(|| SynthError::referential("empty Poseidon level"));
      }
    }
  }

  fn poseidon_padding(&mut self) -> Result<DataPoint> {
    self.load_shared_static(U256::ZERO, 255, "Poseidon padding")
  }

  /// `base ** exponent` via bit decomposition and batched square-and-multiply.
  pub fn place_exp(&mut self, base: &DataPoint, exponent: &DataPoint) -> Result<DataPoint> {
    let bits = self.place_arith(ArithOp::DecToBit, std::slice::from_ref(exponent))?;
    let mut acc = self.load_shared_static(U256::from(1u64), 256, "Exponentiation seed")?;
    let mut power = base.clone();
    for chunk in bits.chunks(self.frontend.arith_exp_batch_size) {
      let mut inputs = vec![acc, power];
      inputs.extend_from_slice(chunk);
      let mut outputs = self.place_arith(ArithOp::SubExpBatch, &inputs)?.into_iter();
      let (Some(next_acc), Some(next_power)) = (outputs.next(), outputs.next()) else {
        return Err(SynthError::referential("SubExpBatch produced fewer than two outputs"));
      };
      acc = next_acc;
      power = next_power;
    }
    Ok(acc)
  }

  /// Scalar multiplication of `point` by the LSB-first `bits`.
  pub fn place_jubjub_exp(&mut self, point: &PointPt, bits: &[DataPoint]) -> Result<PointPt> {
    let mut acc = (
      self.reserved(ReservedVariable::JubjubPoiX)?,
      self.reserved(ReservedVariable::JubjubPoiY)?,
    );
    let mut base = point.clone();
    for chunk in bits.chunks(self.frontend.jubjub_exp_batch_size) {
      let mut inputs = vec![acc.0, acc.1, base.0, base.1];
      inputs.extend_from_slice(chunk);
      let outputs = self.place_arith(ArithOp::JubjubExpBatch, &inputs)?;
      let [ax, ay, bx, by]: [DataPoint; 4] = outputs
        .try_into()
        .map_err(|_| SynthError::referential("JubjubExpBatch must produce four outputs"))?;
      acc = (ax, ay);
      base = (bx, by);
    }
    Ok(acc)
  }

  /// Authenticate `leaf` at `index` against `root` along `siblings`, one
  /// entry per tree level from the leaf up.
  pub fn place_merkle_verification(
    &mut self,
    index: &DataPoint,
    leaf: &DataPoint,
    siblings: &[[U256; 3]],
    root: &DataPoint,
  ) -> Result<()> {
    if siblings.len() != self.frontend.mt_depth {
      return Err(SynthError::precondition(format!(
        "Merkle path has {} levels, tree depth is {}",
        siblings.len(),
        self.frontend.mt_depth
      )));
    }
    let mut child_index = index.clone();
    let mut child = leaf.clone();
    let mut consumed = 0;
    while consumed < siblings.len() {
      let batch = MAX_MERKLE_BATCH.min(siblings.len() - consumed);
      let levels = &siblings[consumed..consumed + batch];
      let op = ArithOp::merkle_for_levels(batch)
        .ok_or_else(|| SynthError::precondition(format!("no Merkle template for {batch} levels")))?;

      let mut inputs = vec![child_index, child];
      for sibling in levels.iter().flatten() {
        inputs.push(self.add_reserved_input(ReservedVariable::MerkleProof, *sibling)?);
      }
      consumed += batch;
      let (parent_index, parent) = if consumed == siblings.len() {
        (self.load_shared_static(U256::ZERO, 255, "Merkle root index")?, root.clone())
      } else {
        let (index_value, node_value) = merkle::climb(inputs[0].value, inputs[1].value, levels)?;
        (
          self.add_reserved_input(ReservedVariable::MerkleProof, index_value)?,
          self.add_reserved_input(ReservedVariable::MerkleProof, node_value)?,
        )
      };
      inputs.push(parent_index.clone());
      inputs.push(parent.clone());
      self.place_arith(op, &inputs)?;
      child_index = parent_index;
      child = parent;
    }
    Ok(())
  }

  /// Verify the transaction signature in-circuit and derive the sender.
  ///
  /// The challenge hashes the randomizer, the public key and the twelve
  /// message words. `s·G == R + e·A` is checked by EdDsaVerify, and the origin
  /// is the masked Poseidon digest of the public key.
  pub fn place_origin(&mut self) -> Result<DataPoint> {
    use ReservedVariable as V;
    let randomizer = (self.reserved(V::EddsaRandomizerX)?, self.reserved(V::EddsaRandomizerY)?);
    let public_key = (self.reserved(V::EddsaPublicKeyX)?, self.reserved(V::EddsaPublicKeyY)?);
    let mut challenge_inputs = vec![
      randomizer.0.clone(),
      randomizer.1.clone(),
      public_key.0.clone(),
      public_key.1.clone(),
      self.reserved(V::TransactionNonce)?,
      self.reserved(V::ContractAddress)?,
      self.reserved(V::FunctionSelector)?,
    ];
    for i in 0..crate::buffer::TRANSACTION_INPUTS as u8 {
      challenge_inputs.push(self.reserved(V::TransactionInput(i))?);
    }
    let challenge = self.place_poseidon(&challenge_inputs)?;

    let signature = self.reserved(V::EddsaSignature)?;
    let s_bits = self.place_arith(ArithOp::DecToBit, &[signature])?;
    let e_bits = self.place_arith(ArithOp::DecToBit, &[challenge])?;
    let generator = (self.reserved(V::JubjubBaseX)?, self.reserved(V::JubjubBaseY)?);
    let s_g = self.place_jubjub_exp(&generator, &s_bits)?;
    let e_a = self.place_jubjub_exp(&public_key, &e_bits)?;
    self.place_arith(
      ArithOp::EdDsaVerify,
      &[s_g.0, s_g.1, randomizer.0, randomizer.1, e_a.0, e_a.1],
    )?;

    let key_hash = self.place_poseidon(&[public_key.0, public_key.1])?;
    let mask = self.reserved(V::AddressMask)?;
    let origin = self.place_arith_single(ArithOp::And, &[key_hash, mask])?;
    debug!(origin = %format!("{:#x}", origin.value), "sender recovered from signature");
    Ok(origin)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::buffer::BufferKind;
  use crate::config::FrontendConfig;
  use crate::crypto::merkle::MerkleTree;

  fn state() -> CircuitState {
    CircuitState::new(FrontendConfig::default())
  }

  fn input(state: &mut CircuitState, v: U256) -> DataPoint {
    state.load_static(v, 256, Some("test input".into())).unwrap()
  }

  #[test]
  fn test_add_placement_prepends_selector() {
    let mut state = state();
    let a = input(&mut state, U256::from(5u64));
    let b = input(&mut state, U256::from(7u64));
    let out = state.place_arith(ArithOp::Add, &[a.clone(), b.clone()]).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].value, U256::from(12u64));
    let placement = state.placements().last().unwrap();
    assert_eq!(placement.usage, "ADD");
    assert_eq!(placement.inputs.len(), 3);
    assert_eq!(placement.inputs[0].value, U256::from(2u64));
    assert_eq!(placement.inputs[0].source, BufferKind::EvmIn.index());
    assert_eq!(placement.inputs[1], a);
    assert_eq!(placement.inputs[2], b);
  }

  #[test]
  fn test_shift_operand_above_255_is_rejected() {
    let mut state = state();
    let shift = input(&mut state, U256::from(256u64));
    let value = input(&mut state, U256::from(1u64));
    let err = state.place_arith(ArithOp::Shl, &[shift, value]).unwrap_err();
    assert!(matches!(err, SynthError::Precondition(_)));
  }

  #[test]
  fn test_dangling_input_is_referential() {
    let mut state = state();
    let ghost = DataPoint::new(42, 0, 256, U256::from(1u64)).unwrap();
    let other = input(&mut state, U256::from(1u64));
    let err = state.place_arith(ArithOp::Add, &[ghost, other]).unwrap_err();
    assert!(matches!(err, SynthError::Referential(_)));
  }

  #[test]
  fn test_poseidon_matches_native_fold() {
    for n in [1usize, 2, 4, 5, 16, 17] {
      let mut state = state();
      let values: Vec<U256> = (0..n as u64).map(|v| U256::from(v + 3)).collect();
      let inputs: Vec<DataPoint> = values.iter().map(|v| input(&mut state, *v)).collect();
      let digest = state.place_poseidon(&inputs).unwrap();
      assert_eq!(digest.value, poseidon::poseidon_fold(&values).unwrap(), "n = {n}");
    }
  }

  #[test]
  fn test_sixteen_inputs_use_one_compress_placement() {
    let mut state = state();
    let inputs: Vec<DataPoint> = (0..16u64).map(|v| input(&mut state, U256::from(v))).collect();
    let before = state.placements().len();
    state.place_poseidon(&inputs).unwrap();
    assert_eq!(state.placements().len(), before + 1);
    assert_eq!(state.placements().last().unwrap().usage, "Poseidon2xCompress");
  }

  #[test]
  fn test_exp_chain() {
    let mut state = state();
    let base = input(&mut state, U256::from(3u64));
    let exponent = input(&mut state, U256::from(13u64));
    let result = state.place_exp(&base, &exponent).unwrap();
    assert_eq!(result.value, U256::from(3u64).pow(U256::from(13u64)));
    let batches = state
      .placements()
      .iter()
      .filter(|p| p.usage == "SubExpBatch")
      .count();
    assert_eq!(batches, 256 / FrontendConfig::default().arith_exp_batch_size);
  }

  #[test]
  fn test_merkle_verification_batches() {
    for depth in [1usize, 2, 4, 5] {
      let frontend = FrontendConfig {
        mt_depth: depth,
        ..FrontendConfig::default()
      };
      let mut state = CircuitState::new(frontend);
      let leaves: Vec<U256> = (0..4usize.pow(depth as u32)).map(|i| U256::from(i as u64 * 11)).collect();
      let tree = MerkleTree::new(depth, leaves).unwrap();
      let proof = tree.proof(2).unwrap();
      let root = state
        .add_reserved_input(ReservedVariable::OtherContractStorageIn, tree.root())
        .unwrap();
      let index = state.add_reserved_input(ReservedVariable::InMtIndex, U256::from(2u64)).unwrap();
      let leaf = state.add_reserved_input(ReservedVariable::InValue, proof.leaf).unwrap();
      state
        .place_merkle_verification(&index, &leaf, &proof.siblings, &root)
        .unwrap();
      let usages: Vec<&str> = state.placements()[5..].iter().map(|p| p.usage.as_str()).collect();
      let expected: Vec<&str> = match depth {
        1 => vec!["VerifyMerkleProof"],
        2 => vec!["VerifyMerkleProof2x"],
        4 => vec!["VerifyMerkleProof3x", "VerifyMerkleProof"],
        _ => vec!["VerifyMerkleProof3x", "VerifyMerkleProof2x"],
      };
      assert_eq!(usages, expected, "depth {depth}");
    }
  }

  #[test]
  fn test_merkle_verification_rejects_mutated_sibling() {
    let mut state = state();
    let leaves: Vec<U256> = (0..16u64).map(U256::from).collect();
    let tree = MerkleTree::new(2, leaves).unwrap();
    let mut proof = tree.proof(5).unwrap();
    proof.siblings[1][2] ^= U256::from(1u64);
    let root = state
      .add_reserved_input(ReservedVariable::OtherContractStorageIn, tree.root())
      .unwrap();
    let index = state.add_reserved_input(ReservedVariable::InMtIndex, U256::from(5u64)).unwrap();
    let leaf = state.add_reserved_input(ReservedVariable::InValue, proof.leaf).unwrap();
    let err = state
      .place_merkle_verification(&index, &leaf, &proof.siblings, &root)
      .unwrap_err();
    assert!(matches!(err, SynthError::Precondition(_)));
  }
}
