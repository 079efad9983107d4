//! The five reserved buffers forming the circuit's external interface.
//!
//! Input buffers hold pairs of wires: an external input (sourced from the
//! buffer itself) and its twin output, which is what the rest of the circuit
//! consumes. The public output buffer is the mirror image: its inputs are
//! wires of ordinary placements and its outputs are external.

use crate::config::Subcircuit;
use crate::data_point::DataPoint;
use crate::error::{Result, SynthError};
use crate::synthesizer::state::CircuitState;
use revm::primitives::U256;
use tracing::debug;

pub const FIRST_ARITHMETIC_PLACEMENT: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferKind {
  PublicOut,
  PublicIn,
  BlockIn,
  EvmIn,
  PrivateIn,
}

impl BufferKind {
  pub const ALL: [BufferKind; 5] = [
    BufferKind::PublicOut,
    BufferKind::PublicIn,
    BufferKind::BlockIn,
    BufferKind::EvmIn,
    BufferKind::PrivateIn,
  ];

  /// Placement index of the buffer.
  pub fn index(self) -> usize {
    self as usize
  }

  pub fn from_index(index: usize) -> Option<Self> {
    Self::ALL.get(index).copied()
  }

  pub fn subcircuit(self) -> Subcircuit {
    match self {
      BufferKind::PublicOut => Subcircuit::BufferPubOut,
      BufferKind::PublicIn => Subcircuit::BufferPubIn,
      BufferKind::BlockIn => Subcircuit::BufferBlockIn,
      BufferKind::EvmIn => Subcircuit::BufferEvmIn,
      BufferKind::PrivateIn => Subcircuit::BufferPrvIn,
    }
  }

  pub fn usage(self) -> &'static str {
    match self {
      BufferKind::PublicOut => "PUBLIC_OUT",
      BufferKind::PublicIn => "PUBLIC_IN",
      BufferKind::BlockIn => "BLOCK_IN",
      BufferKind::EvmIn => "EVM_IN",
      BufferKind::PrivateIn => "PRIVATE_IN",
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireSlot {
  Fixed(usize),
  /// Appended on demand after the fixed wires.
  Dynamic,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservedDescriptor {
  pub buffer: BufferKind,
  pub slot: WireSlot,
  pub bit_size: usize,
  pub label: String,
}

/// Every named interface variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReservedVariable {
  ResMerkleRoot,
  OtherContractStorageOut,

  IniMerkleRoot,
  EddsaPublicKeyX,
  EddsaPublicKeyY,
  OtherContractStorageIn,

  Coinbase,
  Timestamp,
  Number,
  Prevrandao,
  GasLimit,
  ChainId,
  SelfBalance,
  BaseFee,
  /// Hash of the block `n` blocks before the current one, `1..=256`.
  BlockHash(u16),

  ConstOne,
  AddressMask,
  JubjubBaseX,
  JubjubBaseY,
  JubjubPoiX,
  JubjubPoiY,

  ContractAddress,
  FunctionSelector,
  TransactionNonce,
  /// Call argument `0..=8`.
  TransactionInput(u8),
  EddsaSignature,
  EddsaRandomizerX,
  EddsaRandomizerY,
  InMtIndex,
  InMptKey,
  InValue,
  MerkleProof,
}

pub const TRANSACTION_INPUTS: usize = 9;
const BLOCK_FACTS: usize = 8;
const MAX_BLOCK_HASHES: usize = 256;

impl ReservedVariable {
  pub fn descriptor(self) -> Result<ReservedDescriptor> {
    use BufferKind::*;
    use ReservedVariable as V;
    use WireSlot::*;
    let (buffer, slot, bit_size, label): (BufferKind, WireSlot, usize, String) = match self {
      V::ResMerkleRoot => (PublicOut, Dynamic, 255, "Resulting Merkle root".into()),
      V::OtherContractStorageOut => (PublicOut, Dynamic, 256, "Storage write to another contract".into()),
      V::IniMerkleRoot => (PublicIn, Fixed(0), 255, "Initial Merkle root".into()),
      V::EddsaPublicKeyX => (PublicIn, Fixed(1), 255, "EdDSA public key (x)".into()),
      V::EddsaPublicKeyY => (PublicIn, Fixed(2), 255, "EdDSA public key (y)".into()),
      V::OtherContractStorageIn => (PublicIn, Dynamic, 256, "Storage read from another contract".into()),
      V::Coinbase => (BlockIn, Fixed(0), 256, "Block coinbase".into()),
      V::Timestamp => (BlockIn, Fixed(1), 256, "Block timestamp".into()),
      V::Number => (BlockIn, Fixed(2), 256, "Block number".into()),
      V::Prevrandao => (BlockIn, Fixed(3), 256, "Block prevrandao".into()),
      V::GasLimit => (BlockIn, Fixed(4), 256, "Block gas limit".into()),
      V::ChainId => (BlockIn, Fixed(5), 256, "Chain id".into()),
      V::SelfBalance => (BlockIn, Fixed(6), 256, "Contract balance".into()),
      V::BaseFee => (BlockIn, Fixed(7), 256, "Block base fee".into()),
      V::BlockHash(n) if !(1..=MAX_BLOCK_HASHES as u16).contains(&n) => {
        return Err(SynthError::precondition(format!(
          "block hash {n} blocks ago is outside 1..={MAX_BLOCK_HASHES}"
        )));
      }
      V::BlockHash(n) => (
        BlockIn,
        Fixed(BLOCK_FACTS + n as usize - 1),
        256,
        format!("Block hash {n} blocks ago"),
      ),
      V::ConstOne => (EvmIn, Fixed(0), 1, "Constant one".into()),
      V::AddressMask => (EvmIn, Fixed(1), 160, "Address mask".into()),
      V::JubjubBaseX => (EvmIn, Fixed(2), 255, "Jubjub base point (x)".into()),
      V::JubjubBaseY => (EvmIn, Fixed(3), 255, "Jubjub base point (y)".into()),
      V::JubjubPoiX => (EvmIn, Fixed(4), 255, "Jubjub point at infinity (x)".into()),
      V::JubjubPoiY => (EvmIn, Fixed(5), 255, "Jubjub point at infinity (y)".into()),
      V::ContractAddress => (PrivateIn, Fixed(0), 160, "Contract address".into()),
      V::FunctionSelector => (PrivateIn, Fixed(1), 255, "Function selector".into()),
      V::TransactionNonce => (PrivateIn, Fixed(2), 255, "Transaction nonce".into()),
      V::TransactionInput(i) => (PrivateIn, Fixed(3 + i as usize), 255, format!("Transaction input {i}")),
      V::EddsaSignature => (PrivateIn, Fixed(12), 255, "EdDSA signature scalar".into()),
      V::EddsaRandomizerX => (PrivateIn, Fixed(13), 255, "EdDSA randomizer (x)".into()),
      V::EddsaRandomizerY => (PrivateIn, Fixed(14), 255, "EdDSA randomizer (y)".into()),
      V::InMtIndex => (PrivateIn, Dynamic, 255, "Merkle leaf index".into()),
      V::InMptKey => (PrivateIn, Dynamic, 255, "Registered storage key".into()),
      V::InValue => (PrivateIn, Dynamic, 255, "Initial storage value".into()),
      V::MerkleProof => (PrivateIn, Dynamic, 255, "Merkle proof node".into()),
    };
    Ok(ReservedDescriptor {
      buffer,
      slot,
      bit_size,
      label,
    })
  }

  /// Fixed wires of an input buffer, in wire order.
  pub fn fixed_layout(buffer: BufferKind, n_prev_block_hashes: usize) -> Vec<ReservedVariable> {
    use ReservedVariable as V;
    match buffer {
      BufferKind::PublicOut => Vec::new(),
      BufferKind::PublicIn => vec![V::IniMerkleRoot, V::EddsaPublicKeyX, V::EddsaPublicKeyY],
      BufferKind::BlockIn => [
        V::Coinbase,
        V::Timestamp,
        V::Number,
        V::Prevrandao,
        V::GasLimit,
        V::ChainId,
        V::SelfBalance,
        V::BaseFee,
      ]
      .into_iter()
      .chain((1..=n_prev_block_hashes as u16).map(V::BlockHash))
      .collect(),
      BufferKind::EvmIn => vec![
        V::ConstOne,
        V::AddressMask,
        V::JubjubBaseX,
        V::JubjubBaseY,
        V::JubjubPoiX,
        V::JubjubPoiY,
      ],
      BufferKind::PrivateIn => [V::ContractAddress, V::FunctionSelector, V::TransactionNonce]
        .into_iter()
        .chain((0..TRANSACTION_INPUTS as u8).map(V::TransactionInput))
        .chain([V::EddsaSignature, V::EddsaRandomizerX, V::EddsaRandomizerY])
        .collect(),
    }
  }
}

// ============================================================
// Buffer manager
// ============================================================

impl CircuitState {
  /// Populate every fixed input wire, in wire order, then check the layout.
  pub fn init_buffers(&mut self, mut resolve: impl FnMut(ReservedVariable) -> Result<U256>) -> Result<()> {
    for buffer in BufferKind::ALL {
      for variable in ReservedVariable::fixed_layout(buffer, self.frontend.n_prev_block_hashes) {
        let value = resolve(variable)?;
        self.add_reserved_input(variable, value)?;
      }
    }
    self.verify_buffers()?;
    debug!(
      evm_in = self.placements[BufferKind::EvmIn.index()].outputs.len(),
      private_in = self.placements[BufferKind::PrivateIn.index()].outputs.len(),
      "reserved buffers initialized"
    );
    Ok(())
  }

  /// No skipped wires, and matching input and output counts.
  pub fn verify_buffers(&self) -> Result<()> {
    for buffer in BufferKind::ALL {
      let placement = &self.placements[buffer.index()];
      if placement.inputs.len() != placement.outputs.len() {
        return Err(SynthError::referential(format!(
          "{} has {} inputs but {} outputs",
          buffer.usage(),
          placement.inputs.len(),
          placement.outputs.len()
        )));
      }
      for (wire, output) in placement.outputs.iter().enumerate() {
        if output.source != buffer.index() || output.wire_index != wire {
          return Err(SynthError::referential(format!(
            "{} output {wire} is mislabelled as ({}, {})",
            buffer.usage(),
            output.source,
            output.wire_index
          )));
        }
      }
      if buffer != BufferKind::PublicOut {
        for (wire, input) in placement.inputs.iter().enumerate() {
          if input.source != buffer.index() || input.wire_index != wire {
            return Err(SynthError::referential(format!(
              "{} input {wire} was skipped or misplaced",
              buffer.usage()
            )));
          }
        }
      }
    }
    Ok(())
  }

  fn next_wire(&self, buffer: BufferKind, slot: WireSlot, name: &str) -> Result<usize> {
    let placement = &self.placements[buffer.index()];
    let wire = placement.outputs.len();
    if placement.inputs.len() != wire {
      return Err(SynthError::referential(format!(
        "{} is unbalanced before adding {name}",
        buffer.usage()
      )));
    }
    if let WireSlot::Fixed(expected) = slot
      && expected != wire
    {
      return Err(SynthError::referential(format!(
        "{name} belongs at wire {expected} of {} but the next wire is {wire}",
        buffer.usage()
      )));
    }
    Ok(wire)
  }

  /// Add an external input and return its twin output.
  pub fn add_reserved_input(&mut self, variable: ReservedVariable, value: U256) -> Result<DataPoint> {
    let descriptor = variable.descriptor()?;
    if descriptor.buffer == BufferKind::PublicOut {
      return Err(SynthError::precondition(format!("{variable:?} is an output variable")));
    }
    self.push_buffer_input(descriptor, &format!("{variable:?}"), value)
  }

  fn push_buffer_input(
    &mut self,
    descriptor: ReservedDescriptor,
    name: &str,
    value: U256,
  ) -> Result<DataPoint> {
    let buffer = descriptor.buffer;
    let wire = self.next_wire(buffer, descriptor.slot, name)?;
    let point = DataPoint::new(buffer.index(), wire, descriptor.bit_size, value)?
      .with_ext_source(descriptor.label);
    let placement = self.buffer_mut(buffer);
    placement.inputs.push(point.clone());
    placement.outputs.push(point.clone());
    Ok(point)
  }

  /// Route `symbol` out of the circuit through the public output buffer.
  pub fn add_reserved_output(&mut self, variable: ReservedVariable, symbol: &DataPoint) -> Result<DataPoint> {
    let descriptor = variable.descriptor()?;
    if descriptor.buffer != BufferKind::PublicOut {
      return Err(SynthError::precondition(format!("{variable:?} is an input variable")));
    }
    self.check_inputs_exist(std::slice::from_ref(symbol))?;
    let wire = self.next_wire(BufferKind::PublicOut, descriptor.slot, &format!("{variable:?}"))?;
    let external = DataPoint::new(BufferKind::PublicOut.index(), wire, descriptor.bit_size, symbol.value)?
      .with_ext_dest(descriptor.label.clone());
    let placement = self.buffer_mut(BufferKind::PublicOut);
    placement.inputs.push(symbol.clone().with_ext_dest(descriptor.label));
    placement.outputs.push(external.clone());
    Ok(external)
  }

  /// The circuit-side wire of a fixed input variable.
  pub fn reserved(&self, variable: ReservedVariable) -> Result<DataPoint> {
    let descriptor = variable.descriptor()?;
    let WireSlot::Fixed(wire) = descriptor.slot else {
      return Err(SynthError::precondition(format!("{variable:?} has no fixed wire")));
    };
    let buffer = descriptor.buffer.index();
    let point = self.placements[buffer].outputs.get(wire).ok_or_else(|| {
      SynthError::referential(format!("{variable:?} was never loaded into its buffer"))
    })?;
    if point.source != buffer || point.wire_index != wire {
      return Err(SynthError::referential(format!("{variable:?} wire is corrupted")));
    }
    Ok(point.clone())
  }

  /// Load a constant through the EVM input buffer under its own label.
  ///
  /// Labelled loads always get a fresh wire so the public instance keeps
  /// their description. Unlabelled loads are deduplicated by value.
  pub fn load_static(&mut self, value: U256, bit_size: usize, label: Option<String>) -> Result<DataPoint> {
    match label {
      Some(label) => {
        let point = self.push_static(value, bit_size, label)?;
        self.static_cache.entry((value, bit_size)).or_insert_with(|| point.clone());
        Ok(point)
      }
      None => self.load_shared_static(value, bit_size, "Arbitrary constant"),
    }
  }

  /// Load a constant, reusing any earlier wire with the same value and width.
  /// `label` only describes the wire if this call creates it.
  pub fn load_shared_static(&mut self, value: U256, bit_size: usize, label: &str) -> Result<DataPoint> {
    if let Some(cached) = self.static_cache.get(&(value, bit_size)) {
      return Ok(cached.clone());
    }
    let point = self.push_static(value, bit_size, label.to_string())?;
    self.static_cache.insert((value, bit_size), point.clone());
    Ok(point)
  }

  fn push_static(&mut self, value: U256, bit_size: usize, label: String) -> Result<DataPoint> {
    let descriptor = ReservedDescriptor {
      buffer: BufferKind::EvmIn,
      slot: WireSlot::Dynamic,
      bit_size,
      label,
    };
    self.push_buffer_input(descriptor, "static constant", value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::FrontendConfig;

  fn state() -> CircuitState {
    let frontend = FrontendConfig {
      n_prev_block_hashes: 2,
      ..FrontendConfig::default()
    };
    let mut state = CircuitState::new(frontend);
    state
      .init_buffers(|variable| {
        Ok(match variable {
          ReservedVariable::ConstOne => U256::from(1u64),
          ReservedVariable::BlockHash(n) => U256::from(1000u64 + n as u64),
          _ => U256::from(3u64),
        })
      })
      .unwrap();
    state
  }

  #[test]
  fn test_fixed_wires_follow_descriptor() {
    let state = state();
    let hash = state.reserved(ReservedVariable::BlockHash(2)).unwrap();
    assert_eq!(hash.source, BufferKind::BlockIn.index());
    assert_eq!(hash.wire_index, 9);
    assert_eq!(hash.value, U256::from(1002u64));
    assert_eq!(hash.ext_source.as_deref(), Some("Block hash 2 blocks ago"));
    let one = state.reserved(ReservedVariable::ConstOne).unwrap();
    assert_eq!((one.wire_index, one.bit_size), (0, 1));
  }

  #[test]
  fn test_dynamic_inputs_append_balanced_pairs() {
    let mut state = state();
    let before = state.placements()[BufferKind::PrivateIn.index()].outputs.len();
    let proof = state.add_reserved_input(ReservedVariable::MerkleProof, U256::from(9u64)).unwrap();
    assert_eq!(proof.wire_index, before);
    state.verify_buffers().unwrap();
    assert!(state.reserved(ReservedVariable::MerkleProof).is_err());
  }

  #[test]
  fn test_unlabelled_statics_are_cached() {
    let mut state = state();
    let a = state.load_static(U256::from(42u64), 256, None).unwrap();
    let b = state.load_static(U256::from(42u64), 256, None).unwrap();
    assert_eq!(a, b);
    let c = state.load_static(U256::from(42u64), 256, Some("PUSH1 at pc 0".into())).unwrap();
    assert_ne!(a.wire_index, c.wire_index);
    assert_eq!(c.ext_source.as_deref(), Some("PUSH1 at pc 0"));
  }

  #[test]
  fn test_public_output_mirrors_symbol() {
    let mut state = state();
    let root = state.reserved(ReservedVariable::IniMerkleRoot).unwrap();
    let out = state.add_reserved_output(ReservedVariable::ResMerkleRoot, &root).unwrap();
    let buffer = &state.placements()[BufferKind::PublicOut.index()];
    assert_eq!(buffer.inputs[0].source, BufferKind::PublicIn.index());
    assert_eq!(out.source, BufferKind::PublicOut.index());
    assert_eq!(out.ext_dest.as_deref(), Some("Resulting Merkle root"));
    assert!(state.add_reserved_input(ReservedVariable::ResMerkleRoot, U256::ZERO).is_err());
  }

  #[test]
  fn test_out_of_order_fixed_wire_is_rejected() {
    let mut state = CircuitState::new(FrontendConfig::default());
    let err = state.add_reserved_input(ReservedVariable::EddsaPublicKeyX, U256::ZERO).unwrap_err();
    assert!(matches!(err, SynthError::Referential(_)));
  }

  #[test]
  fn test_block_hash_distance_bounds() {
    let state = state();
    for n in [0, 257] {
      let err = state.reserved(ReservedVariable::BlockHash(n)).unwrap_err();
      assert!(matches!(err, SynthError::Precondition(_)), "{err}");
    }
    let first = ReservedVariable::BlockHash(1).descriptor().unwrap();
    assert_eq!(first.slot, WireSlot::Fixed(8));
  }
}
