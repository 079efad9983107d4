//! Storage accesses and their Merkle authentication.
//!
//! A slot is first seen either as a registered key of the executing contract,
//! which is authenticated against the initial root, or as a plain witness.
//! Later accesses are served from its history. At the end of the transaction
//! the whole tree is recomputed from the final values to expose the new root.

use super::state::CircuitState;
use crate::buffer::ReservedVariable;
use crate::crypto::merkle::ARITY;
use crate::data_point::{DataPoint, validate_value};
use crate::error::{Result, SynthError, ensure_matches};
use crate::storage::StorageBackend;
use crate::trace::StorageWrite;
use revm::primitives::{Address, U256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub type Slot = (Address, U256);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageAccess {
  Read,
  Write,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageEntry {
  /// Leaf index witness, set on the authenticating read of a registered key.
  pub index: Option<DataPoint>,
  pub key: DataPoint,
  pub value: DataPoint,
  pub access: StorageAccess,
}

/// A leaf authenticated against the initial root.
#[derive(Clone, Debug)]
struct VerifiedLeaf {
  key: DataPoint,
  value: DataPoint,
}

#[derive(Clone, Debug)]
pub struct StorageManager {
  contract: Address,
  history: BTreeMap<Slot, Vec<StorageEntry>>,
  /// `(slot, history length before the push)` for every access, in order.
  journal: Vec<(Slot, usize)>,
  verified: BTreeMap<usize, VerifiedLeaf>,
}

impl StorageManager {
  pub fn new(contract: Address) -> Self {
    Self {
      contract,
      history: BTreeMap::new(),
      journal: Vec::new(),
      verified: BTreeMap::new(),
    }
  }

  pub fn history(&self, slot: &Slot) -> &[StorageEntry] {
    self.history.get(slot).map(Vec::as_slice).unwrap_or_default()
  }

  fn registered_index(&self, backend: &impl StorageBackend, address: Address, key: U256) -> Option<usize> {
    if address != self.contract {
      return None;
    }
    backend.leaf_index(key)
  }

  fn push(&mut self, slot: Slot, entry: StorageEntry) {
    let history = self.history.entry(slot).or_default();
    self.journal.push((slot, history.len()));
    history.push(entry);
  }

  pub fn checkpoint(&self) -> usize {
    self.journal.len()
  }

  /// Undo the accesses of a reverted message. Authenticating reads stay, as
  /// their placements are already part of the circuit.
  pub fn revert(&mut self, checkpoint: usize) {
    while self.journal.len() > checkpoint {
      let Some((slot, before)) = self.journal.pop() else { break };
      let Some(history) = self.history.get_mut(&slot) else { continue };
      let keep = if before == 0 && history.first().is_some_and(|e| e.access == StorageAccess::Read) {
        1
      } else {
        before
      };
      history.truncate(keep);
      if history.is_empty() {
        self.history.remove(&slot);
      }
    }
  }

  /// SLOAD. `loaded` is the interpreter's result.
  pub fn load(
    &mut self,
    state: &mut CircuitState,
    backend: &impl StorageBackend,
    address: Address,
    key: DataPoint,
    loaded: U256,
  ) -> Result<DataPoint> {
    let slot = (address, key.value);
    if let Some(last) = self.history(&slot).last() {
      let value = last.value.clone();
      ensure_matches("warm SLOAD", value.value, loaded)?;
      self.push(slot, StorageEntry {
        index: None,
        key,
        value: value.clone(),
        access: StorageAccess::Read,
      });
      return Ok(value);
    }

    let (index, value) = match self.registered_index(backend, address, key.value) {
      Some(index) => {
        let initial = backend.initial_value(key.value)?;
        ensure_matches("registered SLOAD", initial, loaded)?;
        let (index_pt, value) = self.verify_storage(state, backend, key.clone(), index, initial)?;
        (Some(index_pt), value)
      }
      None => (
        None,
        state.add_reserved_input(ReservedVariable::OtherContractStorageIn, loaded)?,
      ),
    };
    debug!(%address, key = %format!("{:#x}", key.value), registered = index.is_some(), "cold SLOAD");
    self.push(slot, StorageEntry {
      index,
      key,
      value: value.clone(),
      access: StorageAccess::Read,
    });
    Ok(value)
  }

  /// SSTORE. Registered keys must have been read first.
  pub fn store(
    &mut self,
    backend: &impl StorageBackend,
    address: Address,
    key: DataPoint,
    value: DataPoint,
  ) -> Result<()> {
    let slot = (address, key.value);
    if self.registered_index(backend, address, key.value).is_some() {
      if self.history(&slot).is_empty() {
        return Err(SynthError::referential(format!(
          "SSTORE to registered key {:#x} before any SLOAD",
          key.value
        )));
      }
      validate_value(value.value, 255).map_err(|_| {
        SynthError::precondition(format!(
          "value {:#x} stored at registered key {:#x} exceeds the field",
          value.value, key.value
        ))
      })?;
    }
    self.push(slot, StorageEntry {
      index: None,
      key,
      value,
      access: StorageAccess::Write,
    });
    Ok(())
  }

  /// Authenticate `(key, value)` as leaf `index` of the initial tree.
  fn verify_storage(
    &mut self,
    state: &mut CircuitState,
    backend: &impl StorageBackend,
    key: DataPoint,
    index: usize,
    value: U256,
  ) -> Result<(DataPoint, DataPoint)> {
    if self.verified.contains_key(&index) {
      return Err(SynthError::referential(format!("Merkle leaf {index} verified twice")));
    }
    let proof = backend.merkle_proof(index)?;
    let index_pt = state.add_reserved_input(ReservedVariable::InMtIndex, U256::from(index as u64))?;
    let value_pt = state.add_reserved_input(ReservedVariable::InValue, value)?;
    let leaf = state.place_poseidon(&[key.clone(), value_pt.clone()])?;
    ensure_matches("Merkle leaf", leaf.value, proof.leaf)?;
    let root = state.reserved(ReservedVariable::IniMerkleRoot)?;
    state.place_merkle_verification(&index_pt, &leaf, &proof.siblings, &root)?;
    self.verified.insert(index, VerifiedLeaf {
      key,
      value: value_pt.clone(),
    });
    Ok((index_pt, value_pt))
  }

  /// Recompute the storage root from the final values and route it, and
  /// every surviving write to an unregistered slot, to the public outputs.
  pub fn finalize(
    &mut self,
    state: &mut CircuitState,
    backend: &impl StorageBackend,
    committed: &[StorageWrite],
  ) -> Result<DataPoint> {
    for (index, key) in backend.registered_keys().iter().enumerate() {
      if self.verified.contains_key(&index) {
        continue;
      }
      let key_pt = state.add_reserved_input(ReservedVariable::InMptKey, *key)?;
      let value = backend.initial_value(*key)?;
      self.verify_storage(state, backend, key_pt, index, value)?;
    }
    let capacity = ARITY.pow(state.frontend.mt_depth as u32);
    for index in backend.registered_keys().len()..capacity {
      let key_pt = state.add_reserved_input(ReservedVariable::InMptKey, U256::ZERO)?;
      self.verify_storage(state, backend, key_pt, index, U256::ZERO)?;
    }

    let mut leaves = Vec::with_capacity(capacity);
    let mut final_values = BTreeMap::new();
    for (index, leaf) in &self.verified {
      let registered = backend.leaf_index(leaf.key.value) == Some(*index);
      let value = match self.history(&(self.contract, leaf.key.value)).last() {
        Some(last) if registered => last.value.clone(),
        _ => leaf.value.clone(),
      };
      if value.value != leaf.value.value {
        final_values.insert(leaf.key.value, value.value);
      }
      leaves.push(state.place_poseidon(&[leaf.key.clone(), value])?);
    }
    let root = state.place_poseidon(&leaves)?;

    let mut committed_registered = BTreeMap::new();
    for write in committed {
      if self.registered_index(backend, write.address, write.key).is_some() {
        committed_registered.insert(write.key, write.value);
      }
    }
    for (key, value) in &final_values {
      let initial = backend.initial_value(*key)?;
      ensure_matches(
        &format!("final value of key {key:#x}"),
        *value,
        committed_registered.get(key).copied().unwrap_or(initial),
      )?;
    }
    ensure_matches(
      "resulting Merkle root",
      root.value,
      backend.updated_root(&committed_registered)?,
    )?;
    let public_root = state.add_reserved_output(ReservedVariable::ResMerkleRoot, &root)?;

    let mut exported = BTreeSet::new();
    for (slot, history) in &self.history {
      if self.registered_index(backend, slot.0, slot.1).is_some() {
        continue;
      }
      if let Some(write) = history.iter().rev().find(|e| e.access == StorageAccess::Write) {
        state.add_reserved_output(ReservedVariable::OtherContractStorageOut, &write.value)?;
        exported.insert(*slot);
      }
    }
    info!(
      leaves = capacity,
      updated = final_values.len(),
      exported = exported.len(),
      "storage finalized"
    );
    Ok(public_root)
  }
}
