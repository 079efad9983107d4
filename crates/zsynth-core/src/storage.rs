//! Committed contract storage.
//!
//! A fixed set of the contract's slots is "registered": each owns a leaf of a
//! 4-ary Poseidon tree whose root is a public input. Everything else is read
//! and written as a plain witness.

use crate::crypto::merkle::{MerkleProof, MerkleTree, leaf_hash};
use crate::data_point::validate_value;
use crate::error::{Result, SynthError};
use revm::primitives::U256;
use std::collections::{BTreeMap, HashMap};

/// State collaborator for the registered slots of the executing contract.
pub trait StorageBackend {
  /// Depth of the 4-ary tree.
  fn depth(&self) -> usize;

  /// Registered keys in leaf order.
  fn registered_keys(&self) -> &[U256];

  fn leaf_index(&self, key: U256) -> Option<usize>;

  /// Value of a registered key before the transaction.
  fn initial_value(&self, key: U256) -> Result<U256>;

  fn merkle_proof(&self, index: usize) -> Result<MerkleProof>;

  fn initial_root(&self) -> U256;

  /// Root after applying `writes` to the registered keys.
  fn updated_root(&self, writes: &BTreeMap<U256, U256>) -> Result<U256>;
}

/// In-memory backend over a native Poseidon tree.
#[derive(Clone, Debug)]
pub struct MerkleStorage {
  depth: usize,
  keys: Vec<U256>,
  values: Vec<U256>,
  index: HashMap<U256, usize>,
  tree: MerkleTree,
}

impl MerkleStorage {
  /// Register `slots` in the given order. Unused leaves commit to key and
  /// value zero.
  pub fn new(depth: usize, slots: impl IntoIterator<Item = (U256, U256)>) -> Result<Self> {
    let capacity = crate::crypto::merkle::ARITY.pow(depth as u32);
    let mut keys = Vec::new();
    let mut values = Vec::new();
    let mut index = HashMap::new();
    for (key, value) in slots {
      validate_value(key, 255)?;
      validate_value(value, 255)?;
      if index.insert(key, keys.len()).is_some() {
        return Err(SynthError::precondition(format!("storage key {key:#x} registered twice")));
      }
      keys.push(key);
      values.push(value);
    }
    if keys.len() > capacity {
      return Err(SynthError::capacity("registered storage keys", keys.len(), capacity));
    }
    let tree = MerkleTree::new(depth, Self::leaves(capacity, &keys, &values)?)?;
    Ok(Self {
      depth,
      keys,
      values,
      index,
      tree,
    })
  }

  fn leaves(capacity: usize, keys: &[U256], values: &[U256]) -> Result<Vec<U256>> {
    (0..capacity)
      .map(|i| match (keys.get(i), values.get(i)) {
        (Some(key), Some(value)) => leaf_hash(*key, *value),
        _ => leaf_hash(U256::ZERO, U256::ZERO),
      })
      .collect()
  }

  /// Registered `(key, value)` pairs in leaf order.
  pub fn slots(&self) -> impl Iterator<Item = (U256, U256)> + '_ {
    self.keys.iter().copied().zip(self.values.iter().copied())
  }
}

impl StorageBackend for MerkleStorage {
  fn depth(&self) -> usize {
    self.depth
  }

  fn registered_keys(&self) -> &[U256] {
    &self.keys
  }

  fn leaf_index(&self, key: U256) -> Option<usize> {
    self.index.get(&key).copied()
  }

  fn initial_value(&self, key: U256) -> Result<U256> {
    self
      .leaf_index(key)
      .map(|i| self.values[i])
      .ok_or_else(|| SynthError::referential(format!("storage key {key:#x} is not registered")))
  }

  fn merkle_proof(&self, index: usize) -> Result<MerkleProof> {
    self.tree.proof(index)
  }

  fn initial_root(&self) -> U256 {
    self.tree.root()
  }

  fn updated_root(&self, writes: &BTreeMap<U256, U256>) -> Result<U256> {
    let mut values = self.values.clone();
    for (key, value) in writes {
      let i = self.leaf_index(*key).ok_or_else(|| {
        SynthError::referential(format!("write to unregistered key {key:#x} in the committed tree"))
      })?;
      validate_value(*value, 255)?;
      values[i] = *value;
    }
    let capacity = crate::crypto::merkle::ARITY.pow(self.depth as u32);
    Ok(MerkleTree::new(self.depth, Self::leaves(capacity, &self.keys, &values)?)?.root())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn storage() -> MerkleStorage {
    MerkleStorage::new(2, [(U256::from(0u64), U256::from(10u64)), (U256::from(7u64), U256::from(70u64))]).unwrap()
  }

  #[test]
  fn test_proofs_authenticate_registered_slots() {
    let storage = storage();
    for (i, (key, value)) in storage.slots().enumerate() {
      assert_eq!(storage.leaf_index(key), Some(i));
      let proof = storage.merkle_proof(i).unwrap();
      assert_eq!(proof.leaf, leaf_hash(key, value).unwrap());
      assert!(storage.tree.verify(i, &proof).unwrap());
    }
  }

  #[test]
  fn test_updated_root() {
    let storage = storage();
    assert_eq!(storage.updated_root(&BTreeMap::new()).unwrap(), storage.initial_root());
    let writes = BTreeMap::from([(U256::from(7u64), U256::from(71u64))]);
    let updated = storage.updated_root(&writes).unwrap();
    assert_ne!(updated, storage.initial_root());
    let expected = MerkleStorage::new(2, [(U256::from(0u64), U256::from(10u64)), (U256::from(7u64), U256::from(71u64))]).unwrap();
    assert_eq!(updated, expected.initial_root());
    let stray = BTreeMap::from([(U256::from(8u64), U256::from(1u64))]);
    assert!(storage.updated_root(&stray).is_err());
  }

  #[test]
  fn test_registration_limits() {
    assert!(MerkleStorage::new(1, (0..5u64).map(|k| (U256::from(k), U256::ZERO))).is_err());
    assert!(MerkleStorage::new(1, [(U256::MAX, U256::ZERO)]).is_err());
    assert!(MerkleStorage::new(1, [(U256::ZERO, U256::ZERO), (U256::ZERO, U256::from(1u64))]).is_err());
  }
}
