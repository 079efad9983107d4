//! Fixed-depth 4-ary Poseidon Merkle tree.

use super::poseidon_u256;
use crate::error::{Result, SynthError};
use revm::primitives::U256;

pub const ARITY: usize = 4;

/// Authentication path of one leaf: three siblings per level, leaf level first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
  pub leaf: U256,
  pub siblings: Vec<[U256; 3]>,
}

/// Leaf commitment of a storage slot.
pub fn leaf_hash(key: U256, value: U256) -> Result<U256> {
  poseidon_u256(&[key, value, U256::ZERO, U256::ZERO])
}

/// Hash a node from the child at `position` and its three siblings.
pub fn parent_hash(child: U256, position: usize, siblings: &[U256; 3]) -> Result<U256> {
  let mut children = [U256::ZERO; ARITY];
  let mut rest = siblings.iter();
  for (slot, node) in children.iter_mut().enumerate() {
    if slot == position {
      *node = child;
    } else if let Some(&sibling) = rest.next() {
      *node = sibling;
    }
  }
  poseidon_u256(&children)
}

/// Walk `levels` from `(index, node)` and return the ancestor and its index.
pub fn climb(mut index: U256, mut node: U256, levels: &[[U256; 3]]) -> Result<(U256, U256)> {
  let arity = U256::from(ARITY as u64);
  for siblings in levels {
    let position = (index % arity).as_limbs()[0] as usize;
    node = parent_hash(node, position, siblings)?;
    index /= arity;
  }
  Ok((index, node))
}

#[derive(Clone, Debug)]
pub struct MerkleTree {
  depth: usize,
  /// `levels[0]` are the leaves, the last level is the root.
  levels: Vec<Vec<U256>>,
}

impl MerkleTree {
  pub fn new(depth: usize, leaves: Vec<U256>) -> Result<Self> {
    let capacity = ARITY.pow(depth as u32);
    if leaves.len() != capacity {
      return Err(SynthError::precondition(format!(
        "a depth-{depth} tree needs {capacity} leaves, got {}",
        leaves.len()
      )));
    }
    let mut levels = vec![leaves];
    for _ in 0..depth {
      let current = levels.last().map(Vec::as_slice).unwrap_or_default();
      let next = current
        .chunks(ARITY)
        .map(|chunk| poseidon_u256(&[chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect::<Result<Vec<_>>>()?;
      levels.push(next);
    }
    Ok(Self { depth, levels })
  }

  pub fn depth(&self) -> usize {
    self.depth
  }

  pub fn root(&self) -> U256 {
    self.levels.last().and_then(|level| level.first()).copied().unwrap_or_default()
  }

  pub fn proof(&self, index: usize) -> Result<MerkleProof> {
    let leaf = *self.levels[0]
      .get(index)
      .ok_or_else(|| SynthError::referential(format!("leaf index {index} outside the tree")))?;
    let mut siblings = Vec::with_capacity(self.depth);
    let mut position = index;
    for level in &self.levels[..self.depth] {
      let group = position - position % ARITY;
      let mut row = [U256::ZERO; 3];
      let mut k = 0;
      for slot in group..group + ARITY {
        if slot != position {
          row[k] = level[slot];
          k += 1;
        }
      }
      siblings.push(row);
      position /= ARITY;
    }
    Ok(MerkleProof { leaf, siblings })
  }

  pub fn verify(&self, index: usize, proof: &MerkleProof) -> Result<bool> {
    let (top_index, top) = climb(U256::from(index as u64), proof.leaf, &proof.siblings)?;
    Ok(top_index.is_zero() && top == self.root())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tree() -> MerkleTree {
    let leaves = (0..16u64)
      .map(|i| leaf_hash(U256::from(i), U256::from(i * i)).unwrap())
      .collect();
    MerkleTree::new(2, leaves).unwrap()
  }

  #[test]
  fn test_every_proof_verifies() {
    let tree = tree();
    for index in 0..16 {
      let proof = tree.proof(index).unwrap();
      assert!(tree.verify(index, &proof).unwrap(), "leaf {index}");
    }
  }

  #[test]
  fn test_mutated_sibling_fails() {
    let tree = tree();
    let mut proof = tree.proof(6).unwrap();
    proof.siblings[1][2] ^= U256::from(1u64);
    assert!(!tree.verify(6, &proof).unwrap());
  }

  #[test]
  fn test_wrong_index_fails() {
    let tree = tree();
    let proof = tree.proof(6).unwrap();
    assert!(!tree.verify(7, &proof).unwrap());
  }

  #[test]
  fn test_rejects_wrong_leaf_count() {
    assert!(MerkleTree::new(1, vec![U256::ZERO; 3]).is_err());
  }
}
