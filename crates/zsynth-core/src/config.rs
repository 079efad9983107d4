//! Frontend configuration and the subcircuit template catalogue.
//!
//! The catalogue is produced by an external circuit compiler. It can be
//! loaded from its JSON artifacts with [`Catalogue::load_dir`], or generated
//! for a given buffer budget with [`Catalogue::synthetic`], whose template
//! shapes match the native witness evaluator.

use crate::error::{Result, SynthError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

// ============================================================
// Subcircuit templates
// ============================================================

/// Every template a placement can instantiate, in catalogue id order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subcircuit {
  BufferPubOut,
  BufferPubIn,
  BufferBlockIn,
  BufferEvmIn,
  BufferPrvIn,
  Alu1,
  Alu2,
  Alu3,
  Alu4,
  Alu5,
  And,
  Or,
  Xor,
  DecToBit,
  SubExpBatch,
  Accumulator,
  Poseidon,
  Poseidon2xCompress,
  JubjubExpBatch,
  EdDsaVerify,
  VerifyMerkleProof,
  VerifyMerkleProof2x,
  VerifyMerkleProof3x,
}

impl Subcircuit {
  pub const ALL: [Subcircuit; 23] = [
    Subcircuit::BufferPubOut,
    Subcircuit::BufferPubIn,
    Subcircuit::BufferBlockIn,
    Subcircuit::BufferEvmIn,
    Subcircuit::BufferPrvIn,
    Subcircuit::Alu1,
    Subcircuit::Alu2,
    Subcircuit::Alu3,
    Subcircuit::Alu4,
    Subcircuit::Alu5,
    Subcircuit::And,
    Subcircuit::Or,
    Subcircuit::Xor,
    Subcircuit::DecToBit,
    Subcircuit::SubExpBatch,
    Subcircuit::Accumulator,
    Subcircuit::Poseidon,
    Subcircuit::Poseidon2xCompress,
    Subcircuit::JubjubExpBatch,
    Subcircuit::EdDsaVerify,
    Subcircuit::VerifyMerkleProof,
    Subcircuit::VerifyMerkleProof2x,
    Subcircuit::VerifyMerkleProof3x,
  ];

  /// Template name as written by the circuit compiler.
  pub fn name(self) -> &'static str {
    match self {
      Subcircuit::BufferPubOut => "bufferPubOut",
      Subcircuit::BufferPubIn => "bufferPubIn",
      Subcircuit::BufferBlockIn => "bufferBlockIn",
      Subcircuit::BufferEvmIn => "bufferEVMIn",
      Subcircuit::BufferPrvIn => "bufferPrvIn",
      Subcircuit::Alu1 => "ALU1",
      Subcircuit::Alu2 => "ALU2",
      Subcircuit::Alu3 => "ALU3",
      Subcircuit::Alu4 => "ALU4",
      Subcircuit::Alu5 => "ALU5",
      Subcircuit::And => "AND",
      Subcircuit::Or => "OR",
      Subcircuit::Xor => "XOR",
      Subcircuit::DecToBit => "DecToBit",
      Subcircuit::SubExpBatch => "SubExpBatch",
      Subcircuit::Accumulator => "Accumulator",
      Subcircuit::Poseidon => "Poseidon",
      Subcircuit::Poseidon2xCompress => "Poseidon2xCompress",
      Subcircuit::JubjubExpBatch => "JubjubExpBatch",
      Subcircuit::EdDsaVerify => "EdDsaVerify",
      Subcircuit::VerifyMerkleProof => "VerifyMerkleProof",
      Subcircuit::VerifyMerkleProof2x => "VerifyMerkleProof2x",
      Subcircuit::VerifyMerkleProof3x => "VerifyMerkleProof3x",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.iter().copied().find(|kind| kind.name() == name)
  }

  /// Position in [`Subcircuit::ALL`], used as the id when no catalogue says otherwise.
  pub fn default_id(self) -> usize {
    self as usize
  }

  pub fn is_buffer(self) -> bool {
    self.default_id() < 5
  }
}

// ============================================================
// Frontend configuration
// ============================================================

/// Limits shared between the synthesizer and the circuit compiler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FrontendConfig {
  /// Maximum fragments one Accumulator placement can sum.
  pub accumulator_input_limit: usize,
  /// Depth of the 4-ary storage Merkle tree.
  pub mt_depth: usize,
  pub poseidon_inputs: usize,
  #[serde(rename = "NUMBER_OF_PREV_BLOCK_HASHES")]
  pub n_prev_block_hashes: usize,
  pub jubjub_exp_batch_size: usize,
  pub arith_exp_batch_size: usize,
}

impl Default for FrontendConfig {
  fn default() -> Self {
    Self {
      accumulator_input_limit: 32,
      mt_depth: 2,
      poseidon_inputs: 4,
      n_prev_block_hashes: 256,
      jubjub_exp_batch_size: 64,
      arith_exp_batch_size: 32,
    }
  }
}

impl FrontendConfig {
  /// Number of leaves in the storage tree.
  pub fn max_mt_leaves(&self) -> usize {
    self.poseidon_inputs.pow(self.mt_depth as u32)
  }

  pub fn validate(&self) -> Result<()> {
    if self.poseidon_inputs != 4 {
      return Err(SynthError::Catalogue(format!(
        "POSEIDON_INPUTS must be 4, got {}",
        self.poseidon_inputs
      )));
    }
    if self.accumulator_input_limit < 2 {
      return Err(SynthError::Catalogue("ACCUMULATOR_INPUT_LIMIT below 2".into()));
    }
    if self.mt_depth == 0 {
      return Err(SynthError::Catalogue("MT_DEPTH must be positive".into()));
    }
    if self.n_prev_block_hashes > 256 {
      return Err(SynthError::Catalogue(format!(
        "at most 256 previous block hashes are addressable, got {}",
        self.n_prev_block_hashes
      )));
    }
    for (name, batch) in [
      ("JUBJUB_EXP_BATCH_SIZE", self.jubjub_exp_batch_size),
      ("ARITH_EXP_BATCH_SIZE", self.arith_exp_batch_size),
    ] {
      if batch == 0 || 256 % batch != 0 {
        return Err(SynthError::Catalogue(format!("{name} must divide 256, got {batch}")));
      }
    }
    Ok(())
  }
}

// ============================================================
// Setup parameters and template descriptions
// ============================================================

/// Scheme-wide wire layout.
///
/// Global wires `[0, l)` are public, `[l, l_d)` are interface wires of the
/// placements, `[l_d, m_d)` are template internals. The public range is split
/// into user (`[0, l_user)`, of which `[0, l_user_out)` are outputs), block
/// (`[l_user, l_block)`) and function (`[l_block, l)`) regions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupParams {
  pub l: usize,
  pub l_user_out: usize,
  pub l_user: usize,
  pub l_block: usize,
  #[serde(rename = "l_D")]
  pub l_d: usize,
  #[serde(rename = "m_D")]
  pub m_d: usize,
  #[serde(rename = "s_D")]
  pub s_d: usize,
  pub s_max: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcircuitInfo {
  pub id: usize,
  pub name: String,
  #[serde(rename = "Nwires")]
  pub n_wires: usize,
  /// `[first local wire, count]` of the outputs.
  #[serde(rename = "Out_idx")]
  pub out_idx: [usize; 2],
  /// `[first local wire, count]` of the inputs.
  #[serde(rename = "In_idx")]
  pub in_idx: [usize; 2],
  /// Local wire to global wire.
  #[serde(rename = "flattenMap")]
  pub flatten_map: Vec<usize>,
}

impl SubcircuitInfo {
  pub fn n_in(&self) -> usize {
    self.in_idx[1]
  }

  pub fn n_out(&self) -> usize {
    self.out_idx[1]
  }

  pub fn output_local(&self, j: usize) -> usize {
    self.out_idx[0] + j
  }

  pub fn input_local(&self, j: usize) -> usize {
    self.in_idx[0] + j
  }

  pub fn kind(&self) -> Result<Subcircuit> {
    Subcircuit::from_name(&self.name)
      .ok_or_else(|| SynthError::Catalogue(format!("unknown subcircuit name {:?}", self.name)))
  }
}

/// Input budget of each reserved buffer, counted in 128-bit wires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferCapacity {
  pub public_out: usize,
  pub public_in: usize,
  pub block_in: usize,
  pub evm_in: usize,
  pub private_in: usize,
  pub s_max: usize,
}

impl Default for BufferCapacity {
  fn default() -> Self {
    Self {
      public_out: 32,
      public_in: 32,
      block_in: 2 * (8 + 256),
      evm_in: 512,
      private_in: 1024,
      s_max: 1024,
    }
  }
}

// ============================================================
// Catalogue
// ============================================================

#[derive(Clone, Debug)]
pub struct Catalogue {
  pub setup: SetupParams,
  pub frontend: FrontendConfig,
  pub subcircuits: Vec<SubcircuitInfo>,
  /// Global wire to `(subcircuit id, local wire)`.
  pub global_wires: Vec<(usize, usize)>,
  by_kind: HashMap<Subcircuit, usize>,
}

impl Catalogue {
  pub fn new(
    setup: SetupParams,
    frontend: FrontendConfig,
    subcircuits: Vec<SubcircuitInfo>,
    global_wires: Vec<(usize, usize)>,
  ) -> Result<Self> {
    frontend.validate()?;
    let mut by_kind = HashMap::new();
    for (position, info) in subcircuits.iter().enumerate() {
      if info.id != position {
        return Err(SynthError::Catalogue(format!(
          "subcircuit {} listed at position {position} has id {}",
          info.name, info.id
        )));
      }
      if by_kind.insert(info.kind()?, info.id).is_some() {
        return Err(SynthError::Catalogue(format!("duplicate subcircuit {}", info.name)));
      }
    }
    let catalogue = Self {
      setup,
      frontend,
      subcircuits,
      global_wires,
      by_kind,
    };
    catalogue.validate()?;
    Ok(catalogue)
  }

  /// Reads `setupParams.json`, `frontendCfg.json`, `subcircuitInfo.json` and
  /// `globalWireList.json` from `dir`.
  pub fn load_dir(dir: &Path) -> Result<Self> {
    let setup: SetupParams = serde_json::from_str(&fs::read_to_string(dir.join("setupParams.json"))?)?;
    let frontend: FrontendConfig = serde_json::from_str(&fs::read_to_string(dir.join("frontendCfg.json"))?)?;
    let subcircuits: Vec<SubcircuitInfo> =
      serde_json::from_str(&fs::read_to_string(dir.join("subcircuitInfo.json"))?)?;
    let global_wires: Vec<(usize, usize)> =
      serde_json::from_str(&fs::read_to_string(dir.join("globalWireList.json"))?)?;
    Self::new(setup, frontend, subcircuits, global_wires)
  }

  pub fn write_dir(&self, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(dir.join("setupParams.json"), serde_json::to_string_pretty(&self.setup)?)?;
    fs::write(dir.join("frontendCfg.json"), serde_json::to_string_pretty(&self.frontend)?)?;
    fs::write(dir.join("subcircuitInfo.json"), serde_json::to_string(&self.subcircuits)?)?;
    fs::write(dir.join("globalWireList.json"), serde_json::to_string(&self.global_wires)?)?;
    Ok(())
  }

  fn validate(&self) -> Result<()> {
    let s = &self.setup;
    if !(s.l_user_out <= s.l_user && s.l_user <= s.l_block && s.l_block <= s.l && s.l <= s.l_d && s.l_d <= s.m_d) {
      return Err(SynthError::Catalogue(format!("inconsistent wire boundaries {s:?}")));
    }
    if self.global_wires.len() != s.m_d {
      return Err(SynthError::Catalogue(format!(
        "global wire list has {} entries, m_D is {}",
        self.global_wires.len(),
        s.m_d
      )));
    }
    if s.s_d != self.subcircuits.len() {
      return Err(SynthError::Catalogue(format!(
        "s_D is {} but {} subcircuits are listed",
        s.s_d,
        self.subcircuits.len()
      )));
    }
    for kind in Subcircuit::ALL {
      if !self.by_kind.contains_key(&kind) {
        return Err(SynthError::Catalogue(format!("missing subcircuit {}", kind.name())));
      }
    }
    for info in &self.subcircuits {
      if info.flatten_map.len() != info.n_wires {
        return Err(SynthError::Catalogue(format!(
          "{}: flatten map has {} wires, template has {}",
          info.name,
          info.flatten_map.len(),
          info.n_wires
        )));
      }
      let out_end = info.out_idx[0] + info.out_idx[1];
      let in_end = info.in_idx[0] + info.in_idx[1];
      if info.out_idx[0] != 1 || info.in_idx[0] < out_end || in_end > info.n_wires {
        return Err(SynthError::Catalogue(format!(
          "{}: wire ranges out {:?} in {:?} do not fit {} wires",
          info.name, info.out_idx, info.in_idx, info.n_wires
        )));
      }
      if let Some(bad) = info.flatten_map.iter().find(|&&g| g >= s.m_d) {
        return Err(SynthError::Catalogue(format!("{}: global wire {bad} beyond m_D", info.name)));
      }
    }
    for (g, &(sid, local)) in self.global_wires.iter().enumerate().take(s.l) {
      let mapped = self
        .subcircuits
        .get(sid)
        .and_then(|info| info.flatten_map.get(local))
        .copied();
      if mapped != Some(g) {
        return Err(SynthError::Catalogue(format!(
          "public wire {g} claims ({sid}, {local}) which maps to {mapped:?}"
        )));
      }
    }
    Ok(())
  }

  pub fn info(&self, kind: Subcircuit) -> Result<&SubcircuitInfo> {
    self
      .by_kind
      .get(&kind)
      .map(|&id| &self.subcircuits[id])
      .ok_or_else(|| SynthError::Catalogue(format!("missing subcircuit {}", kind.name())))
  }

  pub fn info_by_id(&self, id: usize) -> Result<&SubcircuitInfo> {
    self
      .subcircuits
      .get(id)
      .ok_or_else(|| SynthError::Catalogue(format!("no subcircuit with id {id}")))
  }

  /// Builds a catalogue whose templates have exactly the wire counts the
  /// synthesizer emits after splitting and no internal wires.
  pub fn synthetic(frontend: FrontendConfig, capacity: BufferCapacity) -> Result<Self> {
    frontend.validate()?;
    let shapes: Vec<(Subcircuit, usize, usize)> = Subcircuit::ALL
      .iter()
      .map(|&kind| {
        let (n_in, n_out) = synthetic_shape(kind, &frontend, &capacity);
        (kind, n_in, n_out)
      })
      .collect();

    let mut subcircuits: Vec<SubcircuitInfo> = shapes
      .iter()
      .enumerate()
      .map(|(id, &(kind, n_in, n_out))| SubcircuitInfo {
        id,
        name: kind.name().to_string(),
        n_wires: 1 + n_out + n_in,
        out_idx: [1, n_out],
        in_idx: [1 + n_out, n_in],
        flatten_map: vec![0; 1 + n_out + n_in],
      })
      .collect();

    let mut global_wires = Vec::new();
    let pub_out = Subcircuit::BufferPubOut.default_id();
    for j in 0..subcircuits[pub_out].n_out() {
      let local = subcircuits[pub_out].output_local(j);
      assign_global(&mut subcircuits, &mut global_wires, pub_out, local);
    }
    let l_user_out = global_wires.len();
    let mut boundaries = Vec::new();
    for kind in [Subcircuit::BufferPubIn, Subcircuit::BufferBlockIn, Subcircuit::BufferEvmIn] {
      let sid = kind.default_id();
      for j in 0..subcircuits[sid].n_in() {
        let local = subcircuits[sid].input_local(j);
        assign_global(&mut subcircuits, &mut global_wires, sid, local);
      }
      boundaries.push(global_wires.len());
    }
    let l = boundaries[2];

    for sid in 0..subcircuits.len() {
      assign_global(&mut subcircuits, &mut global_wires, sid, 0);
      if sid != pub_out {
        for j in 0..subcircuits[sid].n_out() {
          let local = subcircuits[sid].output_local(j);
          assign_global(&mut subcircuits, &mut global_wires, sid, local);
        }
      }
      let public_inputs = (1..=3).contains(&sid);
      if !public_inputs {
        for j in 0..subcircuits[sid].n_in() {
          let local = subcircuits[sid].input_local(j);
          assign_global(&mut subcircuits, &mut global_wires, sid, local);
        }
      }
    }
    let l_d = global_wires.len();

    let setup = SetupParams {
      l,
      l_user_out,
      l_user: boundaries[0],
      l_block: boundaries[1],
      l_d,
      m_d: l_d,
      s_d: subcircuits.len(),
      s_max: capacity.s_max,
    };
    Self::new(setup, frontend, subcircuits, global_wires)
  }
}

fn assign_global(
  subcircuits: &mut [SubcircuitInfo],
  global_wires: &mut Vec<(usize, usize)>,
  sid: usize,
  local: usize,
) {
  subcircuits[sid].flatten_map[local] = global_wires.len();
  global_wires.push((sid, local));
}

/// `(inputs, outputs)` after 128-bit wire splitting.
fn synthetic_shape(kind: Subcircuit, frontend: &FrontendConfig, capacity: &BufferCapacity) -> (usize, usize) {
  match kind {
    Subcircuit::BufferPubOut => (capacity.public_out, capacity.public_out),
    Subcircuit::BufferPubIn => (capacity.public_in, capacity.public_in),
    Subcircuit::BufferBlockIn => (capacity.block_in, capacity.block_in),
    Subcircuit::BufferEvmIn => (capacity.evm_in, capacity.evm_in),
    Subcircuit::BufferPrvIn => (capacity.private_in, capacity.private_in),
    // selector plus two split operands
    Subcircuit::Alu1 | Subcircuit::Alu3 | Subcircuit::Alu4 | Subcircuit::Alu5 => (5, 2),
    Subcircuit::Alu2 => (7, 2),
    Subcircuit::And | Subcircuit::Or | Subcircuit::Xor => (4, 2),
    Subcircuit::DecToBit => (2, 256),
    Subcircuit::SubExpBatch => (4 + frontend.arith_exp_batch_size, 4),
    Subcircuit::Accumulator => (2 * frontend.accumulator_input_limit, 2),
    Subcircuit::Poseidon => (2 * 4, 2),
    Subcircuit::Poseidon2xCompress => (2 * 16, 2),
    Subcircuit::JubjubExpBatch => (8 + frontend.jubjub_exp_batch_size, 8),
    Subcircuit::EdDsaVerify => (12, 0),
    Subcircuit::VerifyMerkleProof => (2 * 7, 0),
    Subcircuit::VerifyMerkleProof2x => (2 * 10, 0),
    Subcircuit::VerifyMerkleProof3x => (2 * 13, 0),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn small() -> Catalogue {
    let frontend = FrontendConfig {
      n_prev_block_hashes: 4,
      ..FrontendConfig::default()
    };
    let capacity = BufferCapacity {
      public_out: 4,
      public_in: 6,
      block_in: 24,
      evm_in: 16,
      private_in: 32,
      s_max: 64,
    };
    Catalogue::synthetic(frontend, capacity).unwrap()
  }

  #[test]
  fn test_subcircuit_names_round_trip() {
    for kind in Subcircuit::ALL {
      assert_eq!(Subcircuit::from_name(kind.name()), Some(kind));
    }
    assert_eq!(Subcircuit::from_name("SubEXP"), None);
  }

  #[test]
  fn test_synthetic_public_regions() {
    let catalogue = small();
    let s = &catalogue.setup;
    assert_eq!(s.l_user_out, 4);
    assert_eq!(s.l_user, 10);
    assert_eq!(s.l_block, 34);
    assert_eq!(s.l, 50);
    assert!(s.l_d > s.l);
    assert_eq!(catalogue.global_wires[0], (0, 1));
    assert_eq!(catalogue.global_wires[s.l_user], (2, 1 + 24));
  }

  #[test]
  fn test_synthetic_flatten_maps_are_bijective_on_interface() {
    let catalogue = small();
    let mut seen = vec![false; catalogue.setup.m_d];
    for info in &catalogue.subcircuits {
      for &g in &info.flatten_map {
        assert!(!seen[g], "global wire {g} assigned twice");
        seen[g] = true;
      }
    }
    assert!(seen.iter().all(|&s| s));
  }

  #[test]
  fn test_catalogue_json_round_trip() {
    let catalogue = small();
    let dir = tempfile::tempdir().unwrap();
    catalogue.write_dir(dir.path()).unwrap();
    let loaded = Catalogue::load_dir(dir.path()).unwrap();
    assert_eq!(loaded.setup, catalogue.setup);
    assert_eq!(loaded.subcircuits, catalogue.subcircuits);
  }

  #[test]
  fn test_rejects_bad_batch_size() {
    let frontend = FrontendConfig {
      arith_exp_batch_size: 7,
      ..FrontendConfig::default()
    };
    assert!(matches!(frontend.validate(), Err(SynthError::Catalogue(_))));
  }
}
