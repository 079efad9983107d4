//! JSON artifacts handed to the proving toolchain.

use crate::circuit::{Circuit, PermutationEntry};
use crate::error::Result;
use revm::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

pub const PLACEMENT_VARIABLES_FILE: &str = "placementVariables.json";
pub const INSTANCE_FILE: &str = "instance.json";
pub const INSTANCE_DESCRIPTION_FILE: &str = "instance_description.json";
pub const PERMUTATION_FILE: &str = "permutation.json";

/// `0x`-prefixed big-endian hex of a full 32-byte word.
pub fn hex_word(value: U256) -> String {
  format!("0x{}", hex::encode(value.to_be_bytes::<32>()))
}

fn hex_words(values: &[U256]) -> Vec<String> {
  values.iter().copied().map(hex_word).collect()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementVariablesJson {
  pub subcircuit_id: usize,
  pub variables: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceJson {
  pub a_pub_user: Vec<String>,
  pub a_pub_block: Vec<String>,
  pub a_pub_function: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptionJson {
  pub a_pub_user_description: Vec<String>,
  pub a_pub_block_description: Vec<String>,
  pub a_pub_function_description: Vec<String>,
}

/// Writes the four artifacts of `circuit` into `dir`, creating it if needed.
pub fn write_circuit_json(dir: &Path, circuit: &Circuit) -> Result<()> {
  fs::create_dir_all(dir)?;
  let normalized = &circuit.normalized;
  let instance = &normalized.instance;

  let variables: Vec<PlacementVariablesJson> = normalized
    .variables
    .iter()
    .map(|entry| PlacementVariablesJson {
      subcircuit_id: entry.subcircuit_id,
      variables: hex_words(&entry.variables),
    })
    .collect();
  let instance_json = InstanceJson {
    a_pub_user: hex_words(&instance.a_pub_user),
    a_pub_block: hex_words(&instance.a_pub_block),
    a_pub_function: hex_words(&instance.a_pub_function),
  };
  let description = InstanceDescriptionJson {
    a_pub_user_description: instance.a_pub_user_description.clone(),
    a_pub_block_description: instance.a_pub_block_description.clone(),
    a_pub_function_description: instance.a_pub_function_description.clone(),
  };

  fs::write(dir.join(PLACEMENT_VARIABLES_FILE), serde_json::to_string_pretty(&variables)?)?;
  fs::write(dir.join(INSTANCE_FILE), serde_json::to_string_pretty(&instance_json)?)?;
  fs::write(dir.join(INSTANCE_DESCRIPTION_FILE), serde_json::to_string_pretty(&description)?)?;
  fs::write(
    dir.join(PERMUTATION_FILE),
    serde_json::to_string_pretty(&circuit.permutation.entries)?,
  )?;
  info!(dir = %dir.display(), "circuit artifacts written");
  Ok(())
}

pub fn read_permutation(dir: &Path) -> Result<Vec<PermutationEntry>> {
  Ok(serde_json::from_str(&fs::read_to_string(dir.join(PERMUTATION_FILE))?)?)
}

pub fn read_instance(dir: &Path) -> Result<InstanceJson> {
  Ok(serde_json::from_str(&fs::read_to_string(dir.join(INSTANCE_FILE))?)?)
}
