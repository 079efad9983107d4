//! Synthesizes a sample counter transaction with revm and writes the circuit
//! artifacts. The output directory is the first argument (default
//! `zsynth-out`); `RUST_LOG` controls verbosity.

use revm::{
  bytecode::opcode,
  primitives::{Address, Bytes, U256},
};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zsynth_core::circuit::NativeEvaluator;
use zsynth_core::config::{BufferCapacity, Catalogue, FrontendConfig};
use zsynth_core::crypto::eddsa::EddsaKeypair;
use zsynth_core::execute::{Deployment, synthesize_circuit};
use zsynth_core::output::write_circuit_json;
use zsynth_core::storage::MerkleStorage;
use zsynth_core::transaction::L2Transaction;

const COUNTER: Address = Address::repeat_byte(0xc0);

/// `slot[1] += calldata argument 0`
fn counter_code() -> Bytes {
  Bytes::from(vec![
    opcode::PUSH1,
    0x04,
    opcode::CALLDATALOAD,
    opcode::PUSH1,
    0x01,
    opcode::SLOAD,
    opcode::ADD,
    opcode::PUSH1,
    0x01,
    opcode::SSTORE,
    opcode::STOP,
  ])
}

fn main() -> zsynth_core::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();
  let out_dir = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("zsynth-out"));

  let keypair = EddsaKeypair::from_seed(b"zsynth demo sender")?;
  let tx = L2Transaction::new(0, COUNTER, [0xd0, 0x9d, 0xe0, 0x8a], &[U256::from(3u64)])?.sign(&keypair)?;
  let storage = MerkleStorage::new(2, [(U256::from(1u64), U256::from(100u64))])?;
  let deployment = Deployment::new(COUNTER, counter_code());
  let catalogue = Catalogue::synthetic(FrontendConfig::default(), BufferCapacity::default())?;

  let (output, circuit) = synthesize_circuit(&catalogue, &NativeEvaluator, &tx, &deployment, &storage)?;
  info!(
    steps = output.steps,
    placements = output.placements.len(),
    root = %output.resulting_root,
    "transaction synthesized"
  );
  write_circuit_json(&out_dir, &circuit)?;
  println!("circuit artifacts written to {}", out_dir.display());
  Ok(())
}
