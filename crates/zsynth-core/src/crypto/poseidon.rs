//! Width-5 Poseidon over the BLS12-381 scalar field.
//!
//! One capacity element and four rate elements, x^5 S-box, 8 full and 60
//! partial rounds. Round constants come from a seeded Xoroshiro stream and the
//! MDS matrix is the Cauchy matrix `1 / (i + (WIDTH + j))`.

use super::{fr_from_u256, fr_to_u256};
use crate::error::Result;
use ark_bls12_381::Fr;
use ark_ff::{Field, PrimeField, Zero};
use rand::{RngCore, SeedableRng};
use rand_xoshiro::Xoroshiro128Plus;
use revm::primitives::U256;
use std::sync::OnceLock;

pub const WIDTH: usize = 5;
pub const RATE: usize = 4;
const FULL_ROUNDS: usize = 8;
const PARTIAL_ROUNDS: usize = 60;
const CONSTANTS_SEED: u64 = 0x5a59_4e54_4845_5349;

struct PoseidonParams {
  round_constants: Vec<[Fr; WIDTH]>,
  mds: [[Fr; WIDTH]; WIDTH],
}

fn params() -> &'static PoseidonParams {
  static PARAMS: OnceLock<PoseidonParams> = OnceLock::new();
  PARAMS.get_or_init(|| {
    let mut rng = Xoroshiro128Plus::seed_from_u64(CONSTANTS_SEED);
    let round_constants = (0..FULL_ROUNDS + PARTIAL_ROUNDS)
      .map(|_| {
        let mut row = [Fr::zero(); WIDTH];
        for slot in row.iter_mut() {
          let mut bytes = [0u8; 64];
          rng.fill_bytes(&mut bytes);
          *slot = Fr::from_le_bytes_mod_order(&bytes);
        }
        row
      })
      .collect();

    let mut mds = [[Fr::zero(); WIDTH]; WIDTH];
    for (i, row) in mds.iter_mut().enumerate() {
      for (j, cell) in row.iter_mut().enumerate() {
        // denominators range over 5..=13
        *cell = Fr::from((i + WIDTH + j) as u64).inverse().unwrap_or_else(Fr::zero);
      }
    }
    PoseidonParams { round_constants, mds }
  })
}

#[inline]
fn sbox(x: Fr) -> Fr {
  let x2 = x.square();
  x2.square() * x
}

fn permute(state: &mut [Fr; WIDTH]) {
  let params = params();
  let half_full = FULL_ROUNDS / 2;
  for (round, constants) in params.round_constants.iter().enumerate() {
    for (cell, c) in state.iter_mut().zip(constants) {
      *cell += c;
    }
    let full = round < half_full || round >= half_full + PARTIAL_ROUNDS;
    if full {
      for cell in state.iter_mut() {
        *cell = sbox(*cell);
      }
    } else {
      state[0] = sbox(state[0]);
    }
    let mut mixed = [Fr::zero(); WIDTH];
    for (out, row) in mixed.iter_mut().zip(&params.mds) {
      *out = row.iter().zip(state.iter()).map(|(m, s)| *m * s).sum();
    }
    *state = mixed;
  }
}

/// Hash exactly four field elements.
pub fn poseidon4(inputs: [Fr; RATE]) -> Fr {
  let mut state = [Fr::zero(); WIDTH];
  state[1..].copy_from_slice(&inputs);
  permute(&mut state);
  state[0]
}

/// Hash four wire values; each must already be a canonical field element.
pub fn poseidon_u256(inputs: &[U256; RATE]) -> Result<U256> {
  let mut fields = [Fr::zero(); RATE];
  for (field, value) in fields.iter_mut().zip(inputs) {
    *field = fr_from_u256(*value)?;
  }
  Ok(fr_to_u256(poseidon4(fields)))
}

/// Fold any number of values into one by hashing chunks of four, zero-padding
/// the last chunk, until a single value remains. An empty input hashes four
/// zeros.
pub fn poseidon_fold(values: &[U256]) -> Result<U256> {
  let mut level: Vec<U256> = values.to_vec();
  if level.is_empty() {
    level.push(U256::ZERO);
  }
  loop {
    let mut next = Vec::with_capacity(level.len().div_ceil(RATE));
    for chunk in level.chunks(RATE) {
      let mut padded = [U256::ZERO; RATE];
      padded[..chunk.len()].copy_from_slice(chunk);
      next.push(poseidon_u256(&padded)?);
    }
    level = next;
    if level.len() == 1 {
      return Ok(level[0]);
    }
  }
}

/// Interpret a byte string as big-endian 32-byte words (the last one possibly
/// shorter) and fold them.
pub fn poseidon_bytes(bytes: &[u8]) -> Result<U256> {
  let words: Vec<U256> = bytes.chunks(32).map(U256::from_be_slice).collect();
  poseidon_fold(&words)
}
