//! Field, curve and hash primitives shared by the synthesizer, the native
//! witness evaluator and the storage backend.
//!
//! Wire values are 256-bit integers. Conversion into BLS12-381 scalars is
//! checked: a value at or above the modulus is rejected, never reduced.

pub mod eddsa;
pub mod jubjub;
pub mod merkle;
pub mod poseidon;

use crate::error::{Result, SynthError};
use ark_bls12_381::Fr;
use ark_ff::{BigInt, PrimeField};
use revm::primitives::U256;

pub use poseidon::{poseidon4, poseidon_fold, poseidon_u256};

/// Modulus of the BLS12-381 scalar field, which is also the Jubjub base field.
pub const BLS_SCALAR_MODULUS: U256 = U256::from_limbs(<Fr as PrimeField>::MODULUS.0);

/// Order of the prime-order Jubjub subgroup.
pub const JUBJUB_ORDER: U256 = U256::from_limbs(<ark_ed_on_bls12_381::Fr as PrimeField>::MODULUS.0);

pub fn fr_from_u256(value: U256) -> Result<Fr> {
  Fr::from_bigint(BigInt::new(value.into_limbs()))
    .ok_or_else(|| SynthError::precondition(format!("{value:#x} exceeds the scalar field modulus")))
}

pub fn fr_to_u256(value: Fr) -> U256 {
  U256::from_limbs(value.into_bigint().0)
}
