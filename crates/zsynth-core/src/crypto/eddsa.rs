//! EdDSA over Jubjub with a Poseidon challenge.
//!
//! `e = fold(R.x, R.y, A.x, A.y, m_0..m_11)`, `s = r + e * sk (mod order)`,
//! and a signature is valid when `s * G == R + e * A`.

use super::jubjub::{self, WirePoint};
use super::poseidon_fold;
use crate::error::{Result, SynthError};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bls12_381::{EdwardsAffine, Fr as JubjubScalar};
use ark_ff::{BigInt, PrimeField};
use revm::primitives::U256;

/// Number of message words covered by a signature.
pub const MESSAGE_WORDS: usize = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
  pub r: WirePoint,
  pub s: U256,
}

#[derive(Clone, Debug)]
pub struct EddsaKeypair {
  secret: JubjubScalar,
  public: WirePoint,
}

impl EddsaKeypair {
  /// Derive a keypair from seed bytes, reduced modulo the subgroup order.
  pub fn from_seed(seed: &[u8]) -> Result<Self> {
    let secret = JubjubScalar::from_le_bytes_mod_order(seed);
    if secret == JubjubScalar::from(0u64) {
      return Err(SynthError::precondition("seed reduces to a zero secret key"));
    }
    let public = jubjub::point_to_wires(
      EdwardsAffine::generator().mul_bigint(secret.into_bigint()).into_affine(),
    );
    Ok(Self { secret, public })
  }

  pub fn public_key(&self) -> WirePoint {
    self.public
  }

  pub fn sign(&self, message: &[U256; MESSAGE_WORDS]) -> Result<Signature> {
    // deterministic nonce bound to the key and message
    let mut nonce_input = vec![U256::from_limbs(self.secret.into_bigint().0)];
    nonce_input.extend_from_slice(message);
    let nonce_seed = poseidon_fold(&nonce_input)?;
    let nonce = JubjubScalar::from_le_bytes_mod_order(&nonce_seed.to_le_bytes::<32>());
    let r = jubjub::point_to_wires(EdwardsAffine::generator().mul_bigint(nonce.into_bigint()).into_affine());

    let e = challenge(r, self.public, message)?;
    let e_scalar = JubjubScalar::from_le_bytes_mod_order(&e.to_le_bytes::<32>());
    let s = nonce + e_scalar * self.secret;
    Ok(Signature {
      r,
      s: U256::from_limbs(s.into_bigint().0),
    })
  }
}

/// Poseidon challenge over the nonce point, the public key and the message.
pub fn challenge(r: WirePoint, public: WirePoint, message: &[U256; MESSAGE_WORDS]) -> Result<U256> {
  let mut inputs = vec![r.0, r.1, public.0, public.1];
  inputs.extend_from_slice(message);
  poseidon_fold(&inputs)
}

pub fn verify(signature: &Signature, public: WirePoint, message: &[U256; MESSAGE_WORDS]) -> Result<bool> {
  if JubjubScalar::from_bigint(BigInt::new(signature.s.into_limbs())).is_none() {
    return Ok(false);
  }
  let e = challenge(signature.r, public, message)?;
  let lhs = jubjub::mul(jubjub::base_point(), signature.s)?;
  let rhs = jubjub::add(signature.r, jubjub::mul(public, e)?)?;
  Ok(lhs == rhs)
}

/// Account address bound to a public key: the low 160 bits of its hash.
pub fn address_of(public: WirePoint) -> Result<U256> {
  let digest = poseidon_fold(&[public.0, public.1])?;
  Ok(digest & address_mask())
}

pub fn address_mask() -> U256 {
  (U256::from(1u64) << 160) - U256::from(1u64)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn message() -> [U256; MESSAGE_WORDS] {
    std::array::from_fn(|i| U256::from(i as u64 * 31 + 7))
  }

  #[test]
  fn test_sign_and_verify() {
    let keypair = EddsaKeypair::from_seed(b"synthesizer test key").unwrap();
    let signature = keypair.sign(&message()).unwrap();
    assert!(verify(&signature, keypair.public_key(), &message()).unwrap());
  }

  #[test]
  fn test_tampered_message_fails() {
    let keypair = EddsaKeypair::from_seed(b"synthesizer test key").unwrap();
    let signature = keypair.sign(&message()).unwrap();
    let mut other = message();
    other[3] += U256::from(1u64);
    assert!(!verify(&signature, keypair.public_key(), &other).unwrap());
  }

  #[test]
  fn test_address_fits_160_bits() {
    let keypair = EddsaKeypair::from_seed(b"address").unwrap();
    let address = address_of(keypair.public_key()).unwrap();
    assert!(address.bit_len() <= 160);
  }
}
