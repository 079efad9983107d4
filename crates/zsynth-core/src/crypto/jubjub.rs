//! Jubjub (twisted Edwards over the BLS12-381 scalar field, `a = -1`) helpers
//! in wire coordinates.

use super::{fr_from_u256, fr_to_u256};
use crate::error::{Result, SynthError};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bls12_381::EdwardsAffine;
use revm::primitives::U256;

/// A curve point as a pair of wire values.
pub type WirePoint = (U256, U256);

/// Decode and check that a coordinate pair lies on the curve.
pub fn point_from_wires(point: WirePoint) -> Result<EdwardsAffine> {
  let (x, y) = point;
  let affine = EdwardsAffine::new_unchecked(fr_from_u256(x)?, fr_from_u256(y)?);
  if !affine.is_on_curve() {
    return Err(SynthError::precondition(format!(
      "({x:#x}, {y:#x}) is not a Jubjub point"
    )));
  }
  Ok(affine)
}

pub fn point_to_wires(point: EdwardsAffine) -> WirePoint {
  // the identity has affine coordinates (0, 1)
  if point.is_zero() {
    return (U256::ZERO, U256::from(1u64));
  }
  (fr_to_u256(point.x), fr_to_u256(point.y))
}

pub fn base_point() -> WirePoint {
  point_to_wires(EdwardsAffine::generator())
}

pub fn identity() -> WirePoint {
  (U256::ZERO, U256::from(1u64))
}

pub fn add(p: WirePoint, q: WirePoint) -> Result<WirePoint> {
  let sum = point_from_wires(p)?.into_group() + point_from_wires(q)?;
  Ok(point_to_wires(sum.into_affine()))
}

/// `scalar * point` for a full 256-bit scalar, without reduction.
pub fn mul(point: WirePoint, scalar: U256) -> Result<WirePoint> {
  let product = point_from_wires(point)?.mul_bigint(scalar.as_limbs());
  Ok(point_to_wires(product.into_affine()))
}

/// One batch of double-and-add: processes `bits` least significant first and
/// returns `(acc + k * base, 2^n * base)` where `k` is the batch value.
pub fn exp_batch(acc: WirePoint, base: WirePoint, bits: &[bool]) -> Result<(WirePoint, WirePoint)> {
  let mut acc = point_from_wires(acc)?.into_group();
  let mut base = point_from_wires(base)?.into_group();
  for &bit in bits {
    if bit {
      acc += base;
    }
    base = base + base;
  }
  Ok((point_to_wires(acc.into_affine()), point_to_wires(base.into_affine())))
}
