//! Native semantics of every operator, shared by placement capture and the
//! native witness evaluator.

use super::ArithOp;
use crate::crypto::{jubjub, merkle, poseidon_u256};
use crate::error::{Result, SynthError};
use revm::primitives::U256;

const SIGN_BIT: usize = 255;

fn sign_mask() -> U256 {
  U256::from(1u64) << SIGN_BIT
}

fn is_negative(x: U256) -> bool {
  x.bit(SIGN_BIT)
}

fn negate(x: U256) -> U256 {
  (!x).wrapping_add(U256::from(1u64))
}

fn abs(x: U256) -> U256 {
  if is_negative(x) { negate(x) } else { x }
}

fn bool_word(b: bool) -> U256 {
  if b { U256::from(1u64) } else { U256::ZERO }
}

/// `Some(n)` when `x` fits a machine word.
fn small(x: U256) -> Option<usize> {
  (x.bit_len() <= 32).then(|| x.as_limbs()[0] as usize)
}

fn bits_of(values: &[U256]) -> Result<Vec<bool>> {
  values
    .iter()
    .map(|v| match small(*v) {
      Some(0) => Ok(false),
      Some(1) => Ok(true),
      _ => Err(SynthError::precondition(format!("{v:#x} is not a bit"))),
    })
    .collect()
}

fn expect_arity(op: ArithOp, inputs: &[U256], ok: bool) -> Result<()> {
  if !ok {
    return Err(SynthError::precondition(format!(
      "{} does not accept {} inputs",
      op.usage(),
      inputs.len()
    )));
  }
  Ok(())
}

pub fn sdiv(a: U256, b: U256) -> U256 {
  if b.is_zero() {
    return U256::ZERO;
  }
  let quotient = abs(a) / abs(b);
  if is_negative(a) != is_negative(b) { negate(quotient) } else { quotient }
}

pub fn smod(a: U256, b: U256) -> U256 {
  if b.is_zero() {
    return U256::ZERO;
  }
  let remainder = abs(a) % abs(b);
  if is_negative(a) { negate(remainder) } else { remainder }
}

pub fn slt(a: U256, b: U256) -> bool {
  (a ^ sign_mask()) < (b ^ sign_mask())
}

pub fn shl(shift: U256, value: U256) -> U256 {
  match small(shift) {
    Some(s) if s < 256 => value << s,
    _ => U256::ZERO,
  }
}

pub fn shr(shift: U256, value: U256) -> U256 {
  match small(shift) {
    Some(s) if s < 256 => value >> s,
    _ => U256::ZERO,
  }
}

pub fn sar(shift: U256, value: U256) -> U256 {
  let fill = if is_negative(value) { U256::MAX } else { U256::ZERO };
  match small(shift) {
    Some(0) => value,
    Some(s) if s < 256 => (value >> s) | (fill << (256 - s)),
    _ => fill,
  }
}

pub fn byte(index: U256, value: U256) -> U256 {
  match small(index) {
    Some(i) if i < 32 => (value >> (248 - 8 * i)) & U256::from(0xffu64),
    _ => U256::ZERO,
  }
}

pub fn signextend(k: U256, value: U256) -> U256 {
  match small(k) {
    Some(k) if k < 31 => {
      let bit = 8 * k + 7;
      let mask = (U256::from(1u64) << (bit + 1)) - U256::from(1u64);
      if value.bit(bit) { value | !mask } else { value & mask }
    }
    _ => value,
  }
}

/// `[c * a^k, a^(2^n)] mod 2^256` where `k` is the batch of bits, LSB first.
pub fn sub_exp_batch(c: U256, a: U256, bits: &[bool]) -> [U256; 2] {
  let mut acc = c;
  let mut base = a;
  for &bit in bits {
    if bit {
      acc = acc.wrapping_mul(base);
    }
    base = base.wrapping_mul(base);
  }
  [acc, base]
}

/// Evaluate `op` on its operands (ALU selectors excluded).
pub fn evaluate(op: ArithOp, inputs: &[U256]) -> Result<Vec<U256>> {
  let n = inputs.len();
  let one = |v: U256| Ok(vec![v]);
  match op {
    ArithOp::IsZero | ArithOp::Not | ArithOp::DecToBit => expect_arity(op, inputs, n == 1)?,
    ArithOp::AddMod | ArithOp::MulMod => expect_arity(op, inputs, n == 3)?,
    ArithOp::SubExpBatch => expect_arity(op, inputs, n >= 2)?,
    ArithOp::Accumulator => expect_arity(op, inputs, n >= 1)?,
    ArithOp::Poseidon => expect_arity(op, inputs, n == 4)?,
    ArithOp::Poseidon2xCompress => expect_arity(op, inputs, n == 16)?,
    ArithOp::JubjubExpBatch => expect_arity(op, inputs, n >= 4)?,
    ArithOp::EdDsaVerify => expect_arity(op, inputs, n == 6)?,
    ArithOp::VerifyMerkleProof | ArithOp::VerifyMerkleProof2x | ArithOp::VerifyMerkleProof3x => {
      let levels = op.merkle_levels().unwrap_or(1);
      expect_arity(op, inputs, n == 4 + 3 * levels)?
    }
    _ => expect_arity(op, inputs, n == 2)?,
  }

  match op {
    ArithOp::Add => one(inputs[0].wrapping_add(inputs[1])),
    ArithOp::Mul => one(inputs[0].wrapping_mul(inputs[1])),
    ArithOp::Sub => one(inputs[0].wrapping_sub(inputs[1])),
    ArithOp::Div => one(inputs[0].checked_div(inputs[1]).unwrap_or_default()),
    ArithOp::SDiv => one(sdiv(inputs[0], inputs[1])),
    ArithOp::Mod => one(inputs[0].checked_rem(inputs[1]).unwrap_or_default()),
    ArithOp::SMod => one(smod(inputs[0], inputs[1])),
    ArithOp::AddMod => one(inputs[0].add_mod(inputs[1], inputs[2])),
    ArithOp::MulMod => one(inputs[0].mul_mod(inputs[1], inputs[2])),
    ArithOp::Exp => one(inputs[0].wrapping_pow(inputs[1])),
    ArithOp::SignExtend => one(signextend(inputs[0], inputs[1])),
    ArithOp::Lt => one(bool_word(inputs[0] < inputs[1])),
    ArithOp::Gt => one(bool_word(inputs[0] > inputs[1])),
    ArithOp::SLt => one(bool_word(slt(inputs[0], inputs[1]))),
    ArithOp::SGt => one(bool_word(slt(inputs[1], inputs[0]))),
    ArithOp::Eq => one(bool_word(inputs[0] == inputs[1])),
    ArithOp::IsZero => one(bool_word(inputs[0].is_zero())),
    ArithOp::And => one(inputs[0] & inputs[1]),
    ArithOp::Or => one(inputs[0] | inputs[1]),
    ArithOp::Xor => one(inputs[0] ^ inputs[1]),
    ArithOp::Not => one(!inputs[0]),
    ArithOp::Byte => one(byte(inputs[0], inputs[1])),
    ArithOp::Shl => one(shl(inputs[0], inputs[1])),
    ArithOp::Shr => one(shr(inputs[0], inputs[1])),
    ArithOp::Sar => one(sar(inputs[0], inputs[1])),
    ArithOp::DecToBit => Ok((0..256).map(|i| bool_word(inputs[0].bit(i))).collect()),
    ArithOp::SubExpBatch => {
      let bits = bits_of(&inputs[2..])?;
      Ok(sub_exp_batch(inputs[0], inputs[1], &bits).to_vec())
    }
    ArithOp::Accumulator => one(inputs.iter().fold(U256::ZERO, |acc, v| acc.wrapping_add(*v))),
    ArithOp::Poseidon => one(poseidon_u256(&[inputs[0], inputs[1], inputs[2], inputs[3]])?),
    ArithOp::Poseidon2xCompress => {
      let mut level = [U256::ZERO; 4];
      for (slot, chunk) in level.iter_mut().zip(inputs.chunks(4)) {
        *slot = poseidon_u256(&[chunk[0], chunk[1], chunk[2], chunk[3]])?;
      }
      one(poseidon_u256(&level)?)
    }
    ArithOp::JubjubExpBatch => {
      let bits = bits_of(&inputs[4..])?;
      let (acc, base) = jubjub::exp_batch((inputs[0], inputs[1]), (inputs[2], inputs[3]), &bits)?;
      Ok(vec![acc.0, acc.1, base.0, base.1])
    }
    ArithOp::EdDsaVerify => {
      let s_g = (inputs[0], inputs[1]);
      let r = (inputs[2], inputs[3]);
      let e_a = (inputs[4], inputs[5]);
      if jubjub::add(r, e_a)? != jubjub::point_from_wires(s_g).map(jubjub::point_to_wires)? {
        return Err(SynthError::precondition("EdDSA signature verification failed"));
      }
      Ok(Vec::new())
    }
    ArithOp::VerifyMerkleProof | ArithOp::VerifyMerkleProof2x | ArithOp::VerifyMerkleProof3x => {
      let levels: Vec<[U256; 3]> = inputs[2..n - 2]
        .chunks(3)
        .map(|c| [c[0], c[1], c[2]])
        .collect();
      let (index, node) = merkle::climb(inputs[0], inputs[1], &levels)?;
      if node != inputs[n - 1] || index != inputs[n - 2] {
        return Err(SynthError::precondition(format!(
          "Merkle path from index {:#x} does not reach {:#x} at index {:#x}",
          inputs[0],
          inputs[n - 1],
          inputs[n - 2]
        )));
      }
      Ok(Vec::new())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn u(v: u64) -> U256 {
    U256::from(v)
  }

  fn neg(v: u64) -> U256 {
    negate(U256::from(v))
  }

  #[test]
  fn test_add_wraps() {
    assert_eq!(evaluate(ArithOp::Add, &[u(5), u(7)]).unwrap(), vec![u(12)]);
    assert_eq!(evaluate(ArithOp::Add, &[U256::MAX, u(1)]).unwrap(), vec![U256::ZERO]);
  }

  #[test]
  fn test_division_by_zero_is_zero() {
    assert_eq!(evaluate(ArithOp::Div, &[u(5), U256::ZERO]).unwrap(), vec![U256::ZERO]);
    assert_eq!(evaluate(ArithOp::Mod, &[u(5), U256::ZERO]).unwrap(), vec![U256::ZERO]);
    assert_eq!(evaluate(ArithOp::AddMod, &[u(5), u(6), U256::ZERO]).unwrap(), vec![U256::ZERO]);
  }

  #[test]
  fn test_signed_ops() {
    assert_eq!(sdiv(neg(7), u(2)), neg(3));
    assert_eq!(smod(neg(7), u(2)), neg(1));
    assert!(slt(neg(1), u(0)));
    assert!(!slt(u(0), neg(1)));
    // INT_MIN / -1 wraps to INT_MIN
    assert_eq!(sdiv(sign_mask(), U256::MAX), sign_mask());
  }

  #[test]
  fn test_shifts() {
    assert_eq!(shl(u(4), u(1)), u(16));
    assert_eq!(shl(u(256), u(1)), U256::ZERO);
    assert_eq!(shr(u(1), u(4)), u(2));
    assert_eq!(sar(u(4), neg(32)), neg(2));
    assert_eq!(sar(u(300), neg(32)), U256::MAX);
    assert_eq!(sar(u(300), u(32)), U256::ZERO);
  }

  #[test]
  fn test_byte_and_signextend() {
    let value = U256::from_be_slice(&[0xab; 32]);
    assert_eq!(byte(u(0), value), u(0xab));
    assert_eq!(byte(u(32), value), U256::ZERO);
    assert_eq!(signextend(u(0), u(0xff)), U256::MAX);
    assert_eq!(signextend(u(0), u(0x7f)), u(0x7f));
    assert_eq!(signextend(u(31), u(0xff)), u(0xff));
  }

  #[test]
  fn test_dec_to_bit_is_lsb_first() {
    let bits = evaluate(ArithOp::DecToBit, &[u(0b101)]).unwrap();
    assert_eq!(bits.len(), 256);
    assert_eq!(&bits[..4], &[u(1), u(0), u(1), u(0)]);
  }

  #[test]
  fn test_sub_exp_batches_compose() {
    let bits: Vec<bool> = (0..8).map(|i| (13u64 >> i) & 1 == 1).collect();
    let [first, base] = sub_exp_batch(u(1), u(3), &bits[..4]);
    let [result, _] = sub_exp_batch(first, base, &bits[4..]);
    assert_eq!(result, u(3u64.pow(13)));
  }

  #[test]
  fn test_rejects_wrong_arity() {
    assert!(evaluate(ArithOp::Add, &[u(1)]).is_err());
    assert!(evaluate(ArithOp::Poseidon, &[u(1); 3]).is_err());
    assert!(evaluate(ArithOp::SubExpBatch, &[u(1), u(2), u(3)]).is_err());
  }
}
