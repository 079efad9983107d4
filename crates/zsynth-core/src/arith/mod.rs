//! Operators realized by arithmetic placements and their template mapping.

pub mod ops;

use crate::config::Subcircuit;
use revm::bytecode::opcode;
use revm::primitives::U256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
  Add,
  Mul,
  Sub,
  Div,
  SDiv,
  Mod,
  SMod,
  AddMod,
  MulMod,
  Exp,
  SignExtend,
  Lt,
  Gt,
  SLt,
  SGt,
  Eq,
  IsZero,
  And,
  Or,
  Xor,
  Not,
  Byte,
  Shl,
  Shr,
  Sar,
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

impl ArithOp {
  /// Operators sharing an ALU template, with their selector bit.
  const SELECTORS: [(ArithOp, Subcircuit, usize); 25] = [
    (ArithOp::Add, Subcircuit::Alu1, 1),
    (ArithOp::Mul, Subcircuit::Alu1, 2),
    (ArithOp::Sub, Subcircuit::Alu1, 3),
    (ArithOp::Exp, Subcircuit::Alu1, 10),
    (ArithOp::Eq, Subcircuit::Alu1, 20),
    (ArithOp::IsZero, Subcircuit::Alu1, 21),
    (ArithOp::Not, Subcircuit::Alu1, 25),
    (ArithOp::Div, Subcircuit::Alu2, 4),
    (ArithOp::SDiv, Subcircuit::Alu2, 5),
    (ArithOp::Mod, Subcircuit::Alu2, 6),
    (ArithOp::SMod, Subcircuit::Alu2, 7),
    (ArithOp::AddMod, Subcircuit::Alu2, 8),
    (ArithOp::MulMod, Subcircuit::Alu2, 9),
    (ArithOp::Shl, Subcircuit::Alu3, 27),
    (ArithOp::Shr, Subcircuit::Alu3, 28),
    (ArithOp::Sar, Subcircuit::Alu3, 29),
    (ArithOp::Lt, Subcircuit::Alu4, 16),
    (ArithOp::Gt, Subcircuit::Alu4, 17),
    (ArithOp::SLt, Subcircuit::Alu4, 18),
    (ArithOp::SGt, Subcircuit::Alu4, 19),
    (ArithOp::SignExtend, Subcircuit::Alu5, 11),
    (ArithOp::Byte, Subcircuit::Alu5, 26),
    (ArithOp::And, Subcircuit::And, 0),
    (ArithOp::Or, Subcircuit::Or, 0),
    (ArithOp::Xor, Subcircuit::Xor, 0),
  ];

  pub fn subcircuit(self) -> Subcircuit {
    match self {
      ArithOp::DecToBit => Subcircuit::DecToBit,
      ArithOp::SubExpBatch => Subcircuit::SubExpBatch,
      ArithOp::Accumulator => Subcircuit::Accumulator,
      ArithOp::Poseidon => Subcircuit::Poseidon,
      ArithOp::Poseidon2xCompress => Subcircuit::Poseidon2xCompress,
      ArithOp::JubjubExpBatch => Subcircuit::JubjubExpBatch,
      ArithOp::EdDsaVerify => Subcircuit::EdDsaVerify,
      ArithOp::VerifyMerkleProof => Subcircuit::VerifyMerkleProof,
      ArithOp::VerifyMerkleProof2x => Subcircuit::VerifyMerkleProof2x,
      ArithOp::VerifyMerkleProof3x => Subcircuit::VerifyMerkleProof3x,
      alu => Self::SELECTORS
        .iter()
        .find(|(op, _, _)| *op == alu)
        .map(|&(_, subcircuit, _)| subcircuit)
        .unwrap_or(Subcircuit::Alu1),
    }
  }

  /// Static selector prepended to the inputs of ALU placements.
  pub fn selector(self) -> Option<U256> {
    Self::SELECTORS
      .iter()
      .find(|(op, subcircuit, _)| *op == self && subcircuit.name().starts_with("ALU"))
      .map(|&(_, _, bit)| U256::from(1u64) << bit)
  }

  /// Inverse of [`ArithOp::selector`] for one ALU template.
  pub fn from_selector(subcircuit: Subcircuit, selector: U256) -> Option<Self> {
    Self::SELECTORS
      .iter()
      .find(|&&(_, sc, bit)| sc == subcircuit && selector == U256::from(1u64) << bit)
      .map(|&(op, _, _)| op)
  }

  /// ALU3 and ALU5 take a shift or byte index as first operand and reject
  /// anything above 255.
  pub fn has_byte_sized_first_operand(self) -> bool {
    matches!(self.subcircuit(), Subcircuit::Alu3 | Subcircuit::Alu5)
  }

  pub fn from_opcode(op: u8) -> Option<Self> {
    Some(match op {
      opcode::ADD => ArithOp::Add,
      opcode::MUL => ArithOp::Mul,
      opcode::SUB => ArithOp::Sub,
      opcode::DIV => ArithOp::Div,
      opcode::SDIV => ArithOp::SDiv,
      opcode::MOD => ArithOp::Mod,
      opcode::SMOD => ArithOp::SMod,
      opcode::ADDMOD => ArithOp::AddMod,
      opcode::MULMOD => ArithOp::MulMod,
      opcode::EXP => ArithOp::Exp,
      opcode::SIGNEXTEND => ArithOp::SignExtend,
      opcode::LT => ArithOp::Lt,
      opcode::GT => ArithOp::Gt,
      opcode::SLT => ArithOp::SLt,
      opcode::SGT => ArithOp::SGt,
      opcode::EQ => ArithOp::Eq,
      opcode::ISZERO => ArithOp::IsZero,
      opcode::AND => ArithOp::And,
      opcode::OR => ArithOp::Or,
      opcode::XOR => ArithOp::Xor,
      opcode::NOT => ArithOp::Not,
      opcode::BYTE => ArithOp::Byte,
      opcode::SHL => ArithOp::Shl,
      opcode::SHR => ArithOp::Shr,
      opcode::SAR => ArithOp::Sar,
      _ => return None,
    })
  }

  /// Usage label recorded on placements.
  pub fn usage(self) -> &'static str {
    match self {
      ArithOp::Add => "ADD",
      ArithOp::Mul => "MUL",
      ArithOp::Sub => "SUB",
      ArithOp::Div => "DIV",
      ArithOp::SDiv => "SDIV",
      ArithOp::Mod => "MOD",
      ArithOp::SMod => "SMOD",
      ArithOp::AddMod => "ADDMOD",
      ArithOp::MulMod => "MULMOD",
      ArithOp::Exp => "EXP",
      ArithOp::SignExtend => "SIGNEXTEND",
      ArithOp::Lt => "LT",
      ArithOp::Gt => "GT",
      ArithOp::SLt => "SLT",
      ArithOp::SGt => "SGT",
      ArithOp::Eq => "EQ",
      ArithOp::IsZero => "ISZERO",
      ArithOp::And => "AND",
      ArithOp::Or => "OR",
      ArithOp::Xor => "XOR",
      ArithOp::Not => "NOT",
      ArithOp::Byte => "BYTE",
      ArithOp::Shl => "SHL",
      ArithOp::Shr => "SHR",
      ArithOp::Sar => "SAR",
      ArithOp::DecToBit => "DecToBit",
      ArithOp::SubExpBatch => "SubExpBatch",
      ArithOp::Accumulator => "Accumulator",
      ArithOp::Poseidon => "Poseidon",
      ArithOp::Poseidon2xCompress => "Poseidon2xCompress",
      ArithOp::JubjubExpBatch => "JubjubExpBatch",
      ArithOp::EdDsaVerify => "EdDsaVerify",
      ArithOp::VerifyMerkleProof => "VerifyMerkleProof",
      ArithOp::VerifyMerkleProof2x => "VerifyMerkleProof2x",
      ArithOp::VerifyMerkleProof3x => "VerifyMerkleProof3x",
    }
  }

  /// Bit width of every output wire.
  pub fn output_bit_size(self) -> usize {
    match self {
      ArithOp::DecToBit => 1,
      ArithOp::Poseidon | ArithOp::Poseidon2xCompress | ArithOp::JubjubExpBatch => 255,
      _ => 256,
    }
  }

  /// Number of chained tree levels checked by a Merkle verification operator.
  pub fn merkle_levels(self) -> Option<usize> {
    match self {
      ArithOp::VerifyMerkleProof => Some(1),
      ArithOp::VerifyMerkleProof2x => Some(2),
      ArithOp::VerifyMerkleProof3x => Some(3),
      _ => None,
    }
  }

  pub fn merkle_for_levels(levels: usize) -> Option<Self> {
    match levels {
      1 => Some(ArithOp::VerifyMerkleProof),
      2 => Some(ArithOp::VerifyMerkleProof2x),
      3 => Some(ArithOp::VerifyMerkleProof3x),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_alu_selectors() {
    assert_eq!(ArithOp::Add.subcircuit(), Subcircuit::Alu1);
    assert_eq!(ArithOp::Add.selector(), Some(U256::from(2u64)));
    assert_eq!(ArithOp::MulMod.subcircuit(), Subcircuit::Alu2);
    assert_eq!(ArithOp::Sar.selector(), Some(U256::from(1u64) << 29));
    assert_eq!(ArithOp::Byte.subcircuit(), Subcircuit::Alu5);
    assert_eq!(ArithOp::And.selector(), None);
    assert_eq!(ArithOp::Poseidon.selector(), None);
  }

  #[test]
  fn test_selector_round_trip() {
    for &(op, subcircuit, _) in &ArithOp::SELECTORS {
      if let Some(selector) = op.selector() {
        assert_eq!(ArithOp::from_selector(subcircuit, selector), Some(op));
      }
    }
    assert_eq!(ArithOp::from_selector(Subcircuit::Alu2, U256::from(2u64)), None);
  }

  #[test]
  fn test_opcode_mapping() {
    assert_eq!(ArithOp::from_opcode(opcode::SHR), Some(ArithOp::Shr));
    assert_eq!(ArithOp::from_opcode(opcode::KECCAK256), None);
    assert!(ArithOp::Shl.has_byte_sized_first_operand());
    assert!(!ArithOp::Add.has_byte_sized_first_operand());
  }
}
