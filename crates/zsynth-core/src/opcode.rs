//! Stack effects of the instructions the synthesizer models.

use revm::bytecode::opcode::{self, OpCode};

// ============================================================
// Number of stack inputs/outputs per opcode
// ============================================================

/// How many values this opcode pops from the stack, or `None` when the
/// synthesizer has no model for it.
pub fn opcode_input_count(op: u8) -> Option<usize> {
  Some(match op {
    opcode::STOP | opcode::JUMPDEST | opcode::PC | opcode::MSIZE | opcode::GAS => 0,
    opcode::ADD
    | opcode::SUB
    | opcode::MUL
    | opcode::DIV
    | opcode::SDIV
    | opcode::MOD
    | opcode::SMOD
    | opcode::EXP
    | opcode::SIGNEXTEND => 2,
    opcode::ADDMOD | opcode::MULMOD => 3,
    opcode::LT | opcode::GT | opcode::SLT | opcode::SGT | opcode::EQ => 2,
    opcode::ISZERO | opcode::NOT => 1,
    opcode::AND | opcode::OR | opcode::XOR | opcode::BYTE | opcode::SHL | opcode::SHR | opcode::SAR => 2,
    opcode::KECCAK256 => 2,
    opcode::ADDRESS
    | opcode::ORIGIN
    | opcode::CALLER
    | opcode::CALLVALUE
    | opcode::CALLDATASIZE
    | opcode::CODESIZE
    | opcode::GASPRICE
    | opcode::RETURNDATASIZE => 0,
    opcode::BALANCE | opcode::CALLDATALOAD | opcode::EXTCODESIZE | opcode::EXTCODEHASH => 1,
    opcode::CALLDATACOPY | opcode::CODECOPY | opcode::RETURNDATACOPY => 3,
    opcode::EXTCODECOPY => 4,
    opcode::BLOCKHASH => 1,
    opcode::COINBASE
    | opcode::TIMESTAMP
    | opcode::NUMBER
    | opcode::DIFFICULTY
    | opcode::GASLIMIT
    | opcode::CHAINID
    | opcode::SELFBALANCE
    | opcode::BASEFEE => 0,
    opcode::POP | opcode::MLOAD | opcode::SLOAD | opcode::JUMP => 1,
    opcode::MSTORE | opcode::MSTORE8 | opcode::SSTORE | opcode::JUMPI => 2,
    opcode::MCOPY => 3,
    op if (opcode::PUSH0..=opcode::PUSH32).contains(&op) => 0,
    op if (opcode::DUP1..=opcode::DUP16).contains(&op) => (op - opcode::DUP1 + 1) as usize,
    op if (opcode::SWAP1..=opcode::SWAP16).contains(&op) => (op - opcode::SWAP1 + 2) as usize,
    op if (opcode::LOG0..=opcode::LOG4).contains(&op) => (op - opcode::LOG0 + 2) as usize,
    opcode::CALL | opcode::CALLCODE => 7,
    opcode::DELEGATECALL | opcode::STATICCALL => 6,
    opcode::RETURN | opcode::REVERT => 2,
    _ => return None,
  })
}

/// How many values this opcode pushes onto the stack.
pub fn opcode_output_count(op: u8) -> Option<usize> {
  Some(match op {
    opcode::STOP | opcode::JUMPDEST | opcode::JUMP | opcode::JUMPI | opcode::POP => 0,
    opcode::MSTORE | opcode::MSTORE8 | opcode::SSTORE | opcode::MCOPY => 0,
    opcode::CALLDATACOPY | opcode::CODECOPY | opcode::RETURNDATACOPY | opcode::EXTCODECOPY => 0,
    opcode::RETURN | opcode::REVERT => 0,
    op if (opcode::LOG0..=opcode::LOG4).contains(&op) => 0,
    op if (opcode::DUP1..=opcode::DUP16).contains(&op) => (op - opcode::DUP1 + 2) as usize,
    op if (opcode::SWAP1..=opcode::SWAP16).contains(&op) => (op - opcode::SWAP1 + 2) as usize,
    op => {
      opcode_input_count(op)?;
      1
    }
  })
}

pub fn opcode_name(op: u8) -> &'static str {
  OpCode::new(op).map(|code| code.as_str()).unwrap_or("UNKNOWN")
}

/// Immediate bytes following a PUSH opcode.
pub fn push_size(op: u8) -> Option<usize> {
  (opcode::PUSH0..=opcode::PUSH32)
    .contains(&op)
    .then(|| (op - opcode::PUSH0) as usize)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_stack_effects() {
    assert_eq!(opcode_input_count(opcode::ADD), Some(2));
    assert_eq!(opcode_output_count(opcode::ADD), Some(1));
    assert_eq!(opcode_input_count(opcode::DUP3), Some(3));
    assert_eq!(opcode_output_count(opcode::DUP3), Some(4));
    assert_eq!(opcode_input_count(opcode::SWAP1), Some(2));
    assert_eq!(opcode_input_count(opcode::LOG2), Some(4));
    assert_eq!(opcode_output_count(opcode::CALL), Some(1));
    assert_eq!(opcode_output_count(opcode::SSTORE), Some(0));
  }

  #[test]
  fn test_unmodelled_opcodes() {
    assert_eq!(opcode_input_count(opcode::CREATE), None);
    assert_eq!(opcode_output_count(opcode::SELFDESTRUCT), None);
    assert_eq!(opcode_input_count(opcode::TLOAD), None);
  }

  #[test]
  fn test_names_and_push_sizes() {
    assert_eq!(opcode_name(opcode::KECCAK256), "KECCAK256");
    assert_eq!(push_size(opcode::PUSH0), Some(0));
    assert_eq!(push_size(opcode::PUSH32), Some(32));
    assert_eq!(push_size(opcode::ADD), None);
  }
}
