//! Signed L2 transactions and the chain facts they execute against.

use crate::buffer::{ReservedVariable, TRANSACTION_INPUTS};
use crate::crypto::eddsa::{self, EddsaKeypair, MESSAGE_WORDS, Signature};
use crate::crypto::jubjub::WirePoint;
use crate::data_point::validate_value;
use crate::error::{Result, SynthError};
use crate::trace::ExecutionTrace;
use revm::bytecode::opcode;
use revm::primitives::{Address, U256};

pub const SELECTOR_BYTES: usize = 4;
pub const CALLDATA_LEN: usize = SELECTOR_BYTES + 32 * TRANSACTION_INPUTS;

pub fn address_word(address: Address) -> U256 {
  U256::from_be_slice(address.as_slice())
}

pub fn word_address(word: U256) -> Address {
  Address::from_slice(&word.to_be_bytes::<32>()[12..])
}

/// A call into one contract function with at most nine word arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct L2Transaction {
  pub nonce: U256,
  pub contract: Address,
  pub selector: [u8; SELECTOR_BYTES],
  pub inputs: [U256; TRANSACTION_INPUTS],
}

impl L2Transaction {
  pub fn new(nonce: u64, contract: Address, selector: [u8; SELECTOR_BYTES], inputs: &[U256]) -> Result<Self> {
    if inputs.len() > TRANSACTION_INPUTS {
      return Err(SynthError::precondition(format!(
        "{} call arguments, at most {TRANSACTION_INPUTS} are supported",
        inputs.len()
      )));
    }
    let mut padded = [U256::ZERO; TRANSACTION_INPUTS];
    for (slot, input) in padded.iter_mut().zip(inputs) {
      validate_value(*input, 255)?;
      *slot = *input;
    }
    Ok(Self {
      nonce: U256::from(nonce),
      contract,
      selector,
      inputs: padded,
    })
  }

  pub fn selector_word(&self) -> U256 {
    U256::from_be_slice(&self.selector)
  }

  /// Words covered by the signature.
  pub fn message(&self) -> [U256; MESSAGE_WORDS] {
    let mut message = [U256::ZERO; MESSAGE_WORDS];
    message[0] = self.nonce;
    message[1] = address_word(self.contract);
    message[2] = self.selector_word();
    message[3..].copy_from_slice(&self.inputs);
    message
  }

  /// Selector followed by the nine arguments as 32-byte words.
  pub fn calldata(&self) -> Vec<u8> {
    let mut data = Vec::with_capacity(CALLDATA_LEN);
    data.extend_from_slice(&self.selector);
    for input in &self.inputs {
      data.extend_from_slice(&input.to_be_bytes::<32>());
    }
    data
  }

  pub fn sign(self, keypair: &EddsaKeypair) -> Result<SignedTransaction> {
    let signature = keypair.sign(&self.message())?;
    Ok(SignedTransaction {
      tx: self,
      public_key: keypair.public_key(),
      signature,
    })
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTransaction {
  pub tx: L2Transaction,
  pub public_key: WirePoint,
  pub signature: Signature,
}

impl SignedTransaction {
  pub fn verify(&self) -> Result<()> {
    if !eddsa::verify(&self.signature, self.public_key, &self.tx.message())? {
      return Err(SynthError::precondition("transaction signature does not verify"));
    }
    Ok(())
  }

  pub fn sender(&self) -> Result<Address> {
    Ok(word_address(eddsa::address_of(self.public_key)?))
  }
}

/// Chain facts fed through the block input buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockInfo {
  pub coinbase: Address,
  pub timestamp: U256,
  pub number: U256,
  pub prevrandao: U256,
  pub gas_limit: U256,
  pub chain_id: U256,
  pub self_balance: U256,
  pub base_fee: U256,
  /// `block_hashes[i]` is the hash of block `number - 1 - i`.
  pub block_hashes: Vec<U256>,
}

impl BlockInfo {
  /// Value of a block-input variable.
  pub fn value(&self, variable: ReservedVariable) -> Option<U256> {
    use ReservedVariable as V;
    Some(match variable {
      V::Coinbase => address_word(self.coinbase),
      V::Timestamp => self.timestamp,
      V::Number => self.number,
      V::Prevrandao => self.prevrandao,
      V::GasLimit => self.gas_limit,
      V::ChainId => self.chain_id,
      V::SelfBalance => self.self_balance,
      V::BaseFee => self.base_fee,
      V::BlockHash(n) => self
        .block_hashes
        .get((n as usize).checked_sub(1)?)
        .copied()
        .unwrap_or_default(),
      _ => return None,
    })
  }

  /// How many blocks before the current one `requested` is, if it is one of
  /// the 256 addressable ancestors.
  pub fn ancestor_distance(&self, requested: U256) -> Option<u16> {
    if requested >= self.number {
      return None;
    }
    let distance = self.number - requested;
    (distance <= U256::from(256u64)).then(|| distance.as_limbs()[0] as u16)
  }

  /// Take every fact the trace observed from the interpreter. Only frames
  /// acting on `contract` report its balance.
  pub fn absorb_trace(&mut self, contract: Address, trace: &ExecutionTrace) {
    let outputs = trace.step_outputs();
    for (step, output) in &outputs {
      let Some(value) = *output else { continue };
      match step.opcode {
        opcode::COINBASE => self.coinbase = word_address(value),
        opcode::TIMESTAMP => self.timestamp = value,
        opcode::NUMBER => self.number = value,
        opcode::DIFFICULTY => self.prevrandao = value,
        opcode::GASLIMIT => self.gas_limit = value,
        opcode::CHAINID => self.chain_id = value,
        opcode::SELFBALANCE if step.this_address == contract => self.self_balance = value,
        opcode::BASEFEE => self.base_fee = value,
        _ => {}
      }
    }
    for (step, output) in &outputs {
      if step.opcode != opcode::BLOCKHASH {
        continue;
      }
      let (Some(value), Some(requested)) = (*output, step.stack.first()) else { continue };
      if let Some(n) = self.ancestor_distance(*requested) {
        let slot = n as usize - 1;
        if self.block_hashes.len() <= slot {
          self.block_hashes.resize(slot + 1, U256::ZERO);
        }
        self.block_hashes[slot] = value;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::trace::{FinalState, MessageKind, MessageRecord, StepRecord, TraceEvent};

  fn tx() -> L2Transaction {
    L2Transaction::new(3, Address::repeat_byte(0x11), [0xde, 0xad, 0xbe, 0xef], &[U256::from(5u64)]).unwrap()
  }

  #[test]
  fn test_calldata_layout() {
    let data = tx().calldata();
    assert_eq!(data.len(), CALLDATA_LEN);
    assert_eq!(&data[..4], &[0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(U256::from_be_slice(&data[4..36]), U256::from(5u64));
    assert!(data[36..].iter().all(|b| *b == 0));
  }

  #[test]
  fn test_signed_transaction_verifies() {
    let keypair = EddsaKeypair::from_seed(b"transaction test key").unwrap();
    let signed = tx().sign(&keypair).unwrap();
    signed.verify().unwrap();
    let sender = signed.sender().unwrap();
    assert_eq!(address_word(sender), eddsa::address_of(keypair.public_key()).unwrap());

    let mut tampered = signed.clone();
    tampered.tx.inputs[0] = U256::from(6u64);
    assert!(tampered.verify().is_err());
  }

  #[test]
  fn test_too_many_inputs() {
    let inputs = vec![U256::ZERO; TRANSACTION_INPUTS + 1];
    assert!(L2Transaction::new(0, Address::ZERO, [0; 4], &inputs).is_err());
  }

  #[test]
  fn test_block_hash_lookup() {
    let info = BlockInfo {
      number: U256::from(1000u64),
      block_hashes: vec![U256::from(1u64), U256::from(2u64)],
      ..BlockInfo::default()
    };
    assert_eq!(info.ancestor_distance(U256::from(999u64)), Some(1));
    assert_eq!(info.ancestor_distance(U256::from(1000u64)), None);
    assert_eq!(info.ancestor_distance(U256::from(743u64)), None);
    assert_eq!(info.value(ReservedVariable::BlockHash(2)), Some(U256::from(2u64)));
    assert_eq!(info.value(ReservedVariable::BlockHash(200)), Some(U256::ZERO));
    assert_eq!(info.value(ReservedVariable::ConstOne), None);
  }

  fn record(opcode: u8, depth: usize, this_address: Address, stack: &[u64]) -> TraceEvent {
    TraceEvent::Step(StepRecord {
      pc: 0,
      opcode,
      depth,
      stack: stack.iter().map(|v| U256::from(*v)).collect(),
      memory: Vec::new(),
      code_address: this_address,
      this_address,
      caller: Address::ZERO,
      origin: Address::ZERO,
    })
  }

  fn boundary(depth: usize, target: Address) -> TraceEvent {
    TraceEvent::BeforeMessage(MessageRecord {
      depth,
      kind: MessageKind::Call,
      caller: Address::ZERO,
      target,
      code_address: target,
      value: U256::ZERO,
      calldata: Vec::new(),
    })
  }

  fn halt(depth: usize) -> TraceEvent {
    TraceEvent::AfterMessage(FinalState {
      depth,
      success: true,
      return_data: Vec::new(),
      stack: Vec::new(),
      memory: Vec::new(),
    })
  }

  #[test]
  fn test_callee_balance_is_not_absorbed() {
    let contract = Address::repeat_byte(0xcc);
    let callee = Address::repeat_byte(0xdd);
    let trace = ExecutionTrace {
      events: vec![
        boundary(0, contract),
        record(opcode::SELFBALANCE, 0, contract, &[]),
        record(opcode::CALL, 0, contract, &[5]),
        boundary(1, callee),
        record(opcode::SELFBALANCE, 1, callee, &[]),
        record(opcode::STOP, 1, callee, &[9]),
        halt(1),
        record(opcode::STOP, 0, contract, &[1, 5]),
        halt(0),
      ],
      writes: Vec::new(),
    };
    let mut info = BlockInfo::default();
    info.absorb_trace(contract, &trace);
    assert_eq!(info.self_balance, U256::from(5u64));

    let mut from_callee = BlockInfo::default();
    from_callee.absorb_trace(callee, &trace);
    assert_eq!(from_callee.self_balance, U256::from(9u64));
  }
}
