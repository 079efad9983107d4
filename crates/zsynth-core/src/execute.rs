//! revm host: runs a signed transaction under an inspector that records the
//! trace the synthesizer consumes.
//!
//! KECCAK256 results are rewritten in place with the Poseidon digest of the
//! hashed bytes, so that the interpreter and the circuit agree on every
//! hash-derived value (mapping slots in particular).

use crate::circuit::{self, Circuit, WitnessEvaluator};
use crate::config::{Catalogue, FrontendConfig};
use crate::crypto::poseidon::poseidon_bytes;
use crate::error::{Result, SynthError};
use crate::storage::MerkleStorage;
use crate::synthesizer::{SynthesisOutput, Synthesizer};
use crate::trace::{ExecutionTrace, FinalState, MessageKind, MessageRecord, StepRecord, StorageWrite, TraceEvent};
use crate::transaction::{BlockInfo, SignedTransaction};
use revm::{
  Context, InspectEvm, Inspector, MainBuilder, MainContext,
  bytecode::opcode,
  context::TxEnv,
  database::{CacheDB, EmptyDB},
  interpreter::{
    CallInputs, CallOutcome, Interpreter, InterpreterTypes, Stack,
    interpreter_types::{Jumps, MemoryTr, StackTr},
  },
  primitives::{Address, Bytes, TxKind, U256},
  state::{AccountInfo, Bytecode},
};
use tracing::{debug, info, instrument};

const GAS_LIMIT: u64 = 1_000_000;

// ============================================================
// Trace recorder
// ============================================================

#[derive(Debug)]
struct Frame {
  code_address: Address,
  this_address: Address,
  caller: Address,
  /// Writes made by this frame and its committed children.
  journal: Vec<StorageWrite>,
  /// Most recent step, the one that opens a nested message.
  last_step: Option<StepRecord>,
  /// Stack (top first) and memory after the most recent step.
  post: (Vec<U256>, Vec<u8>),
}

/// Inspector turning one revm transaction into an [`ExecutionTrace`].
#[derive(Debug)]
pub struct TraceRecorder {
  origin: Address,
  calldata: Vec<u8>,
  value: U256,
  frames: Vec<Frame>,
  /// Byte range hashed by the KECCAK256 about to execute.
  pending_hash: Option<(usize, usize)>,
  events: Vec<TraceEvent>,
  writes: Vec<StorageWrite>,
  failure: Option<SynthError>,
}

impl TraceRecorder {
  pub fn new(origin: Address, calldata: Vec<u8>, value: U256) -> Self {
    Self {
      origin,
      calldata,
      value,
      frames: Vec::new(),
      pending_hash: None,
      events: Vec::new(),
      writes: Vec::new(),
      failure: None,
    }
  }

  /// The recorded trace, or the first error hit while recording.
  pub fn into_trace(self) -> Result<ExecutionTrace> {
    if let Some(failure) = self.failure {
      return Err(failure);
    }
    if !self.frames.is_empty() {
      return Err(SynthError::Host(format!("{} messages never closed", self.frames.len())));
    }
    Ok(ExecutionTrace {
      events: self.events,
      writes: self.writes,
    })
  }

  fn fail(&mut self, error: SynthError) {
    if self.failure.is_none() {
      self.failure = Some(error);
    }
  }

  /// Kind, calldata and value of a nested message, read off the parent's
  /// call step.
  fn nested_message(&self, parent: &Frame) -> Result<(MessageKind, Vec<u8>, U256)> {
    let step = parent
      .last_step
      .as_ref()
      .ok_or_else(|| SynthError::Host("nested message before any parent step".into()))?;
    let kind = MessageKind::from_opcode(step.opcode)
      .ok_or_else(|| SynthError::precondition(format!("message opened by opcode {:#04x}", step.opcode)))?;
    if step.stack.len() < kind.operand_count() {
      return Err(SynthError::Host("call step is missing operands".into()));
    }
    let (value, args) = if kind.has_value() {
      (step.stack[2], 3)
    } else {
      (U256::ZERO, 2)
    };
    let (offset, len) = (step.stack[args], step.stack[args + 1]);
    let calldata = if len.is_zero() {
      Vec::new()
    } else {
      let limit = U256::from(u32::MAX);
      if offset > limit || len > limit {
        return Err(SynthError::precondition("call arguments out of reach"));
      }
      padded_slice(&step.memory, offset.to::<usize>(), len.to::<usize>())
    };
    Ok((kind, calldata, value))
  }
}

fn padded_slice(memory: &[u8], offset: usize, len: usize) -> Vec<u8> {
  (offset..offset + len)
    .map(|addr| memory.get(addr).copied().unwrap_or(0))
    .collect()
}

fn stack_top_first<INTR: InterpreterTypes<Stack = Stack>>(interp: &Interpreter<INTR>) -> Vec<U256> {
  interp.stack.data().iter().rev().copied().collect()
}

fn memory_bytes<INTR: InterpreterTypes>(interp: &Interpreter<INTR>) -> Vec<u8> {
  let size = interp.memory.size();
  interp.memory.slice(0..size).to_vec()
}

impl<CTX, INTR: InterpreterTypes<Stack = Stack>> Inspector<CTX, INTR> for TraceRecorder {
  fn step(&mut self, interp: &mut Interpreter<INTR>, _context: &mut CTX) {
    let opcode = interp.bytecode.opcode();
    let pc = interp.bytecode.pc();
    let stack = stack_top_first(interp);
    let memory = memory_bytes(interp);
    let depth = self.frames.len().saturating_sub(1);
    let Some(frame) = self.frames.last_mut() else {
      self.fail(SynthError::Host("instruction outside of any message".into()));
      return;
    };

    self.pending_hash = None;
    if opcode == opcode::KECCAK256 && stack.len() >= 2 {
      let limit = U256::from(u32::MAX);
      if stack[0] <= limit && stack[1] <= limit {
        self.pending_hash = Some((stack[0].to::<usize>(), stack[1].to::<usize>()));
      }
    }
    if opcode == opcode::SSTORE && stack.len() >= 2 {
      frame.journal.push(StorageWrite {
        address: frame.this_address,
        key: stack[0],
        value: stack[1],
      });
    }

    let step = StepRecord {
      pc,
      opcode,
      depth,
      stack,
      memory,
      code_address: frame.code_address,
      this_address: frame.this_address,
      caller: frame.caller,
      origin: self.origin,
    };
    frame.last_step = Some(step.clone());
    self.events.push(TraceEvent::Step(step));
  }

  fn step_end(&mut self, interp: &mut Interpreter<INTR>, _context: &mut CTX) {
    if let Some((offset, len)) = self.pending_hash.take() {
      let bytes = padded_slice(&memory_bytes(interp), offset, len);
      match poseidon_bytes(&bytes) {
        Ok(digest) => {
          if StackTr::pop(&mut interp.stack).is_none() || !interp.stack.push(digest) {
            self.fail(SynthError::Host("KECCAK256 left no digest to rewrite".into()));
          }
        }
        Err(err) => self.fail(err),
      }
    }
    let post = (stack_top_first(interp), memory_bytes(interp));
    if let Some(frame) = self.frames.last_mut() {
      frame.post = post;
    }
  }

  fn call(&mut self, _context: &mut CTX, inputs: &mut CallInputs) -> Option<CallOutcome> {
    let depth = self.frames.len();
    let message = match self.frames.last() {
      None => Ok((MessageKind::Call, self.calldata.clone(), self.value)),
      Some(parent) => self.nested_message(parent),
    };
    let (kind, calldata, value) = match message {
      Ok(message) => message,
      Err(err) => {
        self.fail(err);
        (MessageKind::Call, Vec::new(), U256::ZERO)
      }
    };
    debug!(depth, ?kind, target = %inputs.target_address, "message recorded");
    self.events.push(TraceEvent::BeforeMessage(MessageRecord {
      depth,
      kind,
      caller: inputs.caller,
      target: inputs.target_address,
      code_address: inputs.bytecode_address,
      value,
      calldata,
    }));
    self.frames.push(Frame {
      code_address: inputs.bytecode_address,
      this_address: inputs.target_address,
      caller: inputs.caller,
      journal: Vec::new(),
      last_step: None,
      post: (Vec::new(), Vec::new()),
    });
    None
  }

  fn call_end(&mut self, _context: &mut CTX, _inputs: &CallInputs, outcome: &mut CallOutcome) {
    let Some(frame) = self.frames.pop() else {
      self.fail(SynthError::Host("message closed twice".into()));
      return;
    };
    let success = outcome.result.result.is_ok();
    let (stack, memory) = frame.post;
    self.events.push(TraceEvent::AfterMessage(FinalState {
      depth: self.frames.len(),
      success,
      return_data: outcome.result.output.to_vec(),
      stack,
      memory,
    }));
    if !success {
      return;
    }
    match self.frames.last_mut() {
      Some(parent) => parent.journal.extend(frame.journal),
      None => self.writes = frame.journal,
    }
  }
}

// ============================================================
// Public API
// ============================================================

/// Contract code deployed before the transaction runs. The transaction's
/// contract additionally holds the registered slots of the storage backend.
#[derive(Clone, Debug, Default)]
pub struct Deployment {
  pub contracts: Vec<(Address, Bytes)>,
}

impl Deployment {
  pub fn new(contract: Address, code: Bytes) -> Self {
    Self {
      contracts: vec![(contract, code)],
    }
  }

  pub fn with_contract(mut self, address: Address, code: Bytes) -> Self {
    self.contracts.push((address, code));
    self
  }

  fn database(&self, contract: Address, storage: &MerkleStorage) -> Result<CacheDB<EmptyDB>> {
    let mut db = CacheDB::new(EmptyDB::default());
    for (address, code) in &self.contracts {
      let bytecode = Bytecode::new_legacy(code.clone());
      db.insert_account_info(*address, AccountInfo::from_bytecode(bytecode));
    }
    for (key, value) in storage.slots() {
      db.insert_account_storage(contract, key, value)
        .map_err(|err| SynthError::Host(format!("failed to seed storage: {err:?}")))?;
    }
    Ok(db)
  }
}

/// Run `tx` from its EdDSA-derived sender and record the trace.
#[instrument(skip_all)]
pub fn record_transaction(
  tx: &SignedTransaction,
  deployment: &Deployment,
  storage: &MerkleStorage,
) -> Result<ExecutionTrace> {
  let sender = tx.sender()?;
  let calldata = tx.tx.calldata();
  let db = deployment.database(tx.tx.contract, storage)?;
  let ctx = Context::mainnet().with_db(db);
  let inspector = TraceRecorder::new(sender, calldata.clone(), U256::ZERO);
  let mut evm = ctx.build_mainnet_with_inspector(inspector);

  let tx_env = TxEnv::builder()
    .caller(sender)
    .kind(TxKind::Call(tx.tx.contract))
    .data(Bytes::from(calldata))
    .value(U256::ZERO)
    .gas_limit(GAS_LIMIT)
    .build()
    .map_err(|err| SynthError::Host(format!("failed to build tx env: {err:?}")))?;

  evm
    .inspect_one_tx(tx_env)
    .map_err(|err| SynthError::Host(format!("failed to execute tx: {err}")))?;

  let recorder = std::mem::replace(&mut evm.inspector, TraceRecorder::new(sender, Vec::new(), U256::ZERO));
  let trace = recorder.into_trace()?;
  info!(events = trace.events.len(), writes = trace.writes.len(), "trace recorded");
  Ok(trace)
}

/// Record `tx` with revm and shadow-execute the trace into placements.
#[instrument(skip_all)]
pub fn synthesize_transaction(
  frontend: FrontendConfig,
  tx: &SignedTransaction,
  deployment: &Deployment,
  storage: &MerkleStorage,
) -> Result<SynthesisOutput> {
  let trace = record_transaction(tx, deployment, storage)?;
  let mut block = BlockInfo::default();
  block.absorb_trace(tx.tx.contract, &trace);
  let synthesizer = Synthesizer::new(frontend, storage, tx, &block)?;
  synthesizer.run(&mut trace.events.into_iter(), &trace.writes)
}

/// The whole pipeline: record, synthesize, normalize and permute.
pub fn synthesize_circuit(
  catalogue: &Catalogue,
  evaluator: &impl WitnessEvaluator,
  tx: &SignedTransaction,
  deployment: &Deployment,
  storage: &MerkleStorage,
) -> Result<(SynthesisOutput, Circuit)> {
  let output = synthesize_transaction(catalogue.frontend.clone(), tx, deployment, storage)?;
  let circuit = circuit::build(&output, catalogue, evaluator)?;
  Ok((output, circuit))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_padded_slice_zero_fills() {
    assert_eq!(padded_slice(&[1, 2, 3], 1, 4), vec![2, 3, 0, 0]);
    assert!(padded_slice(&[], 0, 0).is_empty());
  }

  fn call_step(opcode: u8, stack: Vec<U256>, memory: Vec<u8>) -> StepRecord {
    StepRecord {
      pc: 0,
      opcode,
      depth: 0,
      stack,
      memory,
      code_address: Address::ZERO,
      this_address: Address::ZERO,
      caller: Address::ZERO,
      origin: Address::ZERO,
    }
  }

  fn frame(last_step: StepRecord) -> Frame {
    Frame {
      code_address: Address::ZERO,
      this_address: Address::ZERO,
      caller: Address::ZERO,
      journal: Vec::new(),
      last_step: Some(last_step),
      post: (Vec::new(), Vec::new()),
    }
  }

  #[test]
  fn test_nested_call_reads_operands() {
    let recorder = TraceRecorder::new(Address::ZERO, Vec::new(), U256::ZERO);
    let u = |v: u64| U256::from(v);
    // gas, address, value, argsOffset, argsLen, retOffset, retLen
    let stack = vec![u(100), u(0x22), u(9), u(2), u(3), u(0), u(0)];
    let parent = frame(call_step(opcode::CALL, stack, vec![0xa, 0xb, 0xc, 0xd]));
    let (kind, calldata, value) = recorder.nested_message(&parent).unwrap();
    assert_eq!(kind, MessageKind::Call);
    assert_eq!(calldata, vec![0xc, 0xd, 0]);
    assert_eq!(value, u(9));

    let stack = vec![u(100), u(0x22), u(0), u(1), u(0), u(0)];
    let parent = frame(call_step(opcode::STATICCALL, stack, vec![0xa]));
    let (kind, calldata, value) = recorder.nested_message(&parent).unwrap();
    assert_eq!(kind, MessageKind::StaticCall);
    assert_eq!(calldata, vec![0xa]);
    assert_eq!(value, U256::ZERO);
  }

  #[test]
  fn test_create_is_rejected() {
    let recorder = TraceRecorder::new(Address::ZERO, Vec::new(), U256::ZERO);
    let parent = frame(call_step(opcode::CREATE, vec![U256::ZERO; 3], Vec::new()));
    assert!(recorder.nested_message(&parent).is_err());
  }
}
