//! Hand-built single-frame traces against a signed transaction.
#![allow(dead_code)]

use revm::bytecode::opcode;
use revm::primitives::{Address, U256};
use zsynth_core::circuit::{self, Circuit, NativeEvaluator};
use zsynth_core::config::{BufferCapacity, Catalogue, FrontendConfig};
use zsynth_core::crypto::eddsa::EddsaKeypair;
use zsynth_core::storage::MerkleStorage;
use zsynth_core::synthesizer::{SynthesisOutput, Synthesizer};
use zsynth_core::trace::{FinalState, MessageKind, MessageRecord, StepRecord, StorageWrite, TraceEvent};
use zsynth_core::transaction::{BlockInfo, L2Transaction, SignedTransaction};

pub const CONTRACT: Address = Address::repeat_byte(0xcc);

pub struct Fixture {
  pub tx: SignedTransaction,
  pub sender: Address,
  pub storage: MerkleStorage,
  pub block: BlockInfo,
}

impl Fixture {
  pub fn new(slots: &[(u64, u64)]) -> Self {
    Self::with_inputs(slots, &[U256::from(3u64)])
  }

  pub fn with_inputs(slots: &[(u64, u64)], inputs: &[U256]) -> Self {
    let keypair = EddsaKeypair::from_seed(b"integration test sender").unwrap();
    let tx = L2Transaction::new(1, CONTRACT, [0x12, 0x34, 0x56, 0x78], inputs)
      .unwrap()
      .sign(&keypair)
      .unwrap();
    let sender = tx.sender().unwrap();
    let storage = MerkleStorage::new(
      FrontendConfig::default().mt_depth,
      slots.iter().map(|(k, v)| (U256::from(*k), U256::from(*v))),
    )
    .unwrap();
    Self {
      tx,
      sender,
      storage,
      block: BlockInfo::default(),
    }
  }

  pub fn open(&self) -> TraceEvent {
    TraceEvent::BeforeMessage(MessageRecord {
      depth: 0,
      kind: MessageKind::Call,
      caller: self.sender,
      target: CONTRACT,
      code_address: CONTRACT,
      value: U256::ZERO,
      calldata: self.tx.tx.calldata(),
    })
  }

  /// `stack` is listed top first.
  pub fn step(&self, pc: usize, op: u8, stack: &[u64]) -> TraceEvent {
    TraceEvent::Step(StepRecord {
      pc,
      opcode: op,
      depth: 0,
      stack: stack.iter().map(|v| U256::from(*v)).collect(),
      memory: Vec::new(),
      code_address: CONTRACT,
      this_address: CONTRACT,
      caller: self.sender,
      origin: self.sender,
    })
  }

  pub fn close(&self, stack: &[u64]) -> TraceEvent {
    self.close_words(stack.iter().map(|v| U256::from(*v)).collect())
  }

  /// Like [`Fixture::step`] for full-width stack words.
  pub fn step_words(&self, pc: usize, op: u8, stack: Vec<U256>) -> TraceEvent {
    let TraceEvent::Step(mut record) = self.step(pc, op, &[]) else {
      unreachable!()
    };
    record.stack = stack;
    TraceEvent::Step(record)
  }

  pub fn close_words(&self, stack: Vec<U256>) -> TraceEvent {
    TraceEvent::AfterMessage(FinalState {
      depth: 0,
      success: true,
      return_data: Vec::new(),
      stack,
      memory: Vec::new(),
    })
  }

  pub fn synthesizer(&self) -> Synthesizer<'_, MerkleStorage> {
    Synthesizer::new(FrontendConfig::default(), &self.storage, &self.tx, &self.block).unwrap()
  }

  pub fn synthesize(&self, events: Vec<TraceEvent>, writes: &[StorageWrite]) -> zsynth_core::Result<SynthesisOutput> {
    self.synthesizer().run(&mut events.into_iter(), writes)
  }

  /// `PUSH1 7; PUSH1 5; ADD; STOP`
  pub fn add_trace(&self, result: u64) -> Vec<TraceEvent> {
    vec![
      self.open(),
      self.step(0, opcode::PUSH1, &[]),
      self.step(2, opcode::PUSH1, &[7]),
      self.step(4, opcode::ADD, &[5, 7]),
      self.step(5, opcode::STOP, &[result]),
      self.close(&[result]),
    ]
  }
}

pub fn catalogue() -> Catalogue {
  Catalogue::synthetic(FrontendConfig::default(), BufferCapacity::default()).unwrap()
}

pub fn build(output: &SynthesisOutput) -> zsynth_core::Result<Circuit> {
  circuit::build(output, &catalogue(), &NativeEvaluator)
}
