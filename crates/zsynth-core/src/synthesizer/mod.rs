//! Shadow execution of one transaction into a placement list.
//!
//! [`Synthesizer`] owns every piece of mutable trace state: the placement list
//! with its buffers ([`CircuitState`]), one [`CallContext`] per live message
//! and the storage history. It is built fresh per transaction and consumes
//! [`TraceEvent`]s in order.

pub mod arithmetic;
mod instructions;
pub mod memory_ops;
pub mod state;
pub mod storage;

pub use state::CircuitState;
pub use storage::{StorageAccess, StorageEntry, StorageManager};

use crate::buffer::ReservedVariable;
use crate::config::FrontendConfig;
use crate::crypto::{eddsa, jubjub};
use crate::data_point::{DataPoint, Placement};
use crate::error::{Result, SynthError};
use crate::memory::MemoryPt;
use crate::stack::StackPt;
use crate::storage::StorageBackend;
use crate::trace::{MessageKind, StepRecord, StepSource, StorageWrite, TraceEvent};
use crate::transaction::{BlockInfo, SignedTransaction, address_word};
use revm::primitives::{Address, U256};
use tracing::{info, instrument};

/// Symbolic state of one message frame.
#[derive(Clone, Debug)]
pub(crate) struct CallContext {
  pub depth: usize,
  pub kind: MessageKind,
  pub storage_address: Address,
  pub stack: StackPt,
  pub memory: MemoryPt,
  pub calldata: MemoryPt,
  pub calldata_size: usize,
  /// Output of the most recent child message.
  pub returndata: MemoryPt,
  pub returndata_size: usize,
  /// Bytes handed back by RETURN or REVERT.
  pub result: MemoryPt,
  pub result_size: usize,
  pub caller: DataPoint,
  pub this_address: DataPoint,
  /// The last step seen, handled once its successor shows its effect.
  pub pending: Option<StepRecord>,
  pub storage_checkpoint: usize,
}

impl CallContext {
  fn new(
    depth: usize,
    kind: MessageKind,
    storage_address: Address,
    calldata: MemoryPt,
    calldata_size: usize,
    caller: DataPoint,
    this_address: DataPoint,
    storage_checkpoint: usize,
  ) -> Self {
    Self {
      depth,
      kind,
      storage_address,
      stack: StackPt::new(),
      memory: MemoryPt::new(),
      calldata,
      calldata_size,
      returndata: MemoryPt::new(),
      returndata_size: 0,
      result: MemoryPt::new(),
      result_size: 0,
      caller,
      this_address,
      pending: None,
      storage_checkpoint,
    }
  }
}

/// Everything captured from one transaction.
#[derive(Clone, Debug)]
pub struct SynthesisOutput {
  pub placements: Vec<Placement>,
  pub frontend: FrontendConfig,
  pub resulting_root: U256,
  pub steps: usize,
}

pub struct Synthesizer<'a, B: StorageBackend> {
  pub(crate) state: CircuitState,
  backend: &'a B,
  tx: &'a SignedTransaction,
  block: &'a BlockInfo,
  storage: StorageManager,
  contexts: Vec<CallContext>,
  origin: DataPoint,
  steps: usize,
  finished: bool,
}

impl<'a, B: StorageBackend> Synthesizer<'a, B> {
  /// Load the interface buffers and verify the sender's signature in-circuit.
  #[instrument(skip_all)]
  pub fn new(
    frontend: FrontendConfig,
    backend: &'a B,
    tx: &'a SignedTransaction,
    block: &'a BlockInfo,
  ) -> Result<Self> {
    frontend.validate()?;
    if backend.depth() != frontend.mt_depth {
      return Err(SynthError::precondition(format!(
        "storage tree depth {} does not match MT_DEPTH {}",
        backend.depth(),
        frontend.mt_depth
      )));
    }
    tx.verify()?;
    let mut state = CircuitState::new(frontend);
    state.init_buffers(|variable| reserved_value(variable, tx, block, backend))?;
    let origin = state.place_origin()?;
    info!(
      contract = %tx.tx.contract,
      placements = state.placements().len(),
      "buffers initialized and sender verified"
    );
    Ok(Self {
      state,
      backend,
      tx,
      block,
      storage: StorageManager::new(tx.tx.contract),
      contexts: Vec::new(),
      origin,
      steps: 0,
      finished: false,
    })
  }

  pub fn state(&self) -> &CircuitState {
    &self.state
  }

  /// Consume the whole trace, then close the storage tree.
  #[instrument(skip_all)]
  pub fn run(mut self, source: &mut impl StepSource, committed: &[StorageWrite]) -> Result<SynthesisOutput> {
    while let Some(event) = source.next_event()? {
      self.handle_event(event)?;
    }
    self.finish(committed)
  }

  pub fn handle_event(&mut self, event: TraceEvent) -> Result<()> {
    if self.finished {
      return Err(SynthError::referential("trace continues after the transaction ended"));
    }
    match event {
      TraceEvent::BeforeMessage(message) => self.before_message(message),
      TraceEvent::Step(step) => {
        self.steps += 1;
        self.on_step(step)
      }
      TraceEvent::AfterMessage(final_state) => self.after_message(final_state),
    }
  }

  pub fn finish(mut self, committed: &[StorageWrite]) -> Result<SynthesisOutput> {
    if !self.finished {
      return Err(SynthError::referential(format!(
        "trace ended with {} open messages",
        self.contexts.len()
      )));
    }
    let root = self.storage.finalize(&mut self.state, self.backend, committed)?;
    self.state.verify_buffers()?;
    info!(
      placements = self.state.placements().len(),
      steps = self.steps,
      "placements captured"
    );
    Ok(SynthesisOutput {
      frontend: self.state.frontend.clone(),
      placements: self.state.into_placements(),
      resulting_root: root.value,
      steps: self.steps,
    })
  }
}

/// Value loaded into a fixed interface wire.
fn reserved_value(
  variable: ReservedVariable,
  tx: &SignedTransaction,
  block: &BlockInfo,
  backend: &impl StorageBackend,
) -> Result<U256> {
  use ReservedVariable as V;
  let (base_x, base_y) = jubjub::base_point();
  let (poi_x, poi_y) = jubjub::identity();
  Ok(match variable {
    V::IniMerkleRoot => backend.initial_root(),
    V::EddsaPublicKeyX => tx.public_key.0,
    V::EddsaPublicKeyY => tx.public_key.1,
    V::ConstOne => U256::from(1u64),
    V::AddressMask => eddsa::address_mask(),
    V::JubjubBaseX => base_x,
    V::JubjubBaseY => base_y,
    V::JubjubPoiX => poi_x,
    V::JubjubPoiY => poi_y,
    V::ContractAddress => address_word(tx.tx.contract),
    V::FunctionSelector => tx.tx.selector_word(),
    V::TransactionNonce => tx.tx.nonce,
    V::TransactionInput(i) => tx.tx.inputs[i as usize],
    V::EddsaSignature => tx.signature.s,
    V::EddsaRandomizerX => tx.signature.r.0,
    V::EddsaRandomizerY => tx.signature.r.1,
    other => block
      .value(other)
      .ok_or_else(|| SynthError::precondition(format!("{other:?} has no fixed value")))?,
  })
}
