//! Instruction handler.
//!
//! A step is handled once the next event of its frame arrives, so the
//! interpreter's result is known: every symbolic result is checked against it
//! and the whole symbolic stack must agree with the real one afterwards.

use super::{CallContext, Synthesizer};
use crate::arith::ArithOp;
use crate::buffer::ReservedVariable;
use crate::data_point::DataPoint;
use crate::error::{Result, SynthError, ensure_matches};
use crate::memory::{MemoryEntry, MemoryPt};
use crate::opcode::{opcode_input_count, opcode_name, opcode_output_count, push_size};
use crate::storage::StorageBackend;
use crate::trace::{FinalState, MessageKind, MessageRecord, StepRecord};
use crate::transaction::{CALLDATA_LEN, SELECTOR_BYTES, address_word};
use revm::bytecode::opcode;
use revm::primitives::U256;
use tracing::{debug, trace};

const PRECOMPILES: u64 = 10;

/// Interpreter state after a step.
struct PostState<'s> {
  stack: &'s [U256],
  memory: &'s [u8],
}

impl PostState<'_> {
  fn top(&self) -> Result<U256> {
    self
      .stack
      .first()
      .copied()
      .ok_or_else(|| SynthError::divergence("interpreter stack is empty after a push"))
  }
}

/// `(offset, len)` of a memory range, `None` when empty.
fn memory_range(offset: U256, len: U256) -> Result<Option<(usize, usize)>> {
  if len.is_zero() {
    return Ok(None);
  }
  let limit = U256::from(u32::MAX);
  if offset > limit || len > limit {
    return Err(SynthError::precondition(format!(
      "memory range {offset:#x}+{len:#x} is out of reach"
    )));
  }
  Ok(Some((offset.to::<usize>(), len.to::<usize>())))
}

fn memory_slice(memory: &[u8], offset: usize, len: usize) -> Vec<u8> {
  (offset..offset + len)
    .map(|addr| memory.get(addr).copied().unwrap_or(0))
    .collect()
}

fn check_stack(context: &CallContext, real: &[U256]) -> Result<()> {
  if context.stack.len() != real.len() {
    return Err(SynthError::divergence(format!(
      "symbolic stack holds {} items, interpreter {}",
      context.stack.len(),
      real.len()
    )));
  }
  for (depth, (symbolic, actual)) in context.stack.iter_top_first().zip(real).enumerate() {
    ensure_matches(&format!("stack item {depth}"), symbolic.value, *actual)?;
  }
  Ok(())
}

fn check_memory(context: &CallContext, post: &PostState, offset: usize, len: usize) -> Result<()> {
  if context.memory.view(offset, len) != memory_slice(post.memory, offset, len) {
    return Err(SynthError::divergence(format!(
      "memory {offset}..{} differs from the interpreter",
      offset + len
    )));
  }
  Ok(())
}

impl<B: StorageBackend> Synthesizer<'_, B> {
  // ============================================================
  // Message boundaries
  // ============================================================

  pub(super) fn before_message(&mut self, message: MessageRecord) -> Result<()> {
    if message.depth != self.contexts.len() {
      return Err(SynthError::referential(format!(
        "message at depth {} opened with {} live frames",
        message.depth,
        self.contexts.len()
      )));
    }
    let code = address_word(message.code_address);
    if !code.is_zero() && code <= U256::from(PRECOMPILES) {
      return Err(SynthError::precondition(format!(
        "call to precompile {} is not supported",
        message.code_address
      )));
    }

    let checkpoint = self.storage.checkpoint();
    let context = if self.contexts.is_empty() {
      self.root_context(&message, checkpoint)?
    } else {
      self.child_context(&message, checkpoint)?
    };
    ensure_matches("message caller", context.caller.value, address_word(message.caller))?;
    ensure_matches("message target", context.this_address.value, address_word(message.target))?;
    debug!(depth = message.depth, kind = ?message.kind, target = %message.target, "message opened");
    self.contexts.push(context);
    Ok(())
  }

  fn root_context(&mut self, message: &MessageRecord, checkpoint: usize) -> Result<CallContext> {
    if message.calldata != self.tx.tx.calldata() {
      return Err(SynthError::divergence("transaction calldata differs from the signed transaction"));
    }
    let mut calldata = MemoryPt::new();
    calldata.write(MemoryEntry::new(
      0,
      SELECTOR_BYTES,
      self.state.reserved(ReservedVariable::FunctionSelector)?,
    ));
    for i in 0..crate::buffer::TRANSACTION_INPUTS {
      let input = self.state.reserved(ReservedVariable::TransactionInput(i as u8))?;
      calldata.write(MemoryEntry::new(SELECTOR_BYTES + 32 * i, 32, input));
    }
    Ok(CallContext::new(
      0,
      message.kind,
      message.target,
      calldata,
      CALLDATA_LEN,
      self.origin.clone(),
      self.state.reserved(ReservedVariable::ContractAddress)?,
      checkpoint,
    ))
  }

  fn child_context(&mut self, message: &MessageRecord, checkpoint: usize) -> Result<CallContext> {
    let Some(parent) = self.contexts.last() else {
      return Err(SynthError::referential("nested message without a parent frame"));
    };
    let pending_op = parent.pending.as_ref().map(|step| step.opcode);
    let kind = pending_op
      .and_then(MessageKind::from_opcode)
      .ok_or_else(|| SynthError::precondition(format!(
        "message opened by {} is not supported",
        pending_op.map(opcode_name).unwrap_or("nothing")
      )))?;
    if kind != message.kind {
      return Err(SynthError::divergence(format!(
        "{kind:?} opened a {:?} message",
        message.kind
      )));
    }
    let operands = parent.stack.peek(kind.operand_count())?;
    let args = if kind.has_value() { 3 } else { 2 };
    let (caller, this_address) = if kind.keeps_context() {
      let caller = if kind == MessageKind::DelegateCall {
        parent.caller.clone()
      } else {
        parent.this_address.clone()
      };
      (caller, parent.this_address.clone())
    } else {
      (parent.this_address.clone(), operands[1].clone())
    };
    let parent_memory = parent.memory.clone();

    let this_address = if this_address.value > crate::crypto::eddsa::address_mask() {
      let mask = self.state.reserved(ReservedVariable::AddressMask)?;
      self.state.place_arith_single(ArithOp::And, &[this_address, mask])?
    } else {
      this_address
    };
    let (calldata, calldata_size) = match memory_range(operands[args].value, operands[args + 1].value)? {
      Some((offset, len)) => {
        let entries = self.state.copy_memory(&parent_memory, offset, len, 0)?;
        (MemoryPt::simulate(entries), len)
      }
      None => (MemoryPt::new(), 0),
    };
    if calldata.view(0, calldata_size) != message.calldata {
      return Err(SynthError::divergence("calldata of the nested message differs"));
    }
    Ok(CallContext::new(
      message.depth,
      kind,
      message.target,
      calldata,
      calldata_size,
      caller,
      this_address,
      checkpoint,
    ))
  }

  pub(super) fn on_step(&mut self, step: StepRecord) -> Result<()> {
    let mut context = self
      .contexts
      .pop()
      .ok_or_else(|| SynthError::referential("step outside of any message"))?;
    if context.depth != step.depth {
      return Err(SynthError::referential(format!(
        "step at depth {} inside a frame at depth {}",
        step.depth, context.depth
      )));
    }
    match context.pending.take() {
      Some(previous) => {
        let post = PostState {
          stack: &step.stack,
          memory: &step.memory,
        };
        self.execute_step(&mut context, &previous, &post)?;
      }
      None => check_stack(&context, &step.stack)?,
    }
    context.pending = Some(step);
    self.contexts.push(context);
    Ok(())
  }

  pub(super) fn after_message(&mut self, final_state: FinalState) -> Result<()> {
    let mut context = self
      .contexts
      .pop()
      .ok_or_else(|| SynthError::referential("message closed twice"))?;
    if context.depth != final_state.depth {
      return Err(SynthError::referential(format!(
        "frame at depth {} closed as depth {}",
        context.depth, final_state.depth
      )));
    }
    let last = context.pending.take();
    if let Some(last) = &last {
      let halted_cleanly = matches!(last.opcode, opcode::STOP | opcode::RETURN | opcode::REVERT);
      if !halted_cleanly {
        return Err(SynthError::precondition(format!(
          "message halted abnormally at {} (pc {})",
          opcode_name(last.opcode),
          last.pc
        )));
      }
      let post = PostState {
        stack: &final_state.stack,
        memory: &final_state.memory,
      };
      self.execute_step(&mut context, last, &post)?;
    }
    if context.result.view(0, context.result_size) != final_state.return_data {
      return Err(SynthError::divergence("message output differs from the interpreter"));
    }
    if !final_state.success {
      self.storage.revert(context.storage_checkpoint);
    }
    debug!(depth = context.depth, success = final_state.success, "message closed");
    match self.contexts.last_mut() {
      Some(parent) => {
        parent.returndata = context.result;
        parent.returndata_size = context.result_size;
      }
      None => self.finished = true,
    }
    Ok(())
  }

  // ============================================================
  // Steps
  // ============================================================

  fn execute_step(&mut self, context: &mut CallContext, step: &StepRecord, post: &PostState) -> Result<()> {
    self
      .dispatch(context, step, post)
      .and_then(|()| check_stack(context, post.stack))
      .map_err(|source| SynthError::Step {
        opcode: step.opcode,
        name: opcode_name(step.opcode),
        pc: step.pc,
        code_address: step.code_address,
        source: Box::new(source),
      })
  }

  fn dispatch(&mut self, context: &mut CallContext, step: &StepRecord, post: &PostState) -> Result<()> {
    let op = step.opcode;
    trace!(pc = step.pc, op = opcode_name(op), depth = step.depth, "step");
    let n_in = opcode_input_count(op)
      .ok_or_else(|| SynthError::precondition(format!("{} is not supported", opcode_name(op))))?;
    if step.stack.len() < n_in {
      return Err(SynthError::divergence(format!(
        "interpreter stack holds {} items, {} are consumed",
        step.stack.len(),
        n_in
      )));
    }
    let n_out = opcode_output_count(op).unwrap_or(0);
    if step.stack.len() - n_in + n_out != post.stack.len() {
      return Err(SynthError::divergence(format!(
        "stack moved from {} to {} items, expected {}",
        step.stack.len(),
        post.stack.len(),
        step.stack.len() - n_in + n_out
      )));
    }

    if push_size(op).is_some() {
      let constant = self.state.load_static(post.top()?, 256, None)?;
      return context.stack.push(constant);
    }
    if (opcode::DUP1..=opcode::DUP16).contains(&op) {
      return context.stack.dup((op - opcode::DUP1 + 1) as usize);
    }
    if (opcode::SWAP1..=opcode::SWAP16).contains(&op) {
      return context.stack.swap((op - opcode::SWAP1 + 1) as usize);
    }

    let inputs = context.stack.pop_n(n_in)?;
    for (i, input) in inputs.iter().enumerate() {
      ensure_matches(&format!("operand {i}"), input.value, step.stack[i])?;
    }

    if let Some(arith) = ArithOp::from_opcode(op) {
      let output = if arith == ArithOp::Exp {
        self.state.place_exp(&inputs[0], &inputs[1])?
      } else {
        self.state.place_arith_single(arith, &inputs)?
      };
      return context.stack.push(output);
    }

    match op {
      opcode::STOP | opcode::JUMPDEST | opcode::POP | opcode::JUMP | opcode::JUMPI => Ok(()),
      op if (opcode::LOG0..=opcode::LOG4).contains(&op) => Ok(()),
      opcode::KECCAK256 => {
        let digest = self.place_hash(context, &inputs)?;
        context.stack.push(digest)
      }
      opcode::ADDRESS => context.stack.push(context.this_address.clone()),
      opcode::CALLER => context.stack.push(context.caller.clone()),
      opcode::ORIGIN => context.stack.push(self.origin.clone()),
      opcode::CALLDATALOAD => {
        let word = match memory_range(inputs[0].value, U256::from(32u64)) {
          Ok(Some((offset, _))) if offset < context.calldata_size => {
            let aliases = context.calldata.data_alias(offset, 32)?;
            self.state.place_memory_to_stack(&aliases)?
          }
          _ => self.state.load_shared_static(U256::ZERO, 256, "Zero word")?,
        };
        context.stack.push(word)
      }
      opcode::CALLDATACOPY | opcode::RETURNDATACOPY => {
        let Some((src, len)) = memory_range(inputs[1].value, inputs[2].value)? else {
          return Ok(());
        };
        let Some((dst, _)) = memory_range(inputs[0].value, inputs[2].value)? else {
          return Ok(());
        };
        let source = if op == opcode::CALLDATACOPY {
          &context.calldata
        } else {
          &context.returndata
        };
        let entries = self.state.copy_memory(source, src, len, dst)?;
        context.memory.write_batch(entries);
        check_memory(context, post, dst, len)
      }
      opcode::CODECOPY | opcode::EXTCODECOPY => {
        let (dst, len) = if op == opcode::CODECOPY {
          (inputs[0].value, inputs[2].value)
        } else {
          (inputs[1].value, inputs[3].value)
        };
        let Some((dst, len)) = memory_range(dst, len)? else {
          return Ok(());
        };
        self.load_code_bytes(context, post, dst, len)
      }
      opcode::CALLVALUE
      | opcode::CALLDATASIZE
      | opcode::CODESIZE
      | opcode::GASPRICE
      | opcode::RETURNDATASIZE
      | opcode::BALANCE
      | opcode::EXTCODESIZE
      | opcode::EXTCODEHASH
      | opcode::PC
      | opcode::MSIZE
      | opcode::GAS => {
        let label = format!("{} result", opcode_name(op));
        let value = self.state.load_static(post.top()?, 256, Some(label))?;
        context.stack.push(value)
      }
      opcode::COINBASE
      | opcode::TIMESTAMP
      | opcode::NUMBER
      | opcode::DIFFICULTY
      | opcode::GASLIMIT
      | opcode::CHAINID
      | opcode::BASEFEE => {
        let variable = block_variable(op)?;
        context.stack.push(self.state.reserved(variable)?)
      }
      opcode::SELFBALANCE => {
        let balance = if context.storage_address == self.tx.tx.contract {
          self.state.reserved(ReservedVariable::SelfBalance)?
        } else {
          self.state.load_static(post.top()?, 256, Some("SELFBALANCE result".into()))?
        };
        context.stack.push(balance)
      }
      opcode::BLOCKHASH => {
        let hash = match self.block.ancestor_distance(inputs[0].value) {
          Some(n) if (n as usize) <= self.state.frontend.n_prev_block_hashes => {
            self.state.reserved(ReservedVariable::BlockHash(n))?
          }
          Some(n) => self
            .state
            .load_static(post.top()?, 256, Some(format!("BLOCKHASH {n} blocks ago")))?,
          None => self.state.load_shared_static(U256::ZERO, 256, "Zero word")?,
        };
        context.stack.push(hash)
      }
      opcode::MLOAD => {
        let (offset, _) = memory_range(inputs[0].value, U256::from(32u64))?
          .ok_or_else(|| SynthError::referential("empty MLOAD range"))?;
        let aliases = context.memory.data_alias(offset, 32)?;
        let word = self.state.place_memory_to_stack(&aliases)?;
        context.stack.push(word)
      }
      opcode::MSTORE | opcode::MSTORE8 => {
        let size = if op == opcode::MSTORE { 32 } else { 1 };
        let (offset, _) = memory_range(inputs[0].value, U256::from(size as u64))?
          .ok_or_else(|| SynthError::referential("empty MSTORE range"))?;
        let stored = self.state.place_mstore(inputs[1].clone(), size)?;
        context.memory.write(MemoryEntry::new(offset, size, stored));
        check_memory(context, post, offset, size)
      }
      opcode::MCOPY => {
        let Some((src, len)) = memory_range(inputs[1].value, inputs[2].value)? else {
          return Ok(());
        };
        let Some((dst, _)) = memory_range(inputs[0].value, inputs[2].value)? else {
          return Ok(());
        };
        let entries = self.state.copy_memory(&context.memory, src, len, dst)?;
        context.memory.write_batch(entries);
        check_memory(context, post, dst, len)
      }
      opcode::SLOAD => {
        let value = self.storage.load(
          &mut self.state,
          self.backend,
          context.storage_address,
          inputs[0].clone(),
          post.top()?,
        )?;
        context.stack.push(value)
      }
      opcode::SSTORE => self.storage.store(
        self.backend,
        context.storage_address,
        inputs[0].clone(),
        inputs[1].clone(),
      ),
      opcode::RETURN | opcode::REVERT => {
        let (result, size) = match memory_range(inputs[0].value, inputs[1].value)? {
          Some((offset, len)) => {
            let entries = self.state.copy_memory(&context.memory, offset, len, 0)?;
            (MemoryPt::simulate(entries), len)
          }
          None => (MemoryPt::new(), 0),
        };
        context.result = result;
        context.result_size = size;
        Ok(())
      }
      opcode::CALL | opcode::CALLCODE | opcode::DELEGATECALL | opcode::STATICCALL => {
        self.finish_call(context, op, &inputs, post)
      }
      _ => Err(SynthError::precondition(format!("{} is not supported", opcode_name(op)))),
    }
  }

  /// Poseidon digest of a memory range, word by word.
  fn place_hash(&mut self, context: &CallContext, inputs: &[DataPoint]) -> Result<DataPoint> {
    let Some((offset, len)) = memory_range(inputs[0].value, inputs[1].value)? else {
      return self.state.place_poseidon(&[]);
    };
    let mut words = Vec::with_capacity(len.div_ceil(32));
    for start in (offset..offset + len).step_by(32) {
      let size = 32.min(offset + len - start);
      let aliases = context.memory.data_alias(start, size)?;
      let word = self.state.place_memory_to_stack(&aliases)?;
      let bytes = context.memory.view(start, size);
      ensure_matches("hashed memory word", word.value, U256::from_be_slice(&bytes))?;
      words.push(word);
    }
    self.state.place_poseidon(&words)
  }

  /// Code bytes are not tracked symbolically; the copied range enters as
  /// constants read from the interpreter's memory.
  fn load_code_bytes(&mut self, context: &mut CallContext, post: &PostState, dst: usize, len: usize) -> Result<()> {
    for start in (dst..dst + len).step_by(32) {
      let size = 32.min(dst + len - start);
      let bytes = memory_slice(post.memory, start, size);
      let chunk = self
        .state
        .load_static(U256::from_be_slice(&bytes), 256, Some("Code bytes".into()))?;
      context.memory.write(MemoryEntry::new(start, size, chunk));
    }
    check_memory(context, post, dst, len)
  }

  /// Return data lands in the caller's memory and the success flag on its
  /// stack once the nested message has closed.
  fn finish_call(&mut self, context: &mut CallContext, op: u8, inputs: &[DataPoint], post: &PostState) -> Result<()> {
    let kind = MessageKind::from_opcode(op)
      .ok_or_else(|| SynthError::precondition(format!("{} is not a call", opcode_name(op))))?;
    let ret = if kind.has_value() { 5 } else { 4 };
    if let Some((ret_offset, ret_len)) = memory_range(inputs[ret].value, inputs[ret + 1].value)? {
      let copied = ret_len.min(context.returndata_size);
      if copied > 0 {
        let entries = self.state.copy_memory(&context.returndata, 0, copied, ret_offset)?;
        context.memory.write_batch(entries);
        check_memory(context, post, ret_offset, copied)?;
      }
    }
    let success = self
      .state
      .load_static(post.top()?, 256, Some(format!("{} success flag", opcode_name(op))))?;
    context.stack.push(success)
  }
}

fn block_variable(op: u8) -> Result<ReservedVariable> {
  use ReservedVariable as V;
  Ok(match op {
    opcode::COINBASE => V::Coinbase,
    opcode::TIMESTAMP => V::Timestamp,
    opcode::NUMBER => V::Number,
    opcode::DIFFICULTY => V::Prevrandao,
    opcode::GASLIMIT => V::GasLimit,
    opcode::CHAINID => V::ChainId,
    opcode::BASEFEE => V::BaseFee,
    other => {
      return Err(SynthError::precondition(format!(
        "{} is not a block fact",
        opcode_name(other)
      )));
    }
  })
}
