//! Interpreter trace consumed by the synthesizer.
//!
//! The host records one event per message boundary and per executed
//! instruction. Events are pulled through a [`StepSource`] by an ordinary loop.

use crate::error::Result;
use revm::bytecode::opcode;
use revm::primitives::{Address, U256};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
  Call,
  CallCode,
  DelegateCall,
  StaticCall,
}

impl MessageKind {
  pub fn from_opcode(op: u8) -> Option<Self> {
    match op {
      opcode::CALL => Some(Self::Call),
      opcode::CALLCODE => Some(Self::CallCode),
      opcode::DELEGATECALL => Some(Self::DelegateCall),
      opcode::STATICCALL => Some(Self::StaticCall),
      _ => None,
    }
  }

  /// CALL and CALLCODE carry a value operand.
  pub fn has_value(self) -> bool {
    matches!(self, Self::Call | Self::CallCode)
  }

  /// Stack operands consumed by the call instruction.
  pub fn operand_count(self) -> usize {
    if self.has_value() { 7 } else { 6 }
  }

  /// The callee runs against the caller's storage and address.
  pub fn keeps_context(self) -> bool {
    matches!(self, Self::CallCode | Self::DelegateCall)
  }
}

/// Interpreter state right before an instruction executes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepRecord {
  pub pc: usize,
  pub opcode: u8,
  pub depth: usize,
  /// Top of the stack first.
  pub stack: Vec<U256>,
  pub memory: Vec<u8>,
  pub code_address: Address,
  pub this_address: Address,
  pub caller: Address,
  pub origin: Address,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
  pub depth: usize,
  pub kind: MessageKind,
  pub caller: Address,
  /// Address whose storage and balance the message acts on.
  pub target: Address,
  pub code_address: Address,
  pub value: U256,
  pub calldata: Vec<u8>,
}

/// State of a message frame when it halts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalState {
  pub depth: usize,
  pub success: bool,
  pub return_data: Vec<u8>,
  /// Top of the stack first.
  pub stack: Vec<U256>,
  pub memory: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceEvent {
  BeforeMessage(MessageRecord),
  Step(StepRecord),
  AfterMessage(FinalState),
}

/// A storage write that survived to the end of the transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StorageWrite {
  pub address: Address,
  pub key: U256,
  pub value: U256,
}

/// Ordered supply of trace events.
pub trait StepSource {
  fn next_event(&mut self) -> Result<Option<TraceEvent>>;
}

impl<I: Iterator<Item = TraceEvent>> StepSource for I {
  fn next_event(&mut self) -> Result<Option<TraceEvent>> {
    Ok(self.next())
  }
}

/// A recorded execution: the event stream plus its committed storage writes.
#[derive(Clone, Debug, Default)]
pub struct ExecutionTrace {
  pub events: Vec<TraceEvent>,
  pub writes: Vec<StorageWrite>,
}

impl ExecutionTrace {
  /// Stack top produced by every step, paired with the step. Steps whose
  /// successor at the same depth never arrives are skipped.
  pub fn step_outputs(&self) -> Vec<(&StepRecord, Option<U256>)> {
    let mut pending: Vec<Option<&StepRecord>> = Vec::new();
    let mut outputs = Vec::new();
    for event in &self.events {
      match event {
        TraceEvent::BeforeMessage(_) => pending.push(None),
        TraceEvent::Step(step) => {
          if let Some(slot) = pending.last_mut() {
            if let Some(previous) = slot.take() {
              outputs.push((previous, step.stack.first().copied()));
            }
            *slot = Some(step);
          }
        }
        TraceEvent::AfterMessage(_) => {
          pending.pop();
        }
      }
    }
    outputs
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn step(opcode: u8, stack: &[u64]) -> TraceEvent {
    TraceEvent::Step(StepRecord {
      pc: 0,
      opcode,
      depth: 0,
      stack: stack.iter().map(|v| U256::from(*v)).collect(),
      memory: Vec::new(),
      code_address: Address::ZERO,
      this_address: Address::ZERO,
      caller: Address::ZERO,
      origin: Address::ZERO,
    })
  }

  fn message() -> TraceEvent {
    TraceEvent::BeforeMessage(MessageRecord {
      depth: 0,
      kind: MessageKind::Call,
      caller: Address::ZERO,
      target: Address::ZERO,
      code_address: Address::ZERO,
      value: U256::ZERO,
      calldata: Vec::new(),
    })
  }

  #[test]
  fn test_iterators_are_step_sources() {
    let mut source = vec![message(), step(opcode::STOP, &[])].into_iter();
    assert!(matches!(source.next_event().unwrap(), Some(TraceEvent::BeforeMessage(_))));
    assert!(matches!(source.next_event().unwrap(), Some(TraceEvent::Step(_))));
    assert!(source.next_event().unwrap().is_none());
  }

  #[test]
  fn test_step_outputs_pair_with_successor() {
    let trace = ExecutionTrace {
      events: vec![
        message(),
        step(opcode::PUSH1, &[]),
        step(opcode::TIMESTAMP, &[5]),
        step(opcode::STOP, &[9, 5]),
        TraceEvent::AfterMessage(FinalState {
          depth: 0,
          success: true,
          return_data: Vec::new(),
          stack: Vec::new(),
          memory: Vec::new(),
        }),
      ],
      writes: Vec::new(),
    };
    let outputs = trace.step_outputs();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[1].0.opcode, opcode::TIMESTAMP);
    assert_eq!(outputs[1].1, Some(U256::from(9u64)));
  }

  #[test]
  fn test_call_operand_layouts() {
    assert_eq!(MessageKind::from_opcode(opcode::CALL).map(MessageKind::operand_count), Some(7));
    assert_eq!(MessageKind::from_opcode(opcode::STATICCALL).map(MessageKind::operand_count), Some(6));
    assert!(MessageKind::DelegateCall.keeps_context());
    assert!(MessageKind::from_opcode(opcode::ADD).is_none());
  }
}
