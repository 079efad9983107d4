//! Symbolic operand stack.

use crate::data_point::DataPoint;
use crate::error::{Result, SynthError};

pub const MAX_STACK_SIZE: usize = 1024;

/// Mirrors the interpreter stack with data points instead of words.
#[derive(Clone, Debug, Default)]
pub struct StackPt {
  items: Vec<DataPoint>,
}

impl StackPt {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn push(&mut self, item: DataPoint) -> Result<()> {
    if self.items.len() >= MAX_STACK_SIZE {
      return Err(SynthError::referential("symbolic stack overflow"));
    }
    self.items.push(item);
    Ok(())
  }

  pub fn pop(&mut self) -> Result<DataPoint> {
    self
      .items
      .pop()
      .ok_or_else(|| SynthError::referential("symbolic stack underflow"))
  }

  /// Pop `n` items, returned top first.
  pub fn pop_n(&mut self, n: usize) -> Result<Vec<DataPoint>> {
    if n > self.items.len() {
      return Err(SynthError::referential(format!(
        "symbolic stack underflow: need {n}, have {}",
        self.items.len()
      )));
    }
    let mut popped = self.items.split_off(self.items.len() - n);
    popped.reverse();
    Ok(popped)
  }

  /// Top `n` items without popping, top first.
  pub fn peek(&self, n: usize) -> Result<Vec<DataPoint>> {
    if n > self.items.len() {
      return Err(SynthError::referential(format!(
        "cannot peek {n} items of a {}-deep stack",
        self.items.len()
      )));
    }
    Ok(self.items.iter().rev().take(n).cloned().collect())
  }

  /// Duplicate the `n`-th item (1 is the top).
  pub fn dup(&mut self, n: usize) -> Result<()> {
    let item = self
      .peek(n)?
      .pop()
      .ok_or_else(|| SynthError::referential("DUP of an empty stack"))?;
    self.push(item)
  }

  /// Exchange the top with the item `n` below it.
  pub fn swap(&mut self, n: usize) -> Result<()> {
    let len = self.items.len();
    if n == 0 || n >= len {
      return Err(SynthError::referential(format!("SWAP{n} on a {len}-deep stack")));
    }
    self.items.swap(len - 1, len - 1 - n);
    Ok(())
  }

  /// Items from the top down.
  pub fn iter_top_first(&self) -> impl Iterator<Item = &DataPoint> {
    self.items.iter().rev()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use revm::primitives::U256;

  fn pt(v: u64) -> DataPoint {
    DataPoint::new(0, v as usize, 256, U256::from(v)).unwrap()
  }

  #[test]
  fn test_pop_n_is_top_first() {
    let mut stack = StackPt::new();
    for v in 1..=3 {
      stack.push(pt(v)).unwrap();
    }
    let popped = stack.pop_n(2).unwrap();
    assert_eq!(popped[0].value, U256::from(3u64));
    assert_eq!(popped[1].value, U256::from(2u64));
    assert_eq!(stack.len(), 1);
  }

  #[test]
  fn test_dup_and_swap() {
    let mut stack = StackPt::new();
    for v in 1..=3 {
      stack.push(pt(v)).unwrap();
    }
    stack.dup(3).unwrap();
    assert_eq!(stack.peek(1).unwrap()[0].value, U256::from(1u64));
    stack.swap(2).unwrap();
    let top: Vec<U256> = stack.iter_top_first().map(|p| p.value).collect();
    assert_eq!(top, vec![U256::from(2u64), U256::from(3u64), U256::from(1u64), U256::from(1u64)]);
  }

  #[test]
  fn test_underflow_and_overflow() {
    let mut stack = StackPt::new();
    assert!(stack.pop().is_err());
    for _ in 0..MAX_STACK_SIZE {
      stack.push(pt(0)).unwrap();
    }
    assert!(stack.push(pt(0)).is_err());
  }
}
