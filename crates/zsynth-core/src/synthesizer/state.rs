use crate::config::FrontendConfig;
use crate::data_point::{DataPoint, Placement};
use crate::error::{Result, SynthError};
use crate::buffer::BufferKind;
use revm::primitives::U256;
use std::collections::HashMap;

/// Placement list plus the caches that hang off it. One per transaction.
#[derive(Clone, Debug)]
pub struct CircuitState {
  pub frontend: FrontendConfig,
  pub(crate) placements: Vec<Placement>,
  /// Unlabelled static loads, keyed by `(value, bit size)`.
  pub(crate) static_cache: HashMap<(U256, usize), DataPoint>,
}

impl CircuitState {
  /// An empty list holding only the five reserved buffers.
  pub fn new(frontend: FrontendConfig) -> Self {
    let placements = BufferKind::ALL
      .iter()
      .map(|buffer| Placement::new(buffer.subcircuit(), buffer.usage()))
      .collect();
    Self {
      frontend,
      placements,
      static_cache: HashMap::new(),
    }
  }

  pub fn placements(&self) -> &[Placement] {
    &self.placements
  }

  pub fn into_placements(self) -> Vec<Placement> {
    self.placements
  }

  pub fn placement(&self, index: usize) -> Result<&Placement> {
    self
      .placements
      .get(index)
      .ok_or_else(|| SynthError::referential(format!("no placement {index}")))
  }

  pub(crate) fn buffer_mut(&mut self, buffer: BufferKind) -> &mut Placement {
    &mut self.placements[buffer.index()]
  }

  /// Every input must already be an output of an existing placement.
  pub(crate) fn check_inputs_exist(&self, inputs: &[DataPoint]) -> Result<()> {
    for input in inputs {
      let source = self.placement(input.source)?;
      let produced = source.outputs.get(input.wire_index);
      if produced.map(|out| out.value) != Some(input.value) {
        return Err(SynthError::referential(format!(
          "input refers to output {} of placement {} ({}) which does not hold {:#x}",
          input.wire_index, input.source, source.usage, input.value
        )));
      }
    }
    Ok(())
  }

  /// Append a placement whose outputs are derived from `output_values`.
  pub(crate) fn push_placement(
    &mut self,
    mut placement: Placement,
    output_values: &[U256],
    output_bit_size: usize,
  ) -> Result<Vec<DataPoint>> {
    self.check_inputs_exist(&placement.inputs)?;
    let index = self.placements.len();
    placement.outputs = output_values
      .iter()
      .enumerate()
      .map(|(wire, value)| DataPoint::new(index, wire, output_bit_size, *value))
      .collect::<Result<Vec<_>>>()?;
    let outputs = placement.outputs.clone();
    tracing::trace!(index, usage = %placement.usage, inputs = placement.inputs.len(), "placement");
    self.placements.push(placement);
    Ok(outputs)
  }
}
