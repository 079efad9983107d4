//! Template-compatible wires and the local witness of every placement.
//!
//! Normalization runs once over a frozen placement list:
//!
//! 1. unreferenced static loads are pruned from the EVM input buffer,
//! 2. every wire wider than 128 bits is split into a lower and an upper half,
//!    with consumers rebound to the halves of their source,
//! 3. buffer and placement counts are checked against the catalogue,
//! 4. each placement is evaluated by its template (in parallel) and the
//!    recorded outputs must match,
//! 5. the public instance is read off the buffer placements.

use super::evaluator::WitnessEvaluator;
use super::{WIRE_BITS, split_value};
use crate::buffer::{BufferKind, ReservedVariable, WireSlot};
use crate::config::{Catalogue, SubcircuitInfo};
use crate::data_point::{DataPoint, Placement, WireHalf};
use crate::error::{Result, SynthError};
use rayon::prelude::*;
use revm::primitives::U256;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlacementVariables {
  pub subcircuit_id: usize,
  pub variables: Vec<U256>,
}

/// Public wires, sliced by region, with a description per slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublicInstance {
  pub a_pub_user: Vec<U256>,
  pub a_pub_block: Vec<U256>,
  pub a_pub_function: Vec<U256>,
  pub a_pub_user_description: Vec<String>,
  pub a_pub_block_description: Vec<String>,
  pub a_pub_function_description: Vec<String>,
}

impl PublicInstance {
  /// The whole `a_pub` vector in global wire order.
  pub fn flat(&self) -> Vec<U256> {
    self
      .a_pub_user
      .iter()
      .chain(&self.a_pub_block)
      .chain(&self.a_pub_function)
      .copied()
      .collect()
  }
}

#[derive(Clone, Debug)]
pub struct NormalizedCircuit {
  pub placements: Vec<Placement>,
  pub variables: Vec<PlacementVariables>,
  pub instance: PublicInstance,
}

#[instrument(skip_all)]
pub fn normalize(
  placements: &[Placement],
  catalogue: &Catalogue,
  evaluator: &impl WitnessEvaluator,
) -> Result<NormalizedCircuit> {
  let mut placements = placements.to_vec();
  for placement in &mut placements {
    placement.subcircuit_id = catalogue.info(placement.name)?.id;
  }
  let pruned = prune_unused_statics(&mut placements)?;
  split_wires(&mut placements)?;
  check_capacity(&placements, catalogue)?;
  debug!(pruned, placements = placements.len(), "wires normalized");

  let variables = placements
    .par_iter()
    .enumerate()
    .map(|(index, placement)| evaluate_placement(index, placement, catalogue, evaluator))
    .collect::<Result<Vec<_>>>()?;
  info!(placements = placements.len(), "all placement instances passed their templates");

  let instance = extract_public_instance(&placements, &variables, catalogue)?;
  Ok(NormalizedCircuit {
    placements,
    variables,
    instance,
  })
}

// ============================================================
// Pruning
// ============================================================

fn const_one_wire() -> Result<usize> {
  match ReservedVariable::ConstOne.descriptor()?.slot {
    WireSlot::Fixed(wire) => Ok(wire),
    WireSlot::Dynamic => Err(SynthError::referential("constant one has no fixed wire")),
  }
}

/// Drops EVM input wire pairs no other placement consumes. The constant one
/// is always kept. Wire indices are left as they are; splitting renumbers.
pub fn prune_unused_statics(placements: &mut [Placement]) -> Result<usize> {
  let evm_in = BufferKind::EvmIn.index();
  let mut referenced: HashSet<usize> = placements
    .iter()
    .enumerate()
    .filter(|&(index, _)| index != evm_in)
    .flat_map(|(_, placement)| &placement.inputs)
    .filter(|input| input.source == evm_in)
    .map(|input| input.wire_index)
    .collect();
  referenced.insert(const_one_wire()?);

  let buffer = placements
    .get_mut(evm_in)
    .ok_or_else(|| SynthError::referential("EVM input buffer is missing"))?;
  let before = buffer.outputs.len();
  buffer.outputs.retain(|point| referenced.contains(&point.wire_index));
  buffer.inputs.retain(|point| referenced.contains(&point.wire_index));
  Ok(before - buffer.outputs.len())
}

// ============================================================
// Wire splitting
// ============================================================

fn half_label(label: &Option<String>, half: WireHalf) -> Option<String> {
  let suffix = match half {
    WireHalf::Lower => "lower",
    WireHalf::Upper => "upper",
  };
  label.as_ref().map(|label| format!("{label} ({suffix} 128 bits)"))
}

/// One wire per value of at most 128 bits, otherwise `[lower, upper]`.
pub fn halve(point: &DataPoint) -> Vec<DataPoint> {
  if point.bit_size <= WIRE_BITS {
    return vec![point.clone()];
  }
  let [lower, upper] = split_value(point.value);
  [(WireHalf::Lower, lower, WIRE_BITS), (WireHalf::Upper, upper, point.bit_size - WIRE_BITS)]
    .into_iter()
    .map(|(half, value, bit_size)| DataPoint {
      source: point.source,
      wire_index: point.wire_index,
      bit_size,
      value,
      ext_source: half_label(&point.ext_source, half),
      ext_dest: half_label(&point.ext_dest, half),
      half: Some(half),
    })
    .collect()
}

/// Split outputs first, remembering where each old output landed, then
/// rebind every input to the new wires of its source.
pub fn split_wires(placements: &mut [Placement]) -> Result<()> {
  let mut trackers: Vec<HashMap<usize, Vec<usize>>> = Vec::with_capacity(placements.len());
  for placement in placements.iter_mut() {
    let mut outputs = Vec::with_capacity(placement.outputs.len());
    let mut tracker: HashMap<usize, Vec<usize>> = HashMap::new();
    for point in &placement.outputs {
      for mut half in halve(point) {
        half.wire_index = outputs.len();
        tracker.entry(point.wire_index).or_default().push(outputs.len());
        outputs.push(half);
      }
    }
    placement.outputs = outputs;
    trackers.push(tracker);
  }

  let rebound = placements
    .iter()
    .enumerate()
    .map(|(index, placement)| {
      let mut inputs = Vec::with_capacity(placement.inputs.len());
      for point in &placement.inputs {
        let halves = halve(point);
        if point.source == index {
          for mut half in halves {
            half.wire_index = inputs.len();
            inputs.push(half);
          }
          continue;
        }
        let slots = trackers
          .get(point.source)
          .and_then(|tracker| tracker.get(&point.wire_index))
          .ok_or_else(|| {
            SynthError::referential(format!(
              "placement {index} reads output {} of placement {} which has no such wire",
              point.wire_index, point.source
            ))
          })?;
        if slots.len() != halves.len() {
          return Err(SynthError::referential(format!(
            "placement {index} reads a {}-bit wire from a {}-wire output of placement {}",
            point.bit_size,
            slots.len(),
            point.source
          )));
        }
        for (mut half, &slot) in halves.into_iter().zip(slots) {
          let produced = &placements[point.source].outputs[slot];
          if produced.value != half.value {
            return Err(SynthError::referential(format!(
              "placement {index} expects {:#x} from wire {slot} of placement {} holding {:#x}",
              half.value, point.source, produced.value
            )));
          }
          half.wire_index = slot;
          inputs.push(half);
        }
      }
      Ok(inputs)
    })
    .collect::<Result<Vec<_>>>()?;

  for (placement, inputs) in placements.iter_mut().zip(rebound) {
    placement.inputs = inputs;
  }
  Ok(())
}

// ============================================================
// Capacity
// ============================================================

pub fn check_capacity(placements: &[Placement], catalogue: &Catalogue) -> Result<()> {
  let mut violations = Vec::new();
  for buffer in BufferKind::ALL {
    let template = catalogue.info(buffer.subcircuit())?;
    let placement = placements
      .get(buffer.index())
      .ok_or_else(|| SynthError::referential(format!("{} is not placed", buffer.usage())))?;
    if placement.inputs.len() > template.n_in() {
      warn!(
        buffer = %template.name,
        required = placement.inputs.len(),
        configured = template.n_in(),
        "buffer too short, regenerate the catalogue with a longer one"
      );
      violations.push(SynthError::capacity(
        template.name.clone(),
        placement.inputs.len(),
        template.n_in(),
      ));
    }
  }
  if placements.len() > catalogue.setup.s_max {
    warn!(
      required = placements.len(),
      configured = catalogue.setup.s_max,
      "too many placements for s_max"
    );
    violations.push(SynthError::capacity("placements (s_max)", placements.len(), catalogue.setup.s_max));
  }
  match violations.into_iter().next() {
    Some(first) => Err(first),
    None => Ok(()),
  }
}

// ============================================================
// Witness
// ============================================================

/// Values of `points`, zero padded to `len`.
fn padded(points: &[DataPoint], len: usize, what: &str, index: usize, template: &SubcircuitInfo) -> Result<Vec<U256>> {
  if points.len() > len {
    return Err(SynthError::capacity(
      format!("{what} wires of placement {index} ({})", template.name),
      points.len(),
      len,
    ));
  }
  let mut values: Vec<U256> = points.iter().map(|point| point.value).collect();
  values.resize(len, U256::ZERO);
  Ok(values)
}

fn evaluate_placement(
  index: usize,
  placement: &Placement,
  catalogue: &Catalogue,
  evaluator: &impl WitnessEvaluator,
) -> Result<PlacementVariables> {
  let template = catalogue.info_by_id(placement.subcircuit_id)?;
  let fail = |reason: String| SynthError::Evaluator {
    placement: index,
    subcircuit: template.name.clone(),
    reason,
  };
  let inputs = padded(&placement.inputs, template.n_in(), "input", index, template)?;
  let outputs = padded(&placement.outputs, template.n_out(), "output", index, template)?;

  let variables = evaluator
    .evaluate(template, &inputs)
    .map_err(|err| fail(err.to_string()))?;
  if variables.len() != template.flatten_map.len() {
    return Err(fail(format!(
      "{} variables cannot be flattened by a map of {} wires",
      variables.len(),
      template.flatten_map.len()
    )));
  }
  for (j, expected) in outputs.iter().enumerate() {
    let evaluated = variables[template.output_local(j)];
    if evaluated != *expected {
      return Err(fail(format!(
        "output {j} ({}) evaluates to {evaluated:#x}, recorded {expected:#x}",
        placement.usage
      )));
    }
  }
  Ok(PlacementVariables {
    subcircuit_id: template.id,
    variables,
  })
}

// ============================================================
// Public instance
// ============================================================

fn describe(placement: &Placement, template: &SubcircuitInfo, local: usize) -> String {
  let (points, position, side) = if local < template.input_local(0) {
    (&placement.outputs, local - template.output_local(0), "output")
  } else {
    (&placement.inputs, local - template.input_local(0), "input")
  };
  match points.get(position) {
    Some(point) => point
      .label()
      .map(str::to_string)
      .unwrap_or_else(|| format!("{} {side} {position}", placement.usage)),
    None => format!("Unused {} {side} {position}", placement.usage),
  }
}

pub fn extract_public_instance(
  placements: &[Placement],
  variables: &[PlacementVariables],
  catalogue: &Catalogue,
) -> Result<PublicInstance> {
  let setup = &catalogue.setup;
  let mut values = Vec::with_capacity(setup.l);
  let mut descriptions = Vec::with_capacity(setup.l);
  for global in 0..setup.l {
    let (sid, local) = catalogue.global_wires[global];
    let index = placements
      .iter()
      .position(|placement| placement.subcircuit_id == sid)
      .ok_or_else(|| SynthError::Catalogue(format!("public wire {global} belongs to unplaced subcircuit {sid}")))?;
    let value = variables[index].variables.get(local).copied().ok_or_else(|| {
      SynthError::Catalogue(format!("public wire {global} points past the variables of placement {index}"))
    })?;
    if local == 0 {
      return Err(SynthError::Catalogue(format!("public wire {global} is a constant wire")));
    }
    values.push(value);
    descriptions.push(describe(&placements[index], catalogue.info_by_id(sid)?, local));
  }

  let user = 0..setup.l_user;
  let block = setup.l_user..setup.l_block;
  let function = setup.l_block..setup.l;
  Ok(PublicInstance {
    a_pub_user: values[user.clone()].to_vec(),
    a_pub_block: values[block.clone()].to_vec(),
    a_pub_function: values[function.clone()].to_vec(),
    a_pub_user_description: descriptions[user].to_vec(),
    a_pub_block_description: descriptions[block].to_vec(),
    a_pub_function_description: descriptions[function].to_vec(),
  })
}
