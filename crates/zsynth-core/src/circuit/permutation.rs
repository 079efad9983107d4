//! Copy constraints between placements.
//!
//! Every private interface wire `(placement, global wire)` joins exactly one
//! group of wires that must carry equal values. A group is led by a
//! representative: an output wire, an unused input or a private input of the
//! private buffer. Groups are then emitted as rings, each member pointing at
//! the next.

use super::variables::NormalizedCircuit;
use crate::buffer::{BufferKind, ReservedVariable, WireSlot};
use crate::config::Catalogue;
use crate::data_point::Placement;
use crate::error::{Result, SynthError};
use rayon::prelude::*;
use revm::primitives::U256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use tracing::{debug, info, instrument};

/// One interface wire of one placement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WireRef {
  pub placement: usize,
  pub global: usize,
}

/// `(row, col)` is copied from `(x, y)`: rows are private wire ids offset by
/// `l`, columns are placement indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermutationEntry {
  pub row: usize,
  pub col: usize,
  #[serde(rename = "X")]
  pub x: usize,
  #[serde(rename = "Y")]
  pub y: usize,
}

#[derive(Clone, Debug)]
pub struct Permutation {
  pub entries: Vec<PermutationEntry>,
  /// `[row][col]` wire id of the copy target.
  pub permutation_x: Vec<Vec<usize>>,
  /// `[row][col]` placement index of the copy target.
  pub permutation_y: Vec<Vec<usize>>,
}

// ============================================================
// Groups
// ============================================================

#[derive(Default)]
struct Groups {
  members: Vec<Vec<WireRef>>,
  owner: HashMap<WireRef, usize>,
}

impl Groups {
  fn open(&mut self, representative: WireRef) -> Result<()> {
    if self.owner.insert(representative, self.members.len()).is_some() {
      return Err(SynthError::referential(format!("{representative:?} leads two groups")));
    }
    self.members.push(vec![representative]);
    Ok(())
  }

  fn join(&mut self, parent: WireRef, child: WireRef) -> Result<()> {
    let group = *self.owner.get(&parent).ok_or_else(|| {
      SynthError::referential(format!("{child:?} has parent {parent:?}, which belongs to no group"))
    })?;
    if self.owner.insert(child, group).is_some() {
      return Err(SynthError::referential(format!("{child:?} was grouped twice")));
    }
    self.members[group].push(child);
    Ok(())
  }
}

fn build_groups(placements: &[Placement], catalogue: &Catalogue, private: &Range<usize>) -> Result<Groups> {
  let mut groups = Groups::default();

  for (index, placement) in placements.iter().enumerate() {
    let template = catalogue.info_by_id(placement.subcircuit_id)?;
    for j in 0..template.n_out() {
      let global = template.flatten_map[template.output_local(j)];
      if private.contains(&global) {
        groups.open(WireRef { placement: index, global })?;
      }
    }
  }

  let private_in = BufferKind::PrivateIn.index();
  for (index, placement) in placements.iter().enumerate() {
    let template = catalogue.info_by_id(placement.subcircuit_id)?;
    for j in 0..template.n_in() {
      let global = template.flatten_map[template.input_local(j)];
      if !private.contains(&global) {
        continue;
      }
      let wire = WireRef { placement: index, global };
      match placement.inputs.get(j) {
        Some(point) if point.source != index => {
          let parent = placements.get(point.source).ok_or_else(|| {
            SynthError::referential(format!("{wire:?} reads from missing placement {}", point.source))
          })?;
          let produced = parent.outputs.get(point.wire_index).ok_or_else(|| {
            SynthError::referential(format!(
              "{wire:?} reads output {} of placement {}, which refers to nothing",
              point.wire_index, point.source
            ))
          })?;
          if produced.value != point.value {
            return Err(SynthError::referential(format!(
              "{wire:?} holds {:#x} but its source holds {:#x}",
              point.value, produced.value
            )));
          }
          let parent_template = catalogue.info_by_id(parent.subcircuit_id)?;
          let parent_global = parent_template.flatten_map[parent_template.output_local(point.wire_index)];
          if !private.contains(&parent_global) {
            return Err(SynthError::referential(format!(
              "{wire:?} reads public or internal wire {parent_global}"
            )));
          }
          groups.join(
            WireRef {
              placement: point.source,
              global: parent_global,
            },
            wire,
          )?;
        }
        None => groups.open(wire)?,
        Some(point) if point.source == private_in => groups.open(wire)?,
        Some(_) => {
          return Err(SynthError::referential(format!(
            "{wire:?} has no source and is not qualified to lead a group"
          )));
        }
      }
    }
  }

  merge_constant_wires(&mut groups, placements, catalogue)?;
  Ok(groups)
}

/// Wire 0 of every template is the constant one. All of them join the group
/// of the constant one buffer wire.
fn merge_constant_wires(groups: &mut Groups, placements: &[Placement], catalogue: &Catalogue) -> Result<()> {
  let evm_in = BufferKind::EvmIn.index();
  let WireSlot::Fixed(const_wire) = ReservedVariable::ConstOne.descriptor()?.slot else {
    return Err(SynthError::referential("constant one has no fixed wire"));
  };
  let buffer = &placements[evm_in];
  if buffer.outputs.get(const_wire).map(|point| point.value) != Some(U256::from(1u64)) {
    return Err(SynthError::referential("constant one wire does not hold one"));
  }
  let template = catalogue.info_by_id(buffer.subcircuit_id)?;
  let representative = WireRef {
    placement: evm_in,
    global: template.flatten_map[template.output_local(const_wire)],
  };
  for (index, placement) in placements.iter().enumerate() {
    let template = catalogue.info_by_id(placement.subcircuit_id)?;
    let wire = WireRef {
      placement: index,
      global: template.flatten_map[0],
    };
    if !groups.owner.contains_key(&wire) {
      groups.join(representative, wire)?;
    }
  }
  Ok(())
}

// ============================================================
// Rings
// ============================================================

#[instrument(skip_all)]
pub fn generate(circuit: &NormalizedCircuit, catalogue: &Catalogue) -> Result<Permutation> {
  let setup = &catalogue.setup;
  let private = setup.l..setup.l_d;
  let placements = &circuit.placements;
  let groups = build_groups(placements, catalogue, &private)?;
  debug!(groups = groups.members.len(), "copy groups built");

  let rows = setup.l_d - setup.l;
  let cols = placements.len();
  let mut permutation_x: Vec<Vec<usize>> = (0..rows).map(|row| vec![row; cols]).collect();
  let mut permutation_y: Vec<Vec<usize>> = (0..rows).map(|_| (0..cols).collect()).collect();
  let mut entries = Vec::new();

  for group in groups.members.iter().filter(|group| group.len() > 1) {
    for (i, element) in group.iter().enumerate() {
      let next = group[(i + 1) % group.len()];
      let entry = PermutationEntry {
        row: element.global - setup.l,
        col: element.placement,
        x: next.global - setup.l,
        y: next.placement,
      };
      if entry.row >= rows || entry.col >= cols {
        return Err(SynthError::referential(format!("{entry:?} lies outside the permutation matrices")));
      }
      permutation_x[entry.row][entry.col] = entry.x;
      permutation_y[entry.row][entry.col] = entry.y;
      entries.push(entry);
    }
  }

  let permutation = Permutation {
    entries,
    permutation_x,
    permutation_y,
  };
  validate(circuit, catalogue, &permutation)?;
  Ok(permutation)
}

/// Local witness value of `placement` at private wire `row`; wires outside
/// the placement's template read as the constant one.
fn wire_value(circuit: &NormalizedCircuit, catalogue: &Catalogue, placement: usize, row: usize) -> Result<U256> {
  let global = row + catalogue.setup.l;
  let (sid, local) = catalogue
    .global_wires
    .get(global)
    .copied()
    .ok_or_else(|| SynthError::Catalogue(format!("invalid global wire id {global}")))?;
  let variables = circuit
    .variables
    .get(placement)
    .ok_or_else(|| SynthError::referential(format!("placement {placement} has no variables")))?;
  if variables.subcircuit_id != sid {
    return Ok(U256::from(1u64));
  }
  variables
    .variables
    .get(local)
    .copied()
    .ok_or_else(|| SynthError::referential(format!("placement {placement} has no local wire {local}")))
}

/// Every linked pair must hold the same witness value.
pub fn validate(circuit: &NormalizedCircuit, catalogue: &Catalogue, permutation: &Permutation) -> Result<()> {
  if permutation.entries.is_empty() {
    return Err(SynthError::referential("no permutation detected"));
  }
  permutation.entries.par_iter().try_for_each(|entry| {
    let here = wire_value(circuit, catalogue, entry.col, entry.row)?;
    let there = wire_value(circuit, catalogue, entry.y, entry.x)?;
    if here != there {
      return Err(SynthError::divergence(format!(
        "copy constraint {entry:?} links {here:#x} to {there:#x}"
      )));
    }
    Ok(())
  })?;
  info!(edges = permutation.entries.len(), "permutation check clear");
  Ok(())
}
