//! The circuit IR: wires with provenance and the placements that produce them.

use crate::config::Subcircuit;
use crate::crypto::{BLS_SCALAR_MODULUS, JUBJUB_ORDER};
use crate::error::{Result, SynthError};
use revm::primitives::U256;

/// Which half of a split wire a normalized data point carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WireHalf {
  Lower,
  Upper,
}

/// A value handle: the output slot that produced it plus its concrete value.
///
/// Data points are plain values. Every consumer holds its own clone, so no two
/// wires can alias each other's provenance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataPoint {
  /// Index of the producing placement (or reserved buffer).
  pub source: usize,
  /// Output slot within the producing placement.
  pub wire_index: usize,
  pub bit_size: usize,
  pub value: U256,
  pub ext_source: Option<String>,
  pub ext_dest: Option<String>,
  /// Set only on wires produced by 128-bit splitting.
  pub half: Option<WireHalf>,
}

impl DataPoint {
  pub fn new(source: usize, wire_index: usize, bit_size: usize, value: U256) -> Result<Self> {
    validate_value(value, bit_size)?;
    Ok(Self {
      source,
      wire_index,
      bit_size,
      value,
      ext_source: None,
      ext_dest: None,
      half: None,
    })
  }

  pub fn with_ext_source(mut self, label: impl Into<String>) -> Self {
    self.ext_source = Some(label.into());
    self
  }

  pub fn with_ext_dest(mut self, label: impl Into<String>) -> Self {
    self.ext_dest = Some(label.into());
    self
  }

  /// Boundary annotation for public instance descriptions.
  pub fn label(&self) -> Option<&str> {
    self.ext_dest.as_deref().or(self.ext_source.as_deref())
  }
}

/// Width rules every data point obeys.
///
/// 255-bit wires carry BLS12-381 scalar field elements and 252-bit wires carry
/// Jubjub scalars, so both must also be canonical for their field.
pub fn validate_value(value: U256, bit_size: usize) -> Result<()> {
  if bit_size == 0 || bit_size > 256 {
    return Err(SynthError::precondition(format!("unsupported bit size {bit_size}")));
  }
  if bit_size < 256 && value.bit_len() > bit_size {
    return Err(SynthError::precondition(format!(
      "value {value:#x} does not fit in {bit_size} bits"
    )));
  }
  match bit_size {
    255 if value >= BLS_SCALAR_MODULUS => Err(SynthError::precondition(format!(
      "value {value:#x} is not a canonical BLS12-381 scalar"
    ))),
    252 if value >= JUBJUB_ORDER => Err(SynthError::precondition(format!(
      "value {value:#x} is not a canonical Jubjub scalar"
    ))),
    _ => Ok(()),
  }
}

/// One instance of a subcircuit template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
  pub name: Subcircuit,
  pub subcircuit_id: usize,
  /// Logical operation this placement realizes, for diagnostics.
  pub usage: String,
  pub inputs: Vec<DataPoint>,
  pub outputs: Vec<DataPoint>,
}

impl Placement {
  pub fn new(name: Subcircuit, usage: impl Into<String>) -> Self {
    Self {
      name,
      subcircuit_id: name.default_id(),
      usage: usage.into(),
      inputs: Vec::new(),
      outputs: Vec::new(),
    }
  }
}
