use revm::primitives::{Address, U256};
use thiserror::Error;

/// Every failure aborts synthesis of the whole transaction.
#[derive(Debug, Error)]
pub enum SynthError {
  /// The shadow-computed value disagrees with the interpreter.
  #[error("divergence: {0}")]
  Divergence(String),

  /// A buffer or the whole circuit outgrew the template catalogue.
  #[error("capacity exceeded for {what}: requires at least {required}, configured {configured}")]
  Capacity {
    what: String,
    required: usize,
    configured: usize,
  },

  /// A wire or storage access refers to something that does not exist yet.
  #[error("referential integrity: {0}")]
  Referential(String),

  /// Unsupported feature or invalid input.
  #[error("precondition: {0}")]
  Precondition(String),

  /// A witness evaluator rejected or mis-computed a placement.
  #[error("witness evaluation of placement {placement} ({subcircuit}): {reason}")]
  Evaluator {
    placement: usize,
    subcircuit: String,
    reason: String,
  },

  #[error("invalid template catalogue: {0}")]
  Catalogue(String),

  #[error("{name} (0x{opcode:02x}) at pc {pc} in {code_address}: {source}")]
  Step {
    opcode: u8,
    name: &'static str,
    pc: usize,
    code_address: Address,
    #[source]
    source: Box<SynthError>,
  },

  #[error("host execution failed: {0}")]
  Host(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SynthError>;

impl SynthError {
  pub fn divergence(msg: impl Into<String>) -> Self {
    Self::Divergence(msg.into())
  }

  pub fn referential(msg: impl Into<String>) -> Self {
    Self::Referential(msg.into())
  }

  pub fn precondition(msg: impl Into<String>) -> Self {
    Self::Precondition(msg.into())
  }

  pub fn capacity(what: impl Into<String>, required: usize, configured: usize) -> Self {
    Self::Capacity {
      what: what.into(),
      required,
      configured,
    }
  }

  /// Innermost error, skipping step context wrappers.
  pub fn root_cause(&self) -> &SynthError {
    match self {
      Self::Step { source, .. } => source.root_cause(),
      other => other,
    }
  }
}

/// Compare a shadow value against the interpreter's value.
pub(crate) fn ensure_matches(what: &str, shadow: U256, actual: U256) -> Result<()> {
  if shadow != actual {
    return Err(SynthError::divergence(format!(
      "{what}: synthesized {shadow:#x}, interpreter {actual:#x}"
    )));
  }
  Ok(())
}
