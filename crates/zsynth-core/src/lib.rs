//! Execution-to-circuit synthesis.
//!
//! A transaction is shadow-executed step by step against a recorded
//! interpreter trace. Every instruction becomes one or more placements of
//! fixed-shape subcircuits, wired together by [`data_point::DataPoint`]s that
//! carry both provenance and the concrete witness value. The captured
//! placement list is then normalized into template-compatible wires
//! ([`circuit::variables`]) and turned into copy constraints
//! ([`circuit::permutation`]).

pub mod arith;
pub mod buffer;
pub mod circuit;
pub mod config;
pub mod crypto;
pub mod data_point;
pub mod error;
pub mod execute;
pub mod memory;
pub mod opcode;
pub mod output;
pub mod stack;
pub mod storage;
pub mod synthesizer;
pub mod trace;
pub mod transaction;

pub use error::{Result, SynthError};
