//! DSP primitives used by the effect graph nodes.
//!
//! Everything here is allocation-free once constructed and deterministic:
//! the same input and parameter sequence always yields the same output.

pub mod pan;
pub mod reverb;
