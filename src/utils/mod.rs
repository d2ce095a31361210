//! The `utils` module collects the small building blocks shared across the
//! broker: error types, logging setup, the clock abstraction, wire-string
//! validation, glob matching and memory-size parsing.

pub mod clock;
pub mod error;
pub mod logging;
pub mod memory;
pub mod pattern;
pub mod validate;
