//! Infrastructure layer
//!
//! Concrete container parsers behind the domain's entry reader trait, and
//! scratch storage for buffered inputs.

pub mod containers;
pub mod scratch;
