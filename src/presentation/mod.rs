//! Presentation layer
//!
//! Command line surface of the `container-id` binary.

pub mod cli;
