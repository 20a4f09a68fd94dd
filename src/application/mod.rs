//! Application layer
//!
//! Use cases that orchestrate the domain logic over real inputs.

pub mod dto;
mod identify_container;

pub use identify_container::ContainerContentIdentifier;
