//! Repository traits (interfaces)
//!
//! Contracts for the container parsers the domain depends on.

mod container_reader;

pub use container_reader::{ContainerEntries, ContainerEntryReader, EntryView, EntryWindow};
