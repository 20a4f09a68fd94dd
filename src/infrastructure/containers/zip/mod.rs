//! ZIP container reader
//!
//! Reads entries out of PKZIP archives (stored and deflated, including
//! ZIP64). Entries are addressed by their full stored path.

mod parser;

pub use parser::{CentralDirectory, CentralEntry, ZipEntryReader, ZipParser};
