//! OLE2 container reader
//!
//! Reads streams out of Microsoft compound files (version 3 and 4).
//! Streams inside nested storages are addressed as `Storage/Stream`.

mod parser;

pub use parser::{DirectoryEntry, Ole2EntryReader, Ole2Header, Ole2Parser};
