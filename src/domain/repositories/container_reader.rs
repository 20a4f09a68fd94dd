//! Container entry reader trait
//!
//! Defines how the domain sees the inside of a container: a set of named
//! entries, each a contiguous view of its decompressed content. Concrete
//! readers for each container kind live in the infrastructure layer.

use crate::domain::entities::{ContainerKind, EntryReach, UniqueFileEntries};
use crate::domain::services::ScanBudget;
use crate::error::ContainerError;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

/// The decompressed content of one container entry.
///
/// Stored entries can borrow straight from the spooled container bytes;
/// everything else is owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryView<'a> {
    bytes: Cow<'a, [u8]>,
}

impl<'a> EntryView<'a> {
    pub fn borrowed(bytes: &'a [u8]) -> Self {
        Self {
            bytes: Cow::Borrowed(bytes),
        }
    }

    pub fn owned(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Cow::Owned(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self.bytes, Cow::Borrowed(_))
    }

    /// `len` bytes starting `offset` bytes from the start
    pub fn from_start(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = offset.checked_add(len)?;
        self.bytes.get(offset..end)
    }

    /// `len` bytes ending `offset` bytes before the end
    pub fn from_end(&self, offset: usize, len: usize) -> Option<&[u8]> {
        let end = self.bytes.len().checked_sub(offset)?;
        let start = end.checked_sub(len)?;
        self.bytes.get(start..end)
    }
}

/// How much of an entry a reader has to materialize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryWindow {
    Whole,
    /// Only the first `head` and the last `tail` bytes are inspected
    Ends { head: usize, tail: usize },
}

impl EntryWindow {
    pub fn new(reach: EntryReach, budget: ScanBudget) -> Self {
        match budget.limit() {
            None => Self::Whole,
            Some(n) => Self::Ends {
                head: if reach.head { n } else { 0 },
                tail: if reach.tail { n } else { 0 },
            },
        }
    }

    /// True when an entry of `len` bytes fits inside the window
    pub fn covers(&self, len: u64) -> bool {
        match *self {
            Self::Whole => true,
            Self::Ends { head, tail } => (head as u64).saturating_add(tail as u64) >= len,
        }
    }
}

/// The requested entries found in one container, keyed by path
#[derive(Debug, Default)]
pub struct ContainerEntries<'a> {
    entries: HashMap<String, EntryView<'a>>,
}

impl<'a> ContainerEntries<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry. The first entry stored under a path wins, matching how
    /// archive tools resolve duplicate names.
    pub fn insert(&mut self, path: impl Into<String>, view: EntryView<'a>) {
        self.entries.entry(path.into()).or_insert(view);
    }

    pub fn get(&self, path: &str) -> Option<&EntryView<'a>> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Opens one kind of container and exposes the entries a catalog needs.
///
/// Implementations are stateless so a single instance can serve concurrent
/// requests.
///
/// # Example
///
/// ```ignore
/// let reader = ZipEntryReader::default();
/// let entries = reader.read_entries_within(&bytes, catalog.unique_entries(), budget)?;
/// if let Some(mimetype) = entries.get("mimetype") {
///     // inspect mimetype.as_bytes()
/// }
/// ```
pub trait ContainerEntryReader: Send + Sync + fmt::Debug {
    /// The container kind this reader parses
    fn kind(&self) -> ContainerKind;

    /// Parses `container` and materializes every entry whose path is in
    /// `wanted`.
    ///
    /// # Errors
    ///
    /// Returns a [`ContainerError`] when the container structure is
    /// malformed. A wanted entry that is simply absent is not an error.
    fn read_entries<'a>(
        &self,
        container: &'a [u8],
        wanted: &UniqueFileEntries,
    ) -> Result<ContainerEntries<'a>, ContainerError> {
        self.read_entries_within(container, wanted, ScanBudget::Unbounded)
    }

    /// Like [`read_entries`](Self::read_entries), but an entry larger than
    /// its [`EntryWindow`] may be cut down to the bytes rules can see under
    /// `budget`: its leading bytes, its trailing bytes, or both joined.
    fn read_entries_within<'a>(
        &self,
        container: &'a [u8],
        wanted: &UniqueFileEntries,
        budget: ScanBudget,
    ) -> Result<ContainerEntries<'a>, ContainerError>;
}
