//! Signature matcher
//!
//! Evaluates a single byte-sequence rule against the bytes of a single
//! entry. Rules arrive pre-compiled into segments (a gap window followed by
//! a fixed-width fragment); matching walks the segments left to right and
//! backtracks over the candidate positions each gap allows, remembering
//! dead ends so the work stays proportional to segments times window.
//! Literal fragments are located with `memchr::memmem`.
//!
//! End-of-entry rules are compiled reversed and run over the reversed tail
//! of the entry, so all three anchors share the same forward search.

use crate::domain::entities::{Anchor, ByteSequenceRule, Segment};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Upper bound on how many entry bytes a rule may inspect.
///
/// Beginning-of-entry and variable rules see only the first `n` bytes;
/// end-of-entry rules see only the last `n` bytes. The raw form `-1` (or any
/// negative value) means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ScanBudget {
    #[default]
    Unbounded,
    Bytes(usize),
}

impl ScanBudget {
    pub fn limit(&self) -> Option<usize> {
        match self {
            ScanBudget::Unbounded => None,
            ScanBudget::Bytes(n) => Some(*n),
        }
    }

    /// The part of `bytes` visible to forward-scanning rules
    #[inline]
    pub fn head<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        match self.limit() {
            Some(n) if n < bytes.len() => &bytes[..n],
            _ => bytes,
        }
    }

    /// The part of `bytes` visible to end-anchored rules
    #[inline]
    pub fn tail<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        match self.limit() {
            Some(n) if n < bytes.len() => &bytes[bytes.len() - n..],
            _ => bytes,
        }
    }
}

impl From<i64> for ScanBudget {
    fn from(raw: i64) -> Self {
        usize::try_from(raw).map_or(ScanBudget::Unbounded, ScanBudget::Bytes)
    }
}

impl From<ScanBudget> for i64 {
    fn from(budget: ScanBudget) -> Self {
        match budget {
            ScanBudget::Unbounded => -1,
            ScanBudget::Bytes(n) => i64::try_from(n).unwrap_or(i64::MAX),
        }
    }
}

/// Returns true if `rule` matches `entry` within `budget`.
///
/// Rules are evaluated on their own; the offsets of a variable rule are
/// measured from the start of the entry.
pub fn matches(entry: &[u8], rule: &ByteSequenceRule, budget: ScanBudget) -> bool {
    if entry.len() < rule.min_entry_len() {
        return false;
    }

    match rule.anchor() {
        Anchor::BeginningOfEntry | Anchor::Variable => {
            Search::new(budget.head(entry), rule.program()).run()
        }
        Anchor::EndOfEntry => {
            let reversed: Vec<u8> = budget.tail(entry).iter().rev().copied().collect();
            Search::new(&reversed, rule.program()).run()
        }
    }
}

/// Backtracking alignment of compiled segments over one window.
///
/// Failed `(segment, position)` states are remembered so each is explored at
/// most once. After an unbounded gap, failing at `pos` implies failing at
/// every later position, so those segments keep a single low-water mark.
struct Search<'w> {
    window: &'w [u8],
    segments: &'w [Segment],
    failed_from: Vec<usize>,
    failed: HashSet<(usize, usize)>,
}

impl<'w> Search<'w> {
    fn new(window: &'w [u8], segments: &'w [Segment]) -> Self {
        Self {
            window,
            segments,
            failed_from: vec![usize::MAX; segments.len()],
            failed: HashSet::new(),
        }
    }

    fn run(mut self) -> bool {
        self.find(0, 0)
    }

    fn find(&mut self, index: usize, pos: usize) -> bool {
        let segments = self.segments;
        let Some(segment) = segments.get(index) else {
            return true;
        };
        if pos >= self.failed_from[index] || self.failed.contains(&(index, pos)) {
            return false;
        }

        if self.try_candidates(segment, index, pos) {
            return true;
        }
        match segment.gap_max {
            None => self.failed_from[index] = self.failed_from[index].min(pos),
            Some(_) => {
                self.failed.insert((index, pos));
            }
        }
        false
    }

    fn try_candidates(&mut self, segment: &Segment, index: usize, pos: usize) -> bool {
        let len = segment.len();
        let Some(first) = pos.checked_add(segment.gap_min) else {
            return false;
        };
        let Some(last_start) = self.window.len().checked_sub(len) else {
            return false;
        };
        if first > last_start {
            return false;
        }
        let last = match segment.gap_max {
            Some(max) => pos.saturating_add(max).min(last_start),
            None => last_start,
        };

        let mut from = first;
        while let Some(start) = segment.next_candidate(self.window, from, last) {
            if self.find(index + 1, start + len) {
                return true;
            }
            from = start + 1;
        }
        false
    }
}
