//! Byte-sequence rules
//!
//! A rule is an anchored pattern of literal bytes, byte classes and
//! wildcard gaps that must align somewhere inside a container entry.
//! Rules are written in the usual PRONOM-style hex notation:
//!
//! ```text
//! 50 4B 03 04        literal bytes (whitespace is ignored)
//! ??                 any single byte
//! {4}  {2-8}  {4-*}  gaps of fixed, bounded or unbounded length
//! *                  unbounded gap, same as {0-*}
//! [00:1F]  [!0A]     byte range / inverted class
//! 'mimetype'         ASCII literal
//! ```

use crate::error::PatternError;
use memchr::memmem::Finder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reference point of a rule's offset window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    /// Offsets count forward from the first byte of the entry
    #[default]
    BeginningOfEntry,
    /// Offsets count backward from the last byte of the entry
    EndOfEntry,
    /// The run may occur anywhere; offsets count forward from the first
    /// byte and the window is unbounded unless a maximum is given
    Variable,
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Anchor::BeginningOfEntry => "BOF",
            Anchor::EndOfEntry => "EOF",
            Anchor::Variable => "VAR",
        };
        f.write_str(name)
    }
}

/// An inclusive byte range, optionally inverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteClass {
    lo: u8,
    hi: u8,
    inverted: bool,
}

impl ByteClass {
    pub fn range(lo: u8, hi: u8) -> Self {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        Self {
            lo,
            hi,
            inverted: false,
        }
    }

    pub fn single(byte: u8) -> Self {
        Self::range(byte, byte)
    }

    #[must_use]
    pub fn inverted(self) -> Self {
        Self {
            inverted: !self.inverted,
            ..self
        }
    }

    #[inline]
    pub fn contains(&self, byte: u8) -> bool {
        (self.lo..=self.hi).contains(&byte) != self.inverted
    }
}

impl fmt::Display for ByteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        if self.inverted {
            f.write_str("!")?;
        }
        write!(f, "{:02X}", self.lo)?;
        if self.hi != self.lo {
            write!(f, ":{:02X}", self.hi)?;
        }
        f.write_str("]")
    }
}

/// One element of a byte pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteToken {
    /// Exactly this byte
    Byte(u8),
    /// Any single byte
    Any,
    /// One byte accepted by the class
    Class(ByteClass),
    /// Between `min` and `max` bytes of anything; `max: None` is unbounded
    Gap { min: usize, max: Option<usize> },
}

impl ByteToken {
    pub const fn gap(min: usize, max: Option<usize>) -> Self {
        ByteToken::Gap { min, max }
    }

    pub const fn is_gap(&self) -> bool {
        matches!(self, ByteToken::Gap { .. })
    }

    #[inline]
    fn accepts(&self, byte: u8) -> bool {
        match self {
            ByteToken::Byte(b) => *b == byte,
            ByteToken::Any => true,
            ByteToken::Class(class) => class.contains(byte),
            ByteToken::Gap { .. } => false,
        }
    }
}

impl fmt::Display for ByteToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteToken::Byte(b) => write!(f, "{b:02X}"),
            ByteToken::Any => f.write_str("??"),
            ByteToken::Class(class) => write!(f, "{class}"),
            ByteToken::Gap { min: 0, max: None } => f.write_str("*"),
            ByteToken::Gap { min, max: None } => write!(f, "{{{min}-*}}"),
            ByteToken::Gap { min, max: Some(max) } if min == max => write!(f, "{{{min}}}"),
            ByteToken::Gap {
                min,
                max: Some(max),
            } => write!(f, "{{{min}-{max}}}"),
        }
    }
}

/// A normalized token sequence: adjacent gaps are merged and empty gaps
/// are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BytePattern(Vec<ByteToken>);

impl BytePattern {
    pub fn from_tokens(tokens: impl IntoIterator<Item = ByteToken>) -> Result<Self, PatternError> {
        let mut out: Vec<ByteToken> = Vec::new();

        for (index, token) in tokens.into_iter().enumerate() {
            let ByteToken::Gap { min, max } = token else {
                out.push(token);
                continue;
            };

            if max.is_some_and(|max| max < min) {
                return Err(PatternError::new(
                    index,
                    format!("gap minimum {min} exceeds its maximum"),
                ));
            }

            if let Some(ByteToken::Gap {
                min: prev_min,
                max: prev_max,
            }) = out.last_mut()
            {
                *prev_min = prev_min.saturating_add(min);
                *prev_max = match (*prev_max, max) {
                    (Some(a), Some(b)) => Some(a.saturating_add(b)),
                    _ => None,
                };
                continue;
            }

            if min == 0 && max == Some(0) {
                continue;
            }
            out.push(token);
        }

        Ok(Self(out))
    }

    /// Literal bytes only
    pub fn literal(bytes: &[u8]) -> Self {
        Self(bytes.iter().copied().map(ByteToken::Byte).collect())
    }

    pub fn tokens(&self) -> &[ByteToken] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The fewest bytes a match of this pattern can span
    pub fn min_len(&self) -> usize {
        self.0
            .iter()
            .map(|token| match token {
                ByteToken::Gap { min, .. } => *min,
                _ => 1,
            })
            .fold(0usize, usize::saturating_add)
    }
}

impl fmt::Display for BytePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.0 {
            write!(f, "{token}")?;
        }
        Ok(())
    }
}

impl FromStr for BytePattern {
    type Err = PatternError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let bytes = text.as_bytes();
        let mut tokens = Vec::new();
        let mut pos = 0;

        while pos < bytes.len() {
            match bytes[pos] {
                b if b.is_ascii_whitespace() => pos += 1,
                b'?' => {
                    if bytes.get(pos + 1) != Some(&b'?') {
                        return Err(PatternError::new(pos, "expected '??'"));
                    }
                    tokens.push(ByteToken::Any);
                    pos += 2;
                }
                b'*' => {
                    tokens.push(ByteToken::gap(0, None));
                    pos += 1;
                }
                b'{' => {
                    let (body, next) = delimited(text, pos, b'}')?;
                    tokens.push(parse_gap(body, pos + 1)?);
                    pos = next;
                }
                b'[' => {
                    let (body, next) = delimited(text, pos, b']')?;
                    tokens.push(ByteToken::Class(parse_class(body, pos + 1)?));
                    pos = next;
                }
                b'\'' => {
                    let (body, next) = delimited(text, pos, b'\'')?;
                    if body.is_empty() {
                        return Err(PatternError::new(pos, "empty quoted literal"));
                    }
                    tokens.extend(body.bytes().map(ByteToken::Byte));
                    pos = next;
                }
                _ => {
                    tokens.push(ByteToken::Byte(hex_pair(bytes, pos)?));
                    pos += 2;
                }
            }
        }

        BytePattern::from_tokens(tokens)
    }
}

/// Returns the text between `open` and the next `close` byte, and the
/// position just past the closing byte.
fn delimited(text: &str, open: usize, close: u8) -> Result<(&str, usize), PatternError> {
    let start = open + 1;
    let len = memchr::memchr(close, &text.as_bytes()[start..]).ok_or_else(|| {
        PatternError::new(open, format!("unterminated '{}'", text.as_bytes()[open] as char))
    })?;
    Ok((&text[start..start + len], start + len + 1))
}

fn hex_value(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

fn hex_pair(bytes: &[u8], pos: usize) -> Result<u8, PatternError> {
    let hi = bytes.get(pos).copied().and_then(hex_value);
    let lo = bytes.get(pos + 1).copied().and_then(hex_value);
    match (hi, lo) {
        (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
        _ => Err(PatternError::new(pos, "expected a two-digit hex byte")),
    }
}

fn parse_count(text: &str, at: usize) -> Result<usize, PatternError> {
    text.trim()
        .parse()
        .map_err(|_| PatternError::new(at, format!("invalid gap length '{}'", text.trim())))
}

fn parse_gap(body: &str, at: usize) -> Result<ByteToken, PatternError> {
    let (min, max) = match body.split_once('-') {
        Some((min, max)) if max.trim() == "*" => (parse_count(min, at)?, None),
        Some((min, max)) => (parse_count(min, at)?, Some(parse_count(max, at)?)),
        None => {
            let n = parse_count(body, at)?;
            (n, Some(n))
        }
    };
    if max.is_some_and(|max| max < min) {
        return Err(PatternError::new(at, format!("gap minimum {min} exceeds its maximum")));
    }
    Ok(ByteToken::gap(min, max))
}

fn parse_class(body: &str, at: usize) -> Result<ByteClass, PatternError> {
    let body = body.trim();
    let (inverted, body) = match body.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, body),
    };

    let single = |part: &str| -> Result<u8, PatternError> {
        let part = part.trim();
        if part.len() != 2 {
            return Err(PatternError::new(at, format!("invalid class byte '{part}'")));
        }
        hex_pair(part.as_bytes(), 0).map_err(|_| PatternError::new(at, format!("invalid class byte '{part}'")))
    };

    let class = match body.split_once(':') {
        Some((lo, hi)) => ByteClass::range(single(lo)?, single(hi)?),
        None => ByteClass::single(single(body)?),
    };
    Ok(if inverted { class.inverted() } else { class })
}

/// A run of non-gap tokens preceded by a gap window.
///
/// Rules are compiled into segments once; the first segment's window also
/// carries the rule's anchor offsets.
#[derive(Debug, Clone)]
pub(crate) struct Segment {
    pub(crate) gap_min: usize,
    pub(crate) gap_max: Option<usize>,
    fragment: Vec<ByteToken>,
    finder: Option<Finder<'static>>,
}

impl Segment {
    fn new(gap_min: usize, gap_max: Option<usize>, fragment: Vec<ByteToken>) -> Self {
        let literal: Option<Vec<u8>> = fragment
            .iter()
            .map(|token| match token {
                ByteToken::Byte(b) => Some(*b),
                _ => None,
            })
            .collect();
        let finder = literal
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| Finder::new(&bytes).into_owned());

        Self {
            gap_min,
            gap_max,
            fragment,
            finder,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.fragment.len()
    }

    /// First position in `from..=last` where the fragment matches.
    /// The caller guarantees `last + self.len() <= window.len()`.
    pub(crate) fn next_candidate(&self, window: &[u8], from: usize, last: usize) -> Option<usize> {
        if from > last {
            return None;
        }
        let len = self.len();
        match &self.finder {
            Some(finder) => finder
                .find(&window[from..last + len])
                .map(|index| from + index),
            None => (from..=last).find(|&start| {
                self.fragment
                    .iter()
                    .zip(&window[start..start + len])
                    .all(|(token, byte)| token.accepts(*byte))
            }),
        }
    }
}

fn compile<'a>(
    tokens: impl Iterator<Item = &'a ByteToken>,
    min_offset: usize,
    max_offset: Option<usize>,
) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut gap_min = min_offset;
    let mut gap_max = max_offset;
    let mut fragment = Vec::new();

    for token in tokens {
        match *token {
            ByteToken::Gap { min, max } => {
                if !fragment.is_empty() {
                    segments.push(Segment::new(gap_min, gap_max, std::mem::take(&mut fragment)));
                    gap_min = 0;
                    gap_max = Some(0);
                }
                gap_min = gap_min.saturating_add(min);
                gap_max = match (gap_max, max) {
                    (Some(a), Some(b)) => Some(a.saturating_add(b)),
                    _ => None,
                };
            }
            other => fragment.push(other),
        }
    }
    segments.push(Segment::new(gap_min, gap_max, fragment));
    segments
}

/// An anchored pattern that must match inside one container entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RuleDefinition", into = "RuleDefinition")]
pub struct ByteSequenceRule {
    anchor: Anchor,
    min_offset: usize,
    max_offset: Option<usize>,
    pattern: BytePattern,
    program: Vec<Segment>,
}

impl ByteSequenceRule {
    /// Builds a rule. `max_offset: None` leaves the window unbounded.
    pub fn new(
        anchor: Anchor,
        min_offset: usize,
        max_offset: Option<usize>,
        pattern: BytePattern,
    ) -> Result<Self, PatternError> {
        if let Some(max) = max_offset.filter(|&max| max < min_offset) {
            return Err(PatternError::new(
                0,
                format!("minimum offset {min_offset} exceeds maximum offset {max}"),
            ));
        }

        // EOF rules run over the reversed entry, so they compile reversed
        let program = match anchor {
            Anchor::EndOfEntry => compile(pattern.tokens().iter().rev(), min_offset, max_offset),
            Anchor::BeginningOfEntry | Anchor::Variable => {
                compile(pattern.tokens().iter(), min_offset, max_offset)
            }
        };

        Ok(Self {
            anchor,
            min_offset,
            max_offset,
            pattern,
            program,
        })
    }

    /// Pattern that must start at the very first byte
    pub fn at_start(pattern: &str) -> Result<Self, PatternError> {
        Self::new(Anchor::BeginningOfEntry, 0, Some(0), pattern.parse()?)
    }

    /// Pattern that must end at the very last byte
    pub fn at_end(pattern: &str) -> Result<Self, PatternError> {
        Self::new(Anchor::EndOfEntry, 0, Some(0), pattern.parse()?)
    }

    /// Pattern that may occur anywhere in the entry
    pub fn anywhere(pattern: &str) -> Result<Self, PatternError> {
        Self::new(Anchor::Variable, 0, None, pattern.parse()?)
    }

    pub fn anchor(&self) -> Anchor {
        self.anchor
    }

    pub fn min_offset(&self) -> usize {
        self.min_offset
    }

    pub fn max_offset(&self) -> Option<usize> {
        self.max_offset
    }

    pub fn pattern(&self) -> &BytePattern {
        &self.pattern
    }

    /// The fewest entry bytes this rule can possibly match against
    pub fn min_entry_len(&self) -> usize {
        self.min_offset.saturating_add(self.pattern.min_len())
    }

    pub(crate) fn program(&self) -> &[Segment] {
        &self.program
    }
}

impl PartialEq for ByteSequenceRule {
    fn eq(&self, other: &Self) -> bool {
        self.anchor == other.anchor
            && self.min_offset == other.min_offset
            && self.max_offset == other.max_offset
            && self.pattern == other.pattern
    }
}

impl Eq for ByteSequenceRule {}

impl fmt::Display for ByteSequenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max_offset {
            Some(max) if max == self.min_offset => write!(f, "{}@{}", self.anchor, self.min_offset)?,
            Some(max) => write!(f, "{}@{}-{}", self.anchor, self.min_offset, max)?,
            None => write!(f, "{}@{}-*", self.anchor, self.min_offset)?,
        }
        write!(f, " {}", self.pattern)
    }
}

/// Serialized form of a rule.
///
/// A missing `max_offset` means "exactly `min_offset`" for anchored rules
/// and "unbounded" for variable ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RuleDefinition {
    #[serde(default)]
    anchor: Anchor,
    #[serde(default)]
    min_offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_offset: Option<usize>,
    pattern: String,
}

impl TryFrom<RuleDefinition> for ByteSequenceRule {
    type Error = PatternError;

    fn try_from(def: RuleDefinition) -> Result<Self, Self::Error> {
        let max_offset = match (def.anchor, def.max_offset) {
            (_, Some(max)) => Some(max),
            (Anchor::Variable, None) => None,
            (_, None) => Some(def.min_offset),
        };
        ByteSequenceRule::new(def.anchor, def.min_offset, max_offset, def.pattern.parse()?)
    }
}

impl From<ByteSequenceRule> for RuleDefinition {
    fn from(rule: ByteSequenceRule) -> Self {
        let unbounded = ByteToken::gap(0, None);
        let tokens = rule.pattern.tokens().iter().copied();

        // An open anchored window is the same as a leading (or, for EOF,
        // trailing) unbounded gap
        let (max_offset, pattern) = match (rule.anchor, rule.max_offset) {
            (Anchor::BeginningOfEntry, None) => (
                Some(rule.min_offset),
                BytePattern::from_tokens(std::iter::once(unbounded).chain(tokens)),
            ),
            (Anchor::EndOfEntry, None) => (
                Some(rule.min_offset),
                BytePattern::from_tokens(tokens.chain(std::iter::once(unbounded))),
            ),
            (_, max) => (max, Ok(rule.pattern.clone())),
        };

        RuleDefinition {
            anchor: rule.anchor,
            min_offset: rule.min_offset,
            max_offset,
            pattern: pattern.unwrap_or(rule.pattern).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal_and_wildcards() {
        let pattern: BytePattern = "50 4B ?? [00:1F] {2-4} [!FF] *".parse().unwrap();
        assert_eq!(
            pattern.tokens(),
            &[
                ByteToken::Byte(0x50),
                ByteToken::Byte(0x4B),
                ByteToken::Any,
                ByteToken::Class(ByteClass::range(0x00, 0x1F)),
                ByteToken::gap(2, Some(4)),
                ByteToken::Class(ByteClass::single(0xFF).inverted()),
                ByteToken::gap(0, None),
            ]
        );
    }

    #[test]
    fn test_parse_quoted_text() {
        let pattern: BytePattern = "'PK' 0304".parse().unwrap();
        assert_eq!(pattern, BytePattern::literal(b"PK\x03\x04"));
    }

    #[test]
    fn test_adjacent_gaps_are_merged() {
        let pattern: BytePattern = "AA {1-2}{3} BB {2}* CC {0}".parse().unwrap();
        assert_eq!(
            pattern.tokens(),
            &[
                ByteToken::Byte(0xAA),
                ByteToken::gap(4, Some(5)),
                ByteToken::Byte(0xBB),
                ByteToken::gap(2, None),
                ByteToken::Byte(0xCC),
            ]
        );
    }

    #[test]
    fn test_display_round_trips() {
        for text in ["504B0304", "AA{1-3}BB", "[!0A]??{4-*}CC", "*[20:7E]{7}00"] {
            let pattern: BytePattern = text.parse().unwrap();
            assert_eq!(pattern.to_string(), text);
            assert_eq!(pattern.to_string().parse::<BytePattern>().unwrap(), pattern);
        }
    }

    #[test]
    fn test_parse_errors_report_position() {
        assert_eq!("50 4".parse::<BytePattern>().unwrap_err().position, 3);
        assert_eq!("AA ?".parse::<BytePattern>().unwrap_err().position, 3);
        assert_eq!("AA {3".parse::<BytePattern>().unwrap_err().position, 3);
        assert!("{5-2}".parse::<BytePattern>().is_err());
        assert!("[GG]".parse::<BytePattern>().is_err());
        assert!("''".parse::<BytePattern>().is_err());
        assert!("ZZ".parse::<BytePattern>().is_err());
    }

    #[test]
    fn test_min_len() {
        let pattern: BytePattern = "AA {2-5} BB ?? *".parse().unwrap();
        assert_eq!(pattern.min_len(), 5);
    }

    #[test]
    fn test_rule_rejects_inverted_offsets() {
        let pattern = BytePattern::literal(b"x");
        assert!(ByteSequenceRule::new(Anchor::BeginningOfEntry, 4, Some(2), pattern).is_err());
    }

    #[test]
    fn test_rule_from_json_defaults() {
        let rule: ByteSequenceRule =
            serde_json::from_str(r#"{"anchor":"beginning_of_entry","min_offset":2,"pattern":"AABB"}"#)
                .unwrap();
        assert_eq!(rule.max_offset(), Some(2));

        let rule: ByteSequenceRule =
            serde_json::from_str(r#"{"anchor":"variable","pattern":"AABB"}"#).unwrap();
        assert_eq!(rule.max_offset(), None);

        assert!(serde_json::from_str::<ByteSequenceRule>(r#"{"pattern":"AA{"}"#).is_err());
    }

    #[test]
    fn test_open_anchored_window_survives_serialization() {
        let rule =
            ByteSequenceRule::new(Anchor::BeginningOfEntry, 3, None, "AABB".parse().unwrap())
                .unwrap();
        let json = serde_json::to_string(&rule).unwrap();
        let back: ByteSequenceRule = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pattern().to_string(), "*AABB");
        assert_eq!(back.min_offset(), 3);
        assert_eq!(back.max_offset(), Some(3));
    }

    #[test]
    fn test_eof_program_is_reversed() {
        let rule = ByteSequenceRule::at_end("AA BB {2} CC").unwrap();
        let program = rule.program();
        assert_eq!(program.len(), 2);
        assert_eq!(program[0].len(), 1);
        assert_eq!(program[1].gap_min, 2);
        assert_eq!(program[1].len(), 2);
    }
}
