//! Container signature entities
//!
//! A container signature names the internal entries a container must hold
//! and the byte-sequence rules each of those entries must satisfy.

use super::byte_sequence::{Anchor, ByteSequenceRule};
use super::container_kind::ContainerKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One required internal entry of a container signature.
///
/// A requirement with no rules is satisfied by the entry being present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerFile {
    pub path: String,
    #[serde(default)]
    pub rules: Vec<ByteSequenceRule>,
}

impl ContainerFile {
    pub fn new(path: impl Into<String>, rules: Vec<ByteSequenceRule>) -> Self {
        Self {
            path: path.into(),
            rules,
        }
    }

    /// Requirement satisfied by the entry merely existing
    pub fn present(path: impl Into<String>) -> Self {
        Self::new(path, Vec::new())
    }
}

/// A signature over the internal structure of one container kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSignature {
    pub id: u32,
    #[serde(default)]
    pub description: String,
    pub container_kind: ContainerKind,
    pub files: Vec<ContainerFile>,
}

impl ContainerSignature {
    pub fn new(id: u32, container_kind: ContainerKind, files: Vec<ContainerFile>) -> Self {
        Self {
            id,
            description: String::new(),
            container_kind,
            files,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Paths of every entry this signature inspects
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|file| file.path.as_str())
    }
}

/// Associates a container signature with an output format identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileFormatMapping {
    pub signature_id: u32,
    pub puid: String,
}

impl FileFormatMapping {
    pub fn new(signature_id: u32, puid: impl Into<String>) -> Self {
        Self {
            signature_id,
            puid: puid.into(),
        }
    }
}

/// The format identifier of a container kind itself, used by the outer
/// pipeline to decide which container identifier to run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerPuid {
    pub container_kind: ContainerKind,
    pub puid: String,
}

/// Pre-parsed container signature definitions, as supplied by a loader
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSignatureDefinitions {
    #[serde(default)]
    pub container_signatures: Vec<ContainerSignature>,
    #[serde(default)]
    pub format_mappings: Vec<FileFormatMapping>,
    #[serde(default)]
    pub trigger_puids: Vec<TriggerPuid>,
}

impl ContainerSignatureDefinitions {
    pub fn new(
        container_signatures: Vec<ContainerSignature>,
        format_mappings: Vec<FileFormatMapping>,
    ) -> Self {
        Self {
            container_signatures,
            format_mappings,
            trigger_puids: Vec::new(),
        }
    }

    pub fn with_trigger(mut self, container_kind: ContainerKind, puid: impl Into<String>) -> Self {
        self.trigger_puids.push(TriggerPuid {
            container_kind,
            puid: puid.into(),
        });
        self
    }

    /// Container kind to open for content already identified as `puid`
    pub fn kind_for_puid(&self, puid: &str) -> Option<ContainerKind> {
        self.trigger_puids
            .iter()
            .find(|trigger| trigger.puid == puid)
            .map(|trigger| trigger.container_kind)
    }

    pub fn signatures_for(&self, kind: ContainerKind) -> impl Iterator<Item = &ContainerSignature> {
        self.container_signatures
            .iter()
            .filter(move |sig| sig.container_kind == kind)
    }
}

/// Which ends of an entry the rules on its path inspect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryReach {
    /// Beginning-of-entry or variable rules look at the leading bytes
    pub head: bool,
    /// End-of-entry rules look at the trailing bytes
    pub tail: bool,
}

impl EntryReach {
    /// Both ends, for entries whose rules are unknown
    pub const FULL: Self = Self {
        head: true,
        tail: true,
    };

    fn merge(self, other: Self) -> Self {
        Self {
            head: self.head || other.head,
            tail: self.tail || other.tail,
        }
    }
}

impl From<&ContainerFile> for EntryReach {
    fn from(file: &ContainerFile) -> Self {
        file.rules.iter().fold(Self::default(), |reach, rule| {
            let rule_reach = match rule.anchor() {
                Anchor::EndOfEntry => Self {
                    head: false,
                    tail: true,
                },
                Anchor::BeginningOfEntry | Anchor::Variable => Self {
                    head: true,
                    tail: false,
                },
            };
            reach.merge(rule_reach)
        })
    }
}

/// The distinct entry paths referenced by a set of signatures.
///
/// Entry readers only materialize these entries, and only as much of each
/// as [`EntryReach`] says the rules can see.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniqueFileEntries(BTreeMap<String, EntryReach>);

impl UniqueFileEntries {
    pub fn from_signatures<'a>(signatures: impl IntoIterator<Item = &'a ContainerSignature>) -> Self {
        let mut entries = BTreeMap::new();
        for file in signatures.into_iter().flat_map(|sig| sig.files.iter()) {
            let reach = entries.entry(file.path.clone()).or_insert_with(EntryReach::default);
            *reach = reach.merge(EntryReach::from(file));
        }
        Self(entries)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains_key(path)
    }

    /// What the rules on `path` inspect, or `None` when the path is not wanted
    pub fn reach(&self, path: &str) -> Option<EntryReach> {
        self.0.get(path).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for UniqueFileEntries {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(|path| (path.into(), EntryReach::FULL)).collect())
    }
}
