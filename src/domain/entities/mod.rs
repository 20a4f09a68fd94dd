//! Domain entities
//!
//! Signatures, rules, and the records produced by an identification run.

mod byte_sequence;
mod container_kind;
mod container_signature;
mod identification;

pub use byte_sequence::{Anchor, ByteClass, BytePattern, ByteSequenceRule, ByteToken};
pub(crate) use byte_sequence::Segment;
pub use container_kind::ContainerKind;
pub use container_signature::{
    ContainerFile, ContainerSignature, ContainerSignatureDefinitions, EntryReach,
    FileFormatMapping, TriggerPuid, UniqueFileEntries,
};
pub use identification::{
    ContainerSignatureMatch, IdentificationMethod, IdentificationResult,
    IdentificationResultCollection, RequestMetaData,
};
