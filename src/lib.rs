//! Container signature identification
//!
//! Identifies file formats that are packaged as ZIP archives or OLE2
//! compound files (OOXML, ODF, EPUB, legacy Office and so on) by looking
//! inside the container: which named entries exist and what bytes they
//! hold. Matching signatures are mapped to format identifiers (PUIDs).
//!
//! The crate is layered:
//! - [`domain`]: signatures, byte-sequence rules, the matcher and catalog
//! - [`infrastructure`]: ZIP and OLE2 entry readers, scratch spooling
//! - [`application`]: [`ContainerContentIdentifier`] and its options

pub mod application;
pub mod domain;
mod error;
pub mod infrastructure;
pub mod presentation;

pub use application::ContainerContentIdentifier;
pub use application::dto::IdentifierOptions;
pub use domain::entities::{
    Anchor, BytePattern, ByteSequenceRule, ContainerFile, ContainerKind, ContainerSignature,
    ContainerSignatureDefinitions, FileFormatMapping, IdentificationMethod, IdentificationResult,
    IdentificationResultCollection, RequestMetaData, TriggerPuid,
};
pub use domain::services::{ScanBudget, SignatureCatalog};
pub use error::{
    ConstructionError, ContainerError, IdentificationError, PatternError, Result,
};
