//! Signature catalog
//!
//! The read-only index for one container kind: its signatures, the unique
//! entry paths they reference, and the format identifiers each signature
//! resolves to. Built once, then shared behind an `Arc`.

use crate::domain::entities::{
    ContainerKind, ContainerSignature, ContainerSignatureDefinitions, UniqueFileEntries,
};
use crate::error::ConstructionError;
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct SignatureCatalog {
    kind: ContainerKind,
    signatures: Vec<ContainerSignature>,
    unique_entries: UniqueFileEntries,
    formats: HashMap<u32, Vec<String>>,
}

impl SignatureCatalog {
    /// Selects the signatures of `kind` from `defs` and indexes them.
    ///
    /// Mappings that point at signatures of another kind (or at no
    /// signature at all) are ignored.
    pub fn build(
        defs: &ContainerSignatureDefinitions,
        kind: ContainerKind,
    ) -> Result<Self, ConstructionError> {
        let signatures: Vec<ContainerSignature> = defs.signatures_for(kind).cloned().collect();

        let mut ids = HashSet::with_capacity(signatures.len());
        for sig in &signatures {
            if !ids.insert(sig.id) {
                return Err(ConstructionError::DuplicateSignature(sig.id));
            }
        }

        let mut formats: HashMap<u32, Vec<String>> = HashMap::new();
        for mapping in defs
            .format_mappings
            .iter()
            .filter(|mapping| ids.contains(&mapping.signature_id))
        {
            formats
                .entry(mapping.signature_id)
                .or_default()
                .push(mapping.puid.clone());
        }

        let unique_entries = UniqueFileEntries::from_signatures(&signatures);

        tracing::debug!(
            kind = %kind,
            signatures = signatures.len(),
            entries = unique_entries.len(),
            mapped = formats.len(),
            "built signature catalog"
        );

        Ok(Self {
            kind,
            signatures,
            unique_entries,
            formats,
        })
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Signatures in definition order
    pub fn signatures(&self) -> &[ContainerSignature] {
        &self.signatures
    }

    pub fn unique_entries(&self) -> &UniqueFileEntries {
        &self.unique_entries
    }

    /// Format identifiers for a signature, or `None` if it has no mapping
    pub fn puids_for(&self, signature_id: u32) -> Option<&[String]> {
        self.formats.get(&signature_id).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}
