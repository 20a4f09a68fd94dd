//! Identify container use case
//!
//! Turns one raw input stream into container-based identification results:
//! buffer the input, read the entries the catalog needs, evaluate every
//! signature, and map matches to format identifiers.

use crate::application::dto::IdentifierOptions;
use crate::domain::entities::{
    ContainerKind, ContainerSignatureDefinitions, IdentificationResult,
    IdentificationResultCollection, RequestMetaData,
};
use crate::domain::repositories::ContainerEntryReader;
use crate::domain::services::{MatchCollection, SignatureCatalog};
use crate::error::{ConstructionError, ContainerError, Result};
use crate::infrastructure::containers;
use crate::infrastructure::scratch::{IdentificationRequest, ScratchArea};
use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

/// Container content identifier
///
/// Bound to one container kind and one signature catalog at construction.
/// Immutable afterwards, so a single instance can serve `process` calls
/// from many threads.
#[derive(Debug)]
pub struct ContainerContentIdentifier {
    catalog: Arc<SignatureCatalog>,
    reader: Box<dyn ContainerEntryReader>,
    scratch: ScratchArea,
    options: IdentifierOptions,
}

impl ContainerContentIdentifier {
    /// Builds the catalog for `kind` from `defs`
    pub fn new(
        kind: ContainerKind,
        defs: &ContainerSignatureDefinitions,
        options: IdentifierOptions,
    ) -> std::result::Result<Self, ConstructionError> {
        let catalog = SignatureCatalog::build(defs, kind)?;
        Self::with_catalog(Arc::new(catalog), options)
    }

    /// Same as [`new`](Self::new) with the kind given by name ("ZIP", "OLE2")
    pub fn from_kind_name(
        kind: &str,
        defs: &ContainerSignatureDefinitions,
        options: IdentifierOptions,
    ) -> std::result::Result<Self, ConstructionError> {
        Self::new(kind.parse()?, defs, options)
    }

    /// Shares an already built catalog
    pub fn with_catalog(
        catalog: Arc<SignatureCatalog>,
        options: IdentifierOptions,
    ) -> std::result::Result<Self, ConstructionError> {
        let scratch = ScratchArea::new(options.scratch_dir.clone(), options.memory_threshold)?;
        let reader = containers::reader_for(catalog.kind(), options.verify_crc);

        tracing::info!(
            kind = %catalog.kind(),
            signatures = catalog.len(),
            entries = catalog.unique_entries().len(),
            scratch_dir = %scratch.dir().display(),
            "container identifier ready"
        );

        Ok(Self {
            catalog,
            reader,
            scratch,
            options,
        })
    }

    pub fn kind(&self) -> ContainerKind {
        self.catalog.kind()
    }

    pub fn catalog(&self) -> &Arc<SignatureCatalog> {
        &self.catalog
    }

    pub fn options(&self) -> &IdentifierOptions {
        &self.options
    }

    /// Identifies the container in `input`, appending one result per newly
    /// matched format identifier. Returns the number of results appended.
    pub fn process<R: Read>(
        &self,
        input: R,
        results: &mut IdentificationResultCollection,
    ) -> Result<usize> {
        self.process_with_metadata(input, RequestMetaData::default(), results)
    }

    /// Like [`process`](Self::process), attaching `metadata` to every result
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(kind = %self.catalog.kind(), source = metadata.source.as_deref().unwrap_or("-"))
    )]
    pub fn process_with_metadata<R: Read>(
        &self,
        input: R,
        metadata: RequestMetaData,
        results: &mut IdentificationResultCollection,
    ) -> Result<usize> {
        let request = IdentificationRequest::open(input, metadata, &self.scratch)?;
        let outcome = self.identify(&request, results);

        if let Err(e) = request.close() {
            tracing::warn!(error = %e, "failed to remove spool file");
        }

        Ok(outcome?)
    }

    fn identify(
        &self,
        request: &IdentificationRequest,
        results: &mut IdentificationResultCollection,
    ) -> std::result::Result<usize, ContainerError> {
        let matches = MatchCollection::from_catalog(&self.catalog, self.options.scan_budget)
            .with_parallelism(self.options.parallel)
            .evaluate(self.reader.as_ref(), request.bytes())?;

        let mut emitted: HashSet<&str> = HashSet::new();
        let mut matched = 0usize;
        let mut appended = 0usize;

        for signature in matches.iter().filter(|m| m.is_match()).map(|m| m.signature()) {
            matched += 1;
            let Some(puids) = self.catalog.puids_for(signature.id) else {
                tracing::debug!(signature = signature.id, "matched signature has no format mapping");
                continue;
            };

            for puid in puids {
                if emitted.insert(puid.as_str()) {
                    results.add_result(IdentificationResult::container(
                        puid.clone(),
                        request.metadata().clone(),
                    ));
                    appended += 1;
                }
            }
        }

        tracing::debug!(bytes = request.len(), matched, appended, "identified container");
        Ok(appended)
    }
}
