//! Match collection
//!
//! Evaluates every signature of a catalog against the entries of one
//! container. Signatures are independent of each other, so the order of
//! evaluation never changes the outcome; the returned matches always follow
//! the catalog order.

use super::signature_catalog::SignatureCatalog;
use super::signature_matcher::{self, ScanBudget};
use crate::domain::entities::{
    ContainerFile, ContainerSignature, ContainerSignatureMatch, UniqueFileEntries,
};
use crate::domain::repositories::{ContainerEntries, ContainerEntryReader};
use crate::error::ContainerError;
use rayon::prelude::*;

#[derive(Debug, Clone, Copy)]
pub struct MatchCollection<'a> {
    signatures: &'a [ContainerSignature],
    unique_entries: &'a UniqueFileEntries,
    scan_budget: ScanBudget,
    parallel: bool,
}

impl<'a> MatchCollection<'a> {
    pub fn new(
        signatures: &'a [ContainerSignature],
        unique_entries: &'a UniqueFileEntries,
        scan_budget: ScanBudget,
    ) -> Self {
        Self {
            signatures,
            unique_entries,
            scan_budget,
            parallel: false,
        }
    }

    pub fn from_catalog(catalog: &'a SignatureCatalog, scan_budget: ScanBudget) -> Self {
        Self::new(catalog.signatures(), catalog.unique_entries(), scan_budget)
    }

    /// Spreads signature evaluation over the rayon pool
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Reads the needed entries of `container` through `reader` and
    /// evaluates every signature against them.
    pub fn evaluate(
        &self,
        reader: &dyn ContainerEntryReader,
        container: &[u8],
    ) -> Result<Vec<ContainerSignatureMatch<'a>>, ContainerError> {
        let entries = reader.read_entries_within(container, self.unique_entries, self.scan_budget)?;
        tracing::debug!(
            wanted = self.unique_entries.len(),
            found = entries.len(),
            "read container entries"
        );

        Ok(if self.parallel {
            self.evaluate_entries_parallel(&entries)
        } else {
            self.evaluate_entries(&entries)
        })
    }

    pub fn evaluate_entries(&self, entries: &ContainerEntries<'_>) -> Vec<ContainerSignatureMatch<'a>> {
        self.signatures
            .iter()
            .map(|sig| self.evaluate_signature(sig, entries))
            .collect()
    }

    /// Same result as [`evaluate_entries`](Self::evaluate_entries), with one
    /// rayon task per signature.
    pub fn evaluate_entries_parallel(
        &self,
        entries: &ContainerEntries<'_>,
    ) -> Vec<ContainerSignatureMatch<'a>> {
        self.signatures
            .par_iter()
            .map(|sig| self.evaluate_signature(sig, entries))
            .collect()
    }

    fn evaluate_signature(
        &self,
        signature: &'a ContainerSignature,
        entries: &ContainerEntries<'_>,
    ) -> ContainerSignatureMatch<'a> {
        let matched = !signature.files.is_empty()
            && signature
                .files
                .iter()
                .all(|file| self.requirement_satisfied(file, entries));

        tracing::trace!(signature = signature.id, matched, "evaluated signature");
        ContainerSignatureMatch::new(signature, matched)
    }

    fn requirement_satisfied(&self, file: &ContainerFile, entries: &ContainerEntries<'_>) -> bool {
        let Some(entry) = entries.get(&file.path) else {
            return false;
        };

        file.rules
            .iter()
            .all(|rule| signature_matcher::matches(entry.as_bytes(), rule, self.scan_budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{ByteSequenceRule, ContainerKind};
    use crate::domain::repositories::EntryView;

    fn signature(id: u32, files: Vec<ContainerFile>) -> ContainerSignature {
        ContainerSignature::new(id, ContainerKind::Zip, files)
    }

    fn entries() -> ContainerEntries<'static> {
        let mut entries = ContainerEntries::new();
        entries.insert("mimetype", EntryView::borrowed(b"application/epub+zip"));
        entries.insert("content.xml", EntryView::borrowed(b"<?xml?><office:document/>"));
        entries
    }

    #[test]
    fn test_all_requirements_must_hold() {
        let signatures = vec![
            signature(
                1,
                vec![
                    ContainerFile::new("mimetype", vec![ByteSequenceRule::at_start("'application/'").unwrap()]),
                    ContainerFile::present("content.xml"),
                ],
            ),
            signature(
                2,
                vec![
                    ContainerFile::present("mimetype"),
                    ContainerFile::present("META-INF/manifest.xml"),
                ],
            ),
        ];
        let unique = UniqueFileEntries::from_signatures(&signatures);
        let collection = MatchCollection::new(&signatures, &unique, ScanBudget::Unbounded);

        let outcome: Vec<bool> = collection
            .evaluate_entries(&entries())
            .iter()
            .map(|m| m.is_match())
            .collect();
        assert_eq!(outcome, vec![true, false]);
    }

    #[test]
    fn test_all_rules_of_a_requirement_must_hold() {
        let signatures = vec![signature(
            1,
            vec![ContainerFile::new(
                "content.xml",
                vec![
                    ByteSequenceRule::at_start("'<?xml'").unwrap(),
                    ByteSequenceRule::anywhere("'office:document'").unwrap(),
                    ByteSequenceRule::at_end("'/>'").unwrap(),
                    ByteSequenceRule::anywhere("'spreadsheet'").unwrap(),
                ],
            )],
        )];
        let unique = UniqueFileEntries::from_signatures(&signatures);
        let matches = MatchCollection::new(&signatures, &unique, ScanBudget::Unbounded)
            .evaluate_entries(&entries());
        assert!(!matches[0].is_match());
    }

    #[test]
    fn test_rules_are_independent_of_their_order() {
        let signatures = vec![signature(
            1,
            vec![ContainerFile::new(
                "content.xml",
                vec![
                    ByteSequenceRule::anywhere("'office:document'").unwrap(),
                    ByteSequenceRule::anywhere("'<?xml'").unwrap(),
                ],
            )],
        )];
        let unique = UniqueFileEntries::from_signatures(&signatures);
        let matches = MatchCollection::new(&signatures, &unique, ScanBudget::Unbounded)
            .evaluate_entries(&entries());
        assert!(matches[0].is_match());
    }

    #[test]
    fn test_signature_without_files_never_matches() {
        let signatures = vec![signature(1, Vec::new())];
        let unique = UniqueFileEntries::default();
        let matches = MatchCollection::new(&signatures, &unique, ScanBudget::Unbounded)
            .evaluate_entries(&entries());
        assert!(!matches[0].is_match());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let signatures: Vec<ContainerSignature> = (0..64)
            .map(|id| {
                let path = if id % 3 == 0 { "mimetype" } else { "missing" };
                signature(id, vec![ContainerFile::present(path)])
            })
            .collect();
        let unique = UniqueFileEntries::from_signatures(&signatures);
        let collection = MatchCollection::new(&signatures, &unique, ScanBudget::Unbounded);
        let entries = entries();

        let sequential: Vec<(u32, bool)> = collection
            .evaluate_entries(&entries)
            .iter()
            .map(|m| (m.signature().id, m.is_match()))
            .collect();
        let parallel: Vec<(u32, bool)> = collection
            .evaluate_entries_parallel(&entries)
            .iter()
            .map(|m| (m.signature().id, m.is_match()))
            .collect();
        assert_eq!(sequential, parallel);
    }
}
