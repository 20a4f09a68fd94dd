//! Identification requests metadata, signature outcomes and results

use super::container_signature::ContainerSignature;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// How a format identifier was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationMethod {
    Extension,
    BinarySignature,
    TextSignature,
    Container,
}

impl fmt::Display for IdentificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IdentificationMethod::Extension => "extension",
            IdentificationMethod::BinarySignature => "binary signature",
            IdentificationMethod::TextSignature => "text signature",
            IdentificationMethod::Container => "container",
        };
        f.write_str(name)
    }
}

/// Descriptive data about the content being identified, carried into results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetaData {
    pub name: Option<String>,
    pub size: Option<u64>,
    /// Locator of the original content (a path or URI)
    pub source: Option<String>,
}

impl RequestMetaData {
    /// Metadata naming a file on disk
    pub fn for_path(path: &Path) -> Self {
        Self {
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            size: None,
            source: Some(path.display().to_string()),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// The outcome of one signature for one identification run
#[derive(Debug, Clone, Copy)]
pub struct ContainerSignatureMatch<'a> {
    signature: &'a ContainerSignature,
    matched: bool,
}

impl<'a> ContainerSignatureMatch<'a> {
    pub fn new(signature: &'a ContainerSignature, matched: bool) -> Self {
        Self { signature, matched }
    }

    pub fn signature(&self) -> &'a ContainerSignature {
        self.signature
    }

    pub fn is_match(&self) -> bool {
        self.matched
    }
}

/// A single identified format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationResult {
    pub method: IdentificationMethod,
    pub puid: String,
    pub metadata: RequestMetaData,
}

impl IdentificationResult {
    pub fn container(puid: impl Into<String>, metadata: RequestMetaData) -> Self {
        Self {
            method: IdentificationMethod::Container,
            puid: puid.into(),
            metadata,
        }
    }
}

/// Ordered accumulator of results.
///
/// Callers pass one collection through several identification methods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationResultCollection {
    results: Vec<IdentificationResult>,
}

impl IdentificationResultCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_result(&mut self, result: IdentificationResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[IdentificationResult] {
        &self.results
    }

    pub fn iter(&self) -> impl Iterator<Item = &IdentificationResult> {
        self.results.iter()
    }

    pub fn puids(&self) -> impl Iterator<Item = &str> {
        self.results.iter().map(|r| r.puid.as_str())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn into_vec(self) -> Vec<IdentificationResult> {
        self.results
    }
}

impl<'a> IntoIterator for &'a IdentificationResultCollection {
    type Item = &'a IdentificationResult;
    type IntoIter = std::slice::Iter<'a, IdentificationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_metadata_for_path() {
        let path = PathBuf::from("/data/books/novel.epub");
        let meta = RequestMetaData::for_path(&path).with_size(42);
        assert_eq!(meta.name.as_deref(), Some("novel.epub"));
        assert_eq!(meta.size, Some(42));
        assert_eq!(meta.source.as_deref(), Some("/data/books/novel.epub"));
    }

    #[test]
    fn test_collection_keeps_insertion_order() {
        let mut results = IdentificationResultCollection::new();
        results.add_result(IdentificationResult::container("fmt/2", RequestMetaData::default()));
        results.add_result(IdentificationResult::container("fmt/1", RequestMetaData::default()));
        assert_eq!(results.puids().collect::<Vec<_>>(), vec!["fmt/2", "fmt/1"]);
        assert!(results.iter().all(|r| r.method == IdentificationMethod::Container));
    }

    #[test]
    fn test_result_serializes_method_tag() {
        let result = IdentificationResult::container("fmt/1040", RequestMetaData::default());
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["method"], "container");
        assert_eq!(json["puid"], "fmt/1040");
    }
}
