use crate::metrics::Metrics;
use crate::run::{Channel, RunId, RunRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Model,
    Report,
    Image,
    Metrics,
    Predictions,
}

/// Raw labels and predictions the metrics were computed from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub labels: Vec<f64>,
    pub predicted: Vec<f64>,
}

/// Everything a successful run produces, before it is written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactSet {
    /// Model blob; only training runs save one.
    pub model: Option<Vec<u8>>,
    pub report: String,
    /// Image file name (e.g. `confusion_matrix.svg`) to bytes.
    pub images: BTreeMap<String, Vec<u8>>,
    pub metrics: Metrics,
    pub predictions: Predictions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub kind: ArtifactKind,
    /// File name inside the run directory.
    pub name: String,
    pub sha256: String,
    pub bytes: u64,
}

impl ArtifactEntry {
    #[must_use]
    pub fn new(kind: ArtifactKind, name: impl Into<String>, contents: &[u8]) -> Self {
        Self { kind, name: name.into(), sha256: sha256_bytes(contents), bytes: contents.len() as u64 }
    }
}

/// Written last into a run directory; its presence marks the artifact set complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub run_id: RunId,
    pub channel: Channel,
    pub completed_at: DateTime<Utc>,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ArtifactManifest {
    pub fn images(&self) -> impl Iterator<Item = &ArtifactEntry> {
        self.artifacts.iter().filter(|a| a.kind == ArtifactKind::Image)
    }

    #[must_use]
    pub fn find(&self, kind: ArtifactKind) -> Option<&ArtifactEntry> {
        self.artifacts.iter().find(|a| a.kind == kind)
    }
}

/// Latest pointer record (`channels/<channel>-latest.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub run_id: RunId,
    pub published_at: DateTime<Utc>,
}

/// A published artifact set as seen through a latest pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedResult {
    pub run: RunRecord,
    pub published_at: DateTime<Utc>,
    pub report: String,
    /// Image file names, fetchable by name.
    pub images: Vec<String>,
    pub metrics: Metrics,
    pub manifest: ArtifactManifest,
}

#[must_use]
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_hashes_contents() {
        let entry = ArtifactEntry::new(ArtifactKind::Report, "evaluation_report.txt", b"abc");
        assert_eq!(entry.sha256, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert_eq!(entry.bytes, 3);
    }

    #[test]
    fn test_manifest_lookup() {
        let manifest = ArtifactManifest {
            run_id: RunId("run_1".to_string()),
            channel: Channel::Training,
            completed_at: Utc::now(),
            artifacts: vec![
                ArtifactEntry::new(ArtifactKind::Model, "model_run_1.json", b"{}"),
                ArtifactEntry::new(ArtifactKind::Image, "a.svg", b"<svg/>"),
                ArtifactEntry::new(ArtifactKind::Image, "b.svg", b"<svg/>"),
            ],
        };
        assert_eq!(manifest.images().count(), 2);
        assert_eq!(manifest.find(ArtifactKind::Model).unwrap().name, "model_run_1.json");
        assert!(manifest.find(ArtifactKind::Report).is_none());
    }
}
