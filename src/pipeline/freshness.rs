//! Freshness sidecars.
//!
//! One JSON file per generated artifact records the source content hash the
//! artifact was generated from. A job whose current hash matches is skipped
//! at zero cost.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Suffix appended to the artifact path to form the sidecar path.
pub const SIDECAR_SUFFIX: &str = ".freshness.json";

/// SHA-256 hex digest of content.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Sidecar record persisted beside a generated artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessRecord {
    /// Hash of the source content the artifact was generated from.
    pub content_hash: String,
    /// When generation happened.
    pub generated_at: DateTime<Utc>,
    /// Model used.
    pub model: String,
    /// Optional per-symbol source hashes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub symbol_hashes: BTreeMap<String, String>,
}

impl FreshnessRecord {
    /// Record for a source hash generated now.
    pub fn new(content_hash: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content_hash: content_hash.into(),
            generated_at: Utc::now(),
            model: model.into(),
            symbol_hashes: BTreeMap::new(),
        }
    }

    /// Attach per-symbol hashes.
    pub fn with_symbol_hashes(mut self, hashes: BTreeMap<String, String>) -> Self {
        self.symbol_hashes = hashes;
        self
    }

    /// Whether the artifact is up to date for the given source hash.
    pub fn is_fresh(&self, current_hash: &str) -> bool {
        self.content_hash == current_hash
    }

    /// Load the sidecar for an artifact. Missing or malformed sidecars are
    /// absent (the artifact regenerates), never fatal.
    pub fn load(artifact_path: &Path) -> Option<Self> {
        let raw = fs::read_to_string(sidecar_path(artifact_path)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(
                    artifact = %artifact_path.display(),
                    error = %err,
                    "freshness sidecar malformed, regenerating"
                );
                None
            }
        }
    }

    /// Persist the sidecar beside an artifact (write-then-rename).
    pub fn store(&self, artifact_path: &Path) -> io::Result<()> {
        let sidecar = sidecar_path(artifact_path);
        let temp = sidecar.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let mut file = fs::File::create(&temp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp, &sidecar)?;
        Ok(())
    }
}

/// Sidecar path for an artifact.
pub fn sidecar_path(artifact_path: &Path) -> PathBuf {
    let mut name = artifact_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(SIDECAR_SUFFIX);
    artifact_path.with_file_name(name)
}
