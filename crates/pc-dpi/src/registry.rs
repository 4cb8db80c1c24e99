//! Application registry with hot-swapping
//!
//! Signatures are kept in insertion order; the first matching signature
//! wins, so order is observable. Readers take a lock-free snapshot.
//! Writers are serialized and publish a rebuilt vector.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use pc_common::{PcResult, MAX_FEATURE_LINE_LEN, MIN_FEATURE_LINE_LEN};
use std::path::Path;
use std::sync::Arc;

use crate::parser::parse_line;
use crate::signature::AppSignature;

/// Outcome of loading a feature list
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Signatures added
    pub loaded: usize,
    /// Lines rejected (bad length or no valid feature)
    pub skipped: usize,
}

/// Insertion-ordered application signatures
pub struct AppRegistry {
    apps: ArcSwap<Vec<AppSignature>>,
    /// Serializes writers
    write: Mutex<()>,
}

impl AppRegistry {
    /// Create empty registry
    pub fn new() -> Self {
        Self::with_apps(Vec::new())
    }

    /// Create with initial signatures
    pub fn with_apps(apps: Vec<AppSignature>) -> Self {
        Self {
            apps: ArcSwap::from_pointee(apps),
            write: Mutex::new(()),
        }
    }

    /// Current signatures
    #[inline(always)]
    pub fn snapshot(&self) -> Arc<Vec<AppSignature>> {
        self.apps.load_full()
    }

    pub fn len(&self) -> usize {
        self.apps.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.load().is_empty()
    }

    /// Append one signature
    pub fn insert(&self, sig: AppSignature) -> PcResult<()> {
        self.extend(vec![sig])
    }

    /// Append signatures, keeping their order. On allocation failure the
    /// registry is left unchanged.
    pub fn extend(&self, sigs: Vec<AppSignature>) -> PcResult<()> {
        if sigs.is_empty() {
            return Ok(());
        }
        let _guard = self.write.lock();
        let current = self.apps.load();
        let mut next = Vec::new();
        next.try_reserve_exact(current.len() + sigs.len())?;
        next.extend(current.iter().cloned());
        next.extend(sigs);
        self.apps.store(Arc::new(next));
        Ok(())
    }

    /// Remove every signature
    pub fn clear(&self) {
        let _guard = self.write.lock();
        self.apps.store(Arc::new(Vec::new()));
    }

    /// Parse a feature list and append its signatures.
    ///
    /// Blank lines and lines starting with `#` are ignored. Lines shorter than
    /// `MIN_FEATURE_LINE_LEN` or longer than `MAX_FEATURE_LINE_LEN` bytes,
    /// and lines without a valid feature, are skipped.
    pub fn load_str(&self, content: &str) -> PcResult<LoadReport> {
        let mut report = LoadReport::default();
        let mut sigs = Vec::new();

        for (index, line) in content.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if line.len() < MIN_FEATURE_LINE_LEN || line.len() > MAX_FEATURE_LINE_LEN {
                tracing::warn!(line = index + 1, len = line.len(), "Skipping feature line with bad length");
                report.skipped += 1;
                continue;
            }
            match parse_line(line) {
                Ok(parsed) => sigs.extend(parsed),
                Err(e) => {
                    tracing::warn!(line = index + 1, error = %e, "Skipping feature line");
                    report.skipped += 1;
                }
            }
        }

        report.loaded = sigs.len();
        self.extend(sigs)?;
        Ok(report)
    }

    /// Load a feature-list file
    pub fn load_file(&self, path: impl AsRef<Path>) -> PcResult<LoadReport> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let report = self.load_str(&content)?;
        tracing::info!(
            path = %path.as_ref().display(),
            loaded = report.loaded,
            skipped = report.skipped,
            "Loaded app features"
        );
        Ok(report)
    }
}

impl Default for AppRegistry {
    fn default() -> Self {
        Self::new()
    }
}
