//! Video catalog and transcode cache
//!
//! Maps source file names to [`VideoEntry`] values, keeps each entry's
//! variant list in step with the transcoded directory, and produces missing
//! tiers through the [`TranscodePort`].
//!
//! Layout of the transcoded directory:
//!
//! ```text
//! <transcoded_dir>/<stem>/<stem>_<height>p.mp4
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::domain::errors::DomainError;
use crate::domain::model::{is_supported_video, StreamProfile, TranscodedVariant, VideoEntry};
use crate::ports::TranscodePort;

/// Concurrent catalog of source videos and their transcoded variants
pub struct VideoCatalog {
    entries: RwLock<HashMap<String, VideoEntry>>,
    source_dir: PathBuf,
    transcoded_dir: PathBuf,
    transcoder: Arc<dyn TranscodePort>,
}

impl VideoCatalog {
    pub fn new(
        source_dir: impl Into<PathBuf>,
        transcoded_dir: impl Into<PathBuf>,
        transcoder: Arc<dyn TranscodePort>,
    ) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            source_dir: source_dir.into(),
            transcoded_dir: transcoded_dir.into(),
            transcoder,
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn transcoded_dir(&self) -> &Path {
        &self.transcoded_dir
    }

    /// Create the source and transcoded directories if they are missing
    pub fn ensure_directories(&self) -> Result<(), DomainError> {
        for dir in [&self.source_dir, &self.transcoded_dir] {
            if !dir.is_dir() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    DomainError::FsFail(format!("Could not create {}: {}", dir.display(), e))
                })?;
                info!("Created directory {}", dir.display());
            }
        }
        Ok(())
    }

    /// Synchronise the catalog with the source directory.
    ///
    /// New files get an entry warmed from the transcoded directory; entries
    /// whose file disappeared are dropped. Returns the entries sorted by name.
    pub fn scan(&self) -> Vec<VideoEntry> {
        let found = match self.list_source_files() {
            Ok(found) => found,
            Err(e) => {
                error!("Error during the scan of {}: {}", self.source_dir.display(), e);
                self.entries.write().clear();
                return Vec::new();
            }
        };

        let known: HashSet<String> = self.entries.read().keys().cloned().collect();
        let fresh: Vec<VideoEntry> = found
            .iter()
            .filter(|(name, _)| !known.contains(*name))
            .filter_map(|(_, (path, size))| match VideoEntry::new(path.clone(), *size) {
                Ok(mut entry) => {
                    self.warm_from_disk(&mut entry);
                    Some(entry)
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    None
                }
            })
            .collect();

        let (added, removed) = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|name, _| found.contains_key(name));
            let removed = before - entries.len();
            let added = fresh.len();
            for entry in fresh {
                entries.entry(entry.file_name.clone()).or_insert(entry);
            }
            (added, removed)
        };

        if added > 0 || removed > 0 {
            info!(added, removed, "Catalog updated");
        }
        self.entries()
    }

    /// Entry for `file_name`, if it is in the catalog
    pub fn get(&self, file_name: &str) -> Option<VideoEntry> {
        self.entries.read().get(file_name).cloned()
    }

    /// All entries sorted by file name
    pub fn entries(&self) -> Vec<VideoEntry> {
        let mut entries: Vec<VideoEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Make sure `entry` has at least the variants that can be produced.
    ///
    /// Existing variants are returned as they are. Otherwise variants already
    /// on disk are adopted, and only when there are none is every tier
    /// transcoded, richest first. A tier that fails is logged and skipped.
    pub async fn prepare(&self, entry: &VideoEntry) -> Result<VideoEntry, DomainError> {
        if entry.has_variants() {
            return Ok(entry.clone());
        }

        if !entry.file_path.is_file() {
            return Err(DomainError::FileNotFound(
                entry.file_path.display().to_string(),
            ));
        }

        let mut entry = entry.clone();
        if self.warm_from_disk(&mut entry) > 0 {
            for variant in entry.variants() {
                self.append_variant(&entry.file_name, variant.clone());
            }
            return Ok(self.get(&entry.file_name).unwrap_or(entry));
        }

        let dir = entry.variant_dir(&self.transcoded_dir);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            DomainError::FsFail(format!("Could not create {}: {}", dir.display(), e))
        })?;

        for tier in StreamProfile::ladder() {
            let output = entry.variant_path(&self.transcoded_dir, &tier);

            if !is_non_empty_file(&output).await {
                if let Err(e) = self
                    .transcoder
                    .transcode(&entry.file_path, &tier, &output)
                    .await
                {
                    error!(file = %entry.file_name, "Error while transcoding to {}p: {}", tier.height, e);
                    continue;
                }
                if !is_non_empty_file(&output).await {
                    error!(
                        file = %entry.file_name,
                        "Transcoded file is missing or empty: {}",
                        output.display()
                    );
                    continue;
                }
            }

            let variant = TranscodedVariant::for_tier(output, &tier);
            info!(file = %entry.file_name, "Variant ready: {}", variant);
            entry.add_variant(variant.clone());
            self.append_variant(&entry.file_name, variant);
        }

        if !entry.has_variants() {
            warn!(file = %entry.file_name, "No variant could be produced");
        }
        Ok(self.get(&entry.file_name).unwrap_or(entry))
    }

    fn append_variant(&self, file_name: &str, variant: TranscodedVariant) {
        if let Some(entry) = self.entries.write().get_mut(file_name) {
            entry.add_variant(variant);
        }
    }

    /// Adopt the variants already on disk; returns how many were added
    fn warm_from_disk(&self, entry: &mut VideoEntry) -> usize {
        let mut adopted = 0;
        for tier in StreamProfile::ladder() {
            let path = entry.variant_path(&self.transcoded_dir, &tier);
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {
                    if entry.add_variant(TranscodedVariant::for_tier(path, &tier)) {
                        adopted += 1;
                    }
                }
                Ok(meta) if meta.is_file() => {
                    warn!("Ignoring empty transcoded file: {}", path.display());
                }
                _ => {}
            }
        }
        if adopted > 0 {
            debug!(file = %entry.file_name, "Found {} transcoded variants on disk", adopted);
        }
        adopted
    }

    fn list_source_files(&self) -> Result<HashMap<String, (PathBuf, u64)>, walkdir::Error> {
        let mut found = HashMap::new();
        let walker = WalkDir::new(&self.source_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true);

        for item in walker {
            let item = match item {
                Ok(item) => item,
                Err(e) if e.depth() == 0 => return Err(e),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !item.file_type().is_file() {
                continue;
            }

            let name = item.file_name().to_string_lossy().to_string();
            if !is_supported_video(&name) {
                continue;
            }
            let size = match item.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!("Skipping {}: {}", name, e);
                    continue;
                }
            };
            found.insert(name, (item.into_path(), size));
        }
        Ok(found)
    }
}

async fn is_non_empty_file(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file() && meta.len() > 0)
}

#[cfg(test)]
mod tests;
