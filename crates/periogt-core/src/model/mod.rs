//! Checkpoint artifacts: layout, download/verification, index and statistics.

pub mod download;
pub mod index;
pub mod info;
pub mod manager;
pub mod stats;

use std::path::{Path, PathBuf};

pub use download::{ArchiveFetcher, ArchiveSpec, HttpFetcher};
pub use index::{ArtifactIndex, IndexEntry};
pub use info::{property_metadata, PropertyInfo};
pub use manager::{ArtifactManager, SetupReport};
pub use stats::{DescriptorScaler, LabelStat, LabelStats};

pub const PRETRAINED_DIR: &str = "pretrained_ckpt";
pub const FINETUNED_DIR: &str = "finetuned_ckpt";
pub const LABEL_STATS_FILE: &str = "label_stats.json";
pub const SCALER_FILE: &str = "descriptor_scaler.json";
pub const INDEX_FILE: &str = "index.json";
pub const READY_SENTINEL: &str = ".ready";
pub const DOWNLOADING_MARKER: &str = ".downloading";
pub const VERIFIED_DIR: &str = ".verified";
/// Checkpoint extensions, in order of preference when one directory holds several.
pub const WEIGHTS_EXTENSIONS: [&str; 2] = ["safetensors", "pth"];

/// Paths of every artifact under one checkpoint root.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pretrained_dir(&self) -> PathBuf {
        self.root.join(PRETRAINED_DIR)
    }

    pub fn finetuned_dir(&self) -> PathBuf {
        self.root.join(FINETUNED_DIR)
    }

    pub fn label_stats(&self) -> PathBuf {
        self.root.join(LABEL_STATS_FILE)
    }

    pub fn scaler(&self) -> PathBuf {
        self.root.join(SCALER_FILE)
    }

    pub fn index(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn ready_sentinel(&self) -> PathBuf {
        self.root.join(READY_SENTINEL)
    }

    pub fn downloading_marker(&self) -> PathBuf {
        self.root.join(DOWNLOADING_MARKER)
    }

    pub fn verified_stamp(&self, archive: &str) -> PathBuf {
        self.root.join(VERIFIED_DIR).join(format!("{archive}.md5"))
    }

    /// Required artifacts as `(name, path)` in a stable order.
    pub fn required(&self) -> Vec<(&'static str, PathBuf)> {
        vec![
            ("pretrained_dir", self.pretrained_dir()),
            ("finetuned_dir", self.finetuned_dir()),
            ("label_stats_json", self.label_stats()),
            ("descriptor_scaler_json", self.scaler()),
            ("index_json", self.index()),
        ]
    }

    /// First weights file (sorted by name) under the pretrained directory.
    pub fn pretrained_weights(&self) -> Option<PathBuf> {
        find_weights(&self.pretrained_dir())
    }
}

/// First weights file under `dir`, searched recursively. Within one
/// directory `*.safetensors` wins over `*.pth`; ties go to the name that
/// sorts first.
pub(crate) fn find_weights(dir: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    let file = entries
        .iter()
        .filter(|p| p.is_file())
        .filter_map(|p| weights_rank(p).map(|rank| (rank, p)))
        .min_by_key(|(rank, _)| *rank);
    if let Some((_, file)) = file {
        return Some(file.clone());
    }
    entries
        .iter()
        .filter(|p| p.is_dir())
        .find_map(|sub| find_weights(sub))
}

fn weights_rank(path: &Path) -> Option<usize> {
    let ext = path.extension()?;
    WEIGHTS_EXTENSIONS.iter().position(|known| ext == *known)
}

pub(crate) fn is_weights_file(path: &Path) -> bool {
    weights_rank(path).is_some()
}

/// PyTorch pickle checkpoints (`*.pth`, `*.pt`).
pub(crate) fn is_pickle_weights(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == "pth" || ext == "pt")
        .unwrap_or(false)
}

/// Recursive size of a file or directory in bytes.
pub(crate) fn dir_size(path: &Path) -> std::io::Result<u64> {
    let metadata = std::fs::metadata(path)?;
    if metadata.is_file() {
        return Ok(metadata.len());
    }
    let mut size = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            size += metadata.len();
        } else if metadata.is_dir() {
            size += dir_size(&entry.path())?;
        }
    }
    Ok(size)
}
