//! Property → checkpoint index.
//!
//! Built by scanning the finetuned tree, persisted as one JSON document and
//! replaced atomically (temp file in the same directory, then rename), so a
//! concurrent reader sees either the previous index or the new one.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    find_weights, info::property_metadata, is_pickle_weights, is_weights_file, ArtifactLayout,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub checkpoint: PathBuf,
    pub label: String,
    pub units: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactIndex {
    entries: BTreeMap<String, IndexEntry>,
}

impl ArtifactIndex {
    /// Scan the checkpoint root for per-property head weights.
    pub fn scan(layout: &ArtifactLayout) -> Result<Self> {
        let finetuned = layout.finetuned_dir();
        let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();

        if finetuned.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&finetuned)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .collect();
            entries.sort();

            for path in entries {
                if path.is_dir() {
                    let Some(prop) = file_name(&path) else { continue };
                    if let Some(weights) = find_weights(&path) {
                        insert_preferred(&mut found, prop, weights);
                    }
                } else if is_weights_file(&path) {
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    let prop = stem.strip_prefix("best_model_").unwrap_or(stem);
                    if !prop.is_empty() {
                        insert_preferred(&mut found, prop.to_string(), path);
                    }
                }
            }
        } else {
            collect_best_models(layout.root(), &mut found)?;
        }

        let entries = found
            .into_iter()
            .map(|(prop, checkpoint)| {
                let (label, units) = property_metadata(&prop);
                let checkpoint = checkpoint.canonicalize().unwrap_or(checkpoint);
                (
                    prop,
                    IndexEntry {
                        checkpoint,
                        label,
                        units,
                    },
                )
            })
            .collect();
        Ok(Self { entries })
    }

    /// Load and validate `index.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CheckpointMissing {
                    what: "artifact index".to_string(),
                    path: path.to_path_buf(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        let index: Self = serde_json::from_str(&content)
            .map_err(|e| Error::invalid_artifact(path, format!("index is not a valid object: {e}")))?;
        index.validate(path)?;
        Ok(index)
    }

    /// Every entry must name an existing checkpoint file.
    pub fn validate(&self, path: &Path) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::invalid_artifact(path, "index has no properties"));
        }
        for (prop, entry) in &self.entries {
            if !entry.checkpoint.is_file() {
                return Err(Error::invalid_artifact(
                    path,
                    format!(
                        "checkpoint for '{prop}' not found: {}",
                        entry.checkpoint.display()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Serialize deterministically: sorted keys, pretty-printed, trailing newline.
    pub fn to_json(&self) -> Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Atomically replace `path` with this index.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        debug!("Wrote artifact index with {} entries to {:?}", self.len(), path);
        Ok(())
    }

    pub fn get(&self, property: &str) -> Option<&IndexEntry> {
        self.entries.get(property)
    }

    pub fn properties(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
}

/// First checkpoint seen for a property wins, except that a safetensors
/// file replaces an earlier `.pth` one.
fn insert_preferred(found: &mut BTreeMap<String, PathBuf>, prop: String, path: PathBuf) {
    match found.get_mut(&prop) {
        Some(existing) => {
            if is_pickle_weights(existing) && !is_pickle_weights(&path) {
                *existing = path;
            }
        }
        None => {
            found.insert(prop, path);
        }
    }
}

fn collect_best_models(dir: &Path, found: &mut BTreeMap<String, PathBuf>) -> Result<()> {
    let Ok(read) = std::fs::read_dir(dir) else {
        return Ok(());
    };
    let mut entries: Vec<PathBuf> = read.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_best_models(&path, found)?;
            continue;
        }
        let is_best = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("best_model"))
            .unwrap_or(false);
        if is_best && is_weights_file(&path) {
            if let Some(prop) = path.parent().and_then(file_name) {
                insert_preferred(found, prop, path);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"weights").unwrap();
    }

    #[test]
    fn test_scan_subdirectories_and_loose_files() {
        let tmp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(tmp.path());
        touch(&layout.finetuned_dir().join("tg/b.safetensors"));
        touch(&layout.finetuned_dir().join("tg/a.safetensors"));
        touch(&layout.finetuned_dir().join("best_model_eps.safetensors"));
        touch(&layout.finetuned_dir().join("density.safetensors"));
        touch(&layout.finetuned_dir().join("notes.txt"));

        let index = ArtifactIndex::scan(&layout).unwrap();
        assert_eq!(index.properties(), vec!["density", "eps", "tg"]);
        let tg = index.get("tg").unwrap();
        assert!(tg.checkpoint.ends_with("tg/a.safetensors"));
        assert_eq!(tg.units, "K");
    }

    #[test]
    fn test_scan_falls_back_to_best_model_search() {
        let tmp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(tmp.path());
        touch(&tmp.path().join("runs/xi/best_model.safetensors"));

        let index = ArtifactIndex::scan(&layout).unwrap();
        assert_eq!(index.properties(), vec!["xi"]);
        assert_eq!(index.get("xi").unwrap().label, "Chi parameter");
    }

    #[test]
    fn test_scan_indexes_pytorch_checkpoints() {
        let tmp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(tmp.path());
        touch(&layout.finetuned_dir().join("tg/best_model.pth"));
        touch(&layout.finetuned_dir().join("best_model_eps.pth"));
        touch(&layout.finetuned_dir().join("density.pth"));
        touch(&layout.finetuned_dir().join("density.safetensors"));
        touch(&layout.finetuned_dir().join("xi/a.pth"));
        touch(&layout.finetuned_dir().join("xi/b.safetensors"));

        let index = ArtifactIndex::scan(&layout).unwrap();
        assert_eq!(index.properties(), vec!["density", "eps", "tg", "xi"]);
        assert!(index.get("tg").unwrap().checkpoint.ends_with("tg/best_model.pth"));
        assert!(index.get("eps").unwrap().checkpoint.ends_with("best_model_eps.pth"));
        assert!(index
            .get("density")
            .unwrap()
            .checkpoint
            .ends_with("density.safetensors"));
        assert!(index.get("xi").unwrap().checkpoint.ends_with("xi/b.safetensors"));
    }

    #[test]
    fn test_fallback_search_finds_pytorch_best_models() {
        let tmp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(tmp.path());
        touch(&tmp.path().join("runs/tg/best_model.pth"));

        let index = ArtifactIndex::scan(&layout).unwrap();
        assert_eq!(index.properties(), vec!["tg"]);
    }

    #[test]
    fn test_write_is_deterministic_and_loadable() {
        let tmp = TempDir::new().unwrap();
        let layout = ArtifactLayout::new(tmp.path());
        touch(&layout.finetuned_dir().join("tg/model.safetensors"));

        ArtifactIndex::scan(&layout).unwrap().write_atomic(&layout.index()).unwrap();
        let first = std::fs::read(layout.index()).unwrap();
        ArtifactIndex::scan(&layout).unwrap().write_atomic(&layout.index()).unwrap();
        let second = std::fs::read(layout.index()).unwrap();
        assert_eq!(first, second);
        assert!(first.ends_with(b"\n"));

        let loaded = ArtifactIndex::load(&layout.index()).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn test_load_rejects_dangling_and_empty_index() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");

        std::fs::write(&path, "{}").unwrap();
        assert_eq!(
            ArtifactIndex::load(&path).unwrap_err().code(),
            ErrorCode::CheckpointMissing
        );

        std::fs::write(
            &path,
            r#"{"tg": {"checkpoint": "/nowhere/tg.safetensors", "label": "Tg", "units": "K"}}"#,
        )
        .unwrap();
        let err = ArtifactIndex::load(&path).unwrap_err();
        assert!(err.to_string().contains("/nowhere/tg.safetensors"));

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(ArtifactIndex::load(&path).is_err());
    }
}
