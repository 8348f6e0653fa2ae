//! Artifact lifecycle: presence checks, verified bootstrap, index generation.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::download::{extract_zip, md5_file, ArchiveFetcher, ArchiveSpec, HttpFetcher};
use super::index::ArtifactIndex;
use super::ArtifactLayout;
use crate::error::{Error, MissingArtifact, Result};

/// Outcome of a `setup` run.
#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    pub checkpoint_dir: PathBuf,
    pub properties: Vec<String>,
    pub count: usize,
    pub skip_download: bool,
    pub downloaded: Vec<String>,
    pub already_verified: Vec<String>,
}

/// Owns the on-disk checkpoint layout under one root.
pub struct ArtifactManager {
    layout: ArtifactLayout,
    archives: Vec<ArchiveSpec>,
    fetcher: Option<Arc<dyn ArchiveFetcher>>,
}

impl ArtifactManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: ArtifactLayout::new(root),
            archives: ArchiveSpec::published(),
            fetcher: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_archives(mut self, archives: Vec<ArchiveSpec>) -> Self {
        self.archives = archives;
        self
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    pub fn is_ready(&self) -> bool {
        self.layout.ready_sentinel().is_file()
    }

    /// Every required artifact that is absent, in a stable order.
    pub fn missing_required_artifacts(&self) -> Vec<MissingArtifact> {
        self.layout
            .required()
            .into_iter()
            .filter(|(name, path)| {
                if name.ends_with("_dir") {
                    !path.is_dir()
                } else {
                    !path.is_file()
                }
            })
            .map(|(name, path)| MissingArtifact {
                name: name.to_string(),
                path,
            })
            .collect()
    }

    /// Fail fast, listing every missing artifact by expected path.
    pub fn ensure_artifacts(&self) -> Result<()> {
        if !self.root().is_dir() {
            return Err(Error::CheckpointMissing {
                what: "checkpoint directory".to_string(),
                path: self.root().to_path_buf(),
            });
        }
        let missing = self.missing_required_artifacts();
        if !missing.is_empty() {
            return Err(Error::MissingArtifacts { missing });
        }
        if self.layout.pretrained_weights().is_none() {
            return Err(Error::CheckpointMissing {
                what: "pretrained backbone weights (*.safetensors or *.pth)".to_string(),
                path: self.layout.pretrained_dir(),
            });
        }
        Ok(())
    }

    /// Scan the finetuned tree and atomically publish `index.json`.
    pub fn build_index(&self) -> Result<ArtifactIndex> {
        let index = ArtifactIndex::scan(&self.layout)?;
        if index.is_empty() {
            return Err(Error::CheckpointMissing {
                what: "finetuned property checkpoints (*.safetensors or *.pth)".to_string(),
                path: self.layout.finetuned_dir(),
            });
        }
        index.write_atomic(&self.layout.index())?;
        info!(
            "Indexed {} properties into {:?}",
            index.len(),
            self.layout.index()
        );
        Ok(index)
    }

    pub fn load_index(&self) -> Result<ArtifactIndex> {
        ArtifactIndex::load(&self.layout.index())
    }

    /// Download, verify and extract archives as needed, then build the index.
    pub fn fetch_and_prepare(&self, skip_download: bool) -> Result<SetupReport> {
        std::fs::create_dir_all(self.root())?;
        let mut downloaded = Vec::new();
        let mut already_verified = Vec::new();

        if skip_download {
            info!("Skipping download; indexing pre-placed artifacts in {:?}", self.root());
        } else {
            let pending: Vec<&ArchiveSpec> = self
                .archives
                .iter()
                .filter(|spec| {
                    if self.is_verified(spec) {
                        already_verified.push(spec.name.clone());
                        false
                    } else {
                        true
                    }
                })
                .collect();

            if !pending.is_empty() {
                let _marker = DownloadMarker::acquire(&self.layout.downloading_marker())?;
                let fetcher = match &self.fetcher {
                    Some(f) => f.clone(),
                    None => Arc::new(HttpFetcher::from_env()?.with_progress(true)),
                };
                for spec in pending {
                    self.fetch_archive(fetcher.as_ref(), spec)?;
                    downloaded.push(spec.name.clone());
                }
            }
        }

        let index = self.build_index()?;
        if !skip_download {
            std::fs::write(self.layout.ready_sentinel(), b"ok\n")?;
        }

        let properties = index.properties();
        Ok(SetupReport {
            checkpoint_dir: self.root().to_path_buf(),
            count: properties.len(),
            properties,
            skip_download,
            downloaded,
            already_verified,
        })
    }

    fn is_verified(&self, spec: &ArchiveSpec) -> bool {
        let stamp = std::fs::read_to_string(self.layout.verified_stamp(&spec.name))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        stamp == spec.md5 && self.root().join(&spec.extracts_to).is_dir()
    }

    fn fetch_archive(&self, fetcher: &dyn ArchiveFetcher, spec: &ArchiveSpec) -> Result<()> {
        let part = self.root().join(format!("{}.part", spec.name));
        let result = fetcher
            .fetch(&spec.name, &part)
            .and_then(|_| self.verify_and_extract(spec, &part));
        if part.exists() {
            if let Err(e) = std::fs::remove_file(&part) {
                warn!("Failed to remove {:?}: {}", part, e);
            }
        }
        result
    }

    fn verify_and_extract(&self, spec: &ArchiveSpec, part: &Path) -> Result<()> {
        let actual = md5_file(part)?;
        if actual != spec.md5 {
            return Err(Error::ChecksumMismatch {
                name: spec.name.clone(),
                path: part.to_path_buf(),
                expected: spec.md5.clone(),
                actual,
            });
        }
        info!("Checksum verified for {}", spec.name);

        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(self.root())?;
        extract_zip(part, staging.path())?;

        for entry in std::fs::read_dir(staging.path())? {
            let entry = entry?;
            let target = self.root().join(entry.file_name());
            if target.is_dir() {
                std::fs::remove_dir_all(&target)?;
            } else if target.exists() {
                std::fs::remove_file(&target)?;
            }
            std::fs::rename(entry.path(), &target)?;
        }
        if !self.root().join(&spec.extracts_to).is_dir() {
            return Err(Error::invalid_artifact(
                part,
                format!("archive did not contain {}/", spec.extracts_to),
            ));
        }

        let stamp = self.layout.verified_stamp(&spec.name);
        if let Some(parent) = stamp.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&stamp, format!("{}\n", spec.md5))?;
        info!("Extracted {} into {:?}", spec.name, self.root());
        Ok(())
    }
}

/// Exclusive `.downloading` marker, removed on drop.
struct DownloadMarker {
    path: PathBuf,
}

impl DownloadMarker {
    fn acquire(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => Ok(Self {
                path: path.to_path_buf(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(Error::Busy(format!(
                "Another process is bootstrapping artifacts (marker {} exists); retry later",
                path.display()
            ))),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

impl Drop for DownloadMarker {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove download marker {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::model::download::{tests::write_zip, LocalFetcher};
    use tempfile::TempDir;

    fn place_artifacts(root: &Path) {
        let layout = ArtifactLayout::new(root);
        std::fs::create_dir_all(layout.pretrained_dir()).unwrap();
        std::fs::write(layout.pretrained_dir().join("backbone.safetensors"), b"w").unwrap();
        std::fs::create_dir_all(layout.finetuned_dir().join("tg")).unwrap();
        std::fs::write(layout.finetuned_dir().join("tg/head.safetensors"), b"w").unwrap();
        std::fs::write(layout.label_stats(), r#"{"tg":{"mean":0,"std":1}}"#).unwrap();
        std::fs::write(layout.scaler(), r#"{"mean":[],"scale":[]}"#).unwrap();
    }

    #[test]
    fn test_ensure_artifacts_lists_every_missing_item() {
        let tmp = TempDir::new().unwrap();
        let manager = ArtifactManager::new(tmp.path());
        let err = manager.ensure_artifacts().unwrap_err();
        assert_eq!(err.code(), ErrorCode::CheckpointMissing);
        match err {
            Error::MissingArtifacts { missing } => {
                let names: Vec<_> = missing.iter().map(|m| m.name.as_str()).collect();
                assert_eq!(
                    names,
                    vec![
                        "pretrained_dir",
                        "finetuned_dir",
                        "label_stats_json",
                        "descriptor_scaler_json",
                        "index_json"
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_skip_download_setup_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        place_artifacts(tmp.path());
        let manager = ArtifactManager::new(tmp.path());

        let first = manager.fetch_and_prepare(true).unwrap();
        let bytes_first = std::fs::read(manager.layout().index()).unwrap();
        let second = manager.fetch_and_prepare(true).unwrap();
        let bytes_second = std::fs::read(manager.layout().index()).unwrap();

        assert_eq!(bytes_first, bytes_second);
        assert_eq!(first.properties, vec!["tg"]);
        assert_eq!(second.count, 1);
        manager.ensure_artifacts().unwrap();
    }

    #[test]
    fn test_corrupted_archive_is_removed_and_not_extracted() {
        let mirror = TempDir::new().unwrap();
        write_zip(
            &mirror.path().join("finetuned_ckpt.zip"),
            &[("finetuned_ckpt/tg/head.safetensors", b"w")],
        );
        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path())
            .with_fetcher(Arc::new(LocalFetcher::new(mirror.path())))
            .with_archives(vec![ArchiveSpec::new(
                "finetuned_ckpt.zip",
                "00000000000000000000000000000000",
                "finetuned_ckpt",
            )]);

        let err = manager.fetch_and_prepare(false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ChecksumMismatch);
        assert!(err.to_string().contains("finetuned_ckpt.zip.part"));
        assert!(!root.path().join("finetuned_ckpt.zip.part").exists());
        assert!(!root.path().join("finetuned_ckpt").exists());
        assert!(!root.path().join(".downloading").exists());
        assert!(!manager.is_ready());
    }

    #[test]
    fn test_verified_download_extracts_and_skips_on_rerun() {
        let mirror = TempDir::new().unwrap();
        let archive = mirror.path().join("finetuned_ckpt.zip");
        write_zip(&archive, &[("finetuned_ckpt/tg/head.safetensors", b"w")]);
        let digest = md5_file(&archive).unwrap();

        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path())
            .with_fetcher(Arc::new(LocalFetcher::new(mirror.path())))
            .with_archives(vec![ArchiveSpec::new(
                "finetuned_ckpt.zip",
                &digest,
                "finetuned_ckpt",
            )]);

        let report = manager.fetch_and_prepare(false).unwrap();
        assert_eq!(report.downloaded, vec!["finetuned_ckpt.zip"]);
        assert!(root.path().join("finetuned_ckpt/tg/head.safetensors").is_file());
        assert!(manager.is_ready());
        let index_before = std::fs::read(manager.layout().index()).unwrap();

        std::fs::remove_file(&archive).unwrap();
        let rerun = manager.fetch_and_prepare(false).unwrap();
        assert!(rerun.downloaded.is_empty());
        assert_eq!(rerun.already_verified, vec!["finetuned_ckpt.zip"]);
        assert_eq!(index_before, std::fs::read(manager.layout().index()).unwrap());
    }

    #[test]
    fn test_pytorch_checkpoint_archive_is_indexed() {
        let mirror = TempDir::new().unwrap();
        let archive = mirror.path().join("finetuned_ckpt.zip");
        write_zip(
            &archive,
            &[
                ("finetuned_ckpt/tg/best_model.pth", b"w"),
                ("finetuned_ckpt/eps/best_model.pth", b"w"),
            ],
        );
        let digest = md5_file(&archive).unwrap();

        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path())
            .with_fetcher(Arc::new(LocalFetcher::new(mirror.path())))
            .with_archives(vec![ArchiveSpec::new(
                "finetuned_ckpt.zip",
                &digest,
                "finetuned_ckpt",
            )]);

        let report = manager.fetch_and_prepare(false).unwrap();
        assert_eq!(report.properties, vec!["eps", "tg"]);
        let index = ArtifactIndex::load(&manager.layout().index()).unwrap();
        assert!(index
            .get("tg")
            .unwrap()
            .checkpoint
            .ends_with("tg/best_model.pth"));
    }

    #[test]
    fn test_concurrent_index_builds_never_expose_partial_json() {
        let tmp = TempDir::new().unwrap();
        place_artifacts(tmp.path());
        let manager = ArtifactManager::new(tmp.path());
        let expected = manager.build_index().unwrap().to_json().unwrap();
        let index_path = manager.layout().index();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        manager.build_index().unwrap();
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..200 {
                    let bytes = std::fs::read_to_string(&index_path).unwrap();
                    assert_eq!(bytes, expected);
                    ArtifactIndex::load(&index_path).unwrap();
                }
            });
        });

        assert_eq!(std::fs::read_to_string(&index_path).unwrap(), expected);
    }

    #[test]
    fn test_concurrent_bootstrap_is_refused() {
        let root = TempDir::new().unwrap();
        let manager = ArtifactManager::new(root.path())
            .with_fetcher(Arc::new(LocalFetcher::new(root.path())));
        std::fs::write(manager.layout().downloading_marker(), b"").unwrap();

        let err = manager.fetch_and_prepare(false).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
        assert!(err.is_retryable());
        // The marker belongs to the other process.
        assert!(manager.layout().downloading_marker().exists());
    }
}
