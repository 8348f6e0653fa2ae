//! Archive retrieval, checksum verification and extraction.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_ARCHIVE_BASE_URL: &str = "https://zenodo.org/records/17035498/files";

/// One published archive and its MD5 digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSpec {
    pub name: String,
    pub md5: String,
    /// Top-level directory the archive extracts to.
    pub extracts_to: String,
}

impl ArchiveSpec {
    pub fn new(name: &str, md5: &str, extracts_to: &str) -> Self {
        Self {
            name: name.to_string(),
            md5: md5.to_string(),
            extracts_to: extracts_to.to_string(),
        }
    }

    /// Archives of the public checkpoint record.
    pub fn published() -> Vec<Self> {
        vec![
            Self::new(
                "pretrained_ckpt.zip",
                "7adbcfc4da134692e9a2965270321662",
                super::PRETRAINED_DIR,
            ),
            Self::new(
                "finetuned_ckpt.zip",
                "f285c724142aa2c8919f6a736f6e6093",
                super::FINETUNED_DIR,
            ),
        ]
    }
}

/// Source of archive bytes.
pub trait ArchiveFetcher: Send + Sync {
    /// Write archive `name` to `dest`, returning the byte count.
    fn fetch(&self, name: &str, dest: &Path) -> Result<u64>;
}

/// Fetches archives over HTTP(S) with a single attempt per call.
pub struct HttpFetcher {
    base_url: String,
    client: Client,
    show_progress: bool,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(3600))
            .build()
            .map_err(|e| Error::Download(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            show_progress: false,
        })
    }

    /// Base URL from `PERIOGT_ARCHIVE_BASE_URL`, else the public record.
    pub fn from_env() -> Result<Self> {
        let base = std::env::var(crate::config::ENV_ARCHIVE_BASE_URL)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ARCHIVE_BASE_URL.to_string());
        Self::new(base)
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn url_for(&self, name: &str) -> String {
        format!("{}/{}?download=1", self.base_url, name)
    }
}

impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, name: &str, dest: &Path) -> Result<u64> {
        let url = self.url_for(name);
        info!("Downloading {} from {}", name, url);

        let mut response = self
            .client
            .get(&url)
            .header("User-Agent", concat!("periogt/", env!("CARGO_PKG_VERSION")))
            .send()
            .map_err(|e| Error::Download(format!("HTTP request failed for {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Download(format!(
                "HTTP {} for {}",
                response.status(),
                url
            )));
        }

        let spinner = if self.show_progress {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg} [{elapsed_precise}]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_message(format!("Downloading {name}"));
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let mut file = File::create(dest)?;
        let written = response
            .copy_to(&mut file)
            .map_err(|e| Error::Download(format!("Failed to read response for {name}: {e}")));
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        let written = written?;
        file.sync_all()?;

        debug!("Downloaded {} bytes to {:?}", written, dest);
        Ok(written)
    }
}

/// Copies archives from a local directory (offline mirrors, tests).
pub struct LocalFetcher {
    dir: PathBuf,
}

impl LocalFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArchiveFetcher for LocalFetcher {
    fn fetch(&self, name: &str, dest: &Path) -> Result<u64> {
        let src = self.dir.join(name);
        std::fs::copy(&src, dest)
            .map_err(|e| Error::Download(format!("Failed to copy {}: {e}", src.display())))
    }
}

/// Hex MD5 digest of a file, streamed.
pub fn md5_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }
    Ok(format!("{:x}", ctx.compute()))
}

/// Extract a zip archive into `dest`, rejecting entries that escape it.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| Error::invalid_artifact(archive, format!("not a zip archive: {e}")))?;

    std::fs::create_dir_all(dest)?;
    let mut extracted = 0;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::invalid_artifact(archive, format!("corrupt entry {i}: {e}")))?;
        let raw_name = entry.name().to_string();
        let relative = safe_entry_path(&raw_name).ok_or_else(|| {
            Error::invalid_artifact(archive, format!("unsafe entry path '{raw_name}'"))
        })?;
        let target = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        extracted += 1;
    }
    Ok(extracted)
}

fn safe_entry_path(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}
