//! Local media library
//!
//! Every video file under a directory becomes one piece of simulated swarm
//! content with a deterministic info hash, so the same file keeps the same
//! magnet link across runs.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use sha1::{Digest, Sha1};
use undertow_core::InfoHash;
use url::form_urlencoded;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "m4v", "webm"];

/// One video file offered by the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryFile {
    /// Absolute or library-relative path on disk
    pub path: PathBuf,
    /// File name used as the content name
    pub file_name: String,
    /// File size in bytes
    pub size: u64,
    pub info_hash: InfoHash,
}

impl LibraryFile {
    /// Creates an entry for a file on disk.
    pub fn new(path: PathBuf, size: u64) -> Self {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let info_hash = library_info_hash(&file_name, size);

        Self {
            path,
            file_name,
            size,
            info_hash,
        }
    }

    /// Magnet link that resolves to this file through the local engine.
    pub fn magnet_link(&self) -> String {
        let name: String = form_urlencoded::byte_serialize(self.file_name.as_bytes()).collect();
        format!("magnet:?xt=urn:btih:{}&dn={}", self.info_hash, name)
    }
}

/// Deterministic content identifier for a library file.
pub fn library_info_hash(file_name: &str, size: u64) -> InfoHash {
    let mut hasher = Sha1::new();
    hasher.update(format!("undertow-sim:{file_name}:{size}").as_bytes());

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&hasher.finalize()[..20]);
    InfoHash::new(hash)
}

/// Video files available to the simulated swarm, keyed by info hash.
#[derive(Debug, Clone, Default)]
pub struct LocalLibrary {
    files: BTreeMap<InfoHash, LibraryFile>,
}

impl LocalLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recursively scans `dir` for non-empty video files.
    ///
    /// Unreadable subdirectories are skipped with a warning.
    ///
    /// # Errors
    /// - `std::io::Error` - The top-level directory cannot be read
    pub async fn scan(dir: &Path) -> Result<Self, std::io::Error> {
        let mut library = Self::new();
        let found = library.scan_recursive(dir).await?;
        tracing::info!("Library scan of {} found {found} video files", dir.display());
        Ok(library)
    }

    fn scan_recursive<'a>(
        &'a mut self,
        dir: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<usize, std::io::Error>> + Send + 'a>> {
        Box::pin(async move {
            let mut count = 0;
            let mut entries = tokio::fs::read_dir(dir).await?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let metadata = entry.metadata().await?;

                if metadata.is_dir() {
                    if is_hidden(&path) {
                        continue;
                    }
                    match self.scan_recursive(&path).await {
                        Ok(found) => count += found,
                        Err(e) => tracing::warn!("Skipping {}: {e}", path.display()),
                    }
                } else if metadata.is_file() && metadata.len() > 0 && is_video(&path) {
                    self.insert(LibraryFile::new(path, metadata.len()));
                    count += 1;
                }
            }

            Ok(count)
        })
    }

    pub fn insert(&mut self, file: LibraryFile) {
        self.files.insert(file.info_hash, file);
    }

    pub fn get(&self, info_hash: InfoHash) -> Option<&LibraryFile> {
        self.files.get(&info_hash)
    }

    /// Files ordered by info hash.
    pub fn files(&self) -> impl Iterator<Item = &LibraryFile> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .map(|extension| extension.to_string_lossy().to_lowercase())
        .is_some_and(|extension| VIDEO_EXTENSIONS.contains(&extension.as_str()))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}
