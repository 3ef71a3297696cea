//! Filesystem implementation of the [`FileStore`] collaborator.
//!
//! Walks a root directory, filters by include/exclude globs, and hashes file
//! content with SHA-256. The hash is what the change detector compares, so a
//! touched-but-identical file never reprocesses.

use anyhow::{bail, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::FileStoreConfig;
use crate::models::RemoteFile;
use crate::traits::FileStore;

pub struct FilesystemStore {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl FilesystemStore {
    pub fn new(config: &FileStoreConfig) -> Result<Self> {
        let mut default_excludes = vec!["**/.git/**".to_string()];
        default_excludes.extend(config.exclude_globs.clone());

        Ok(Self {
            root: config.root.clone(),
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&default_excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    fn scan(&self) -> Result<Vec<RemoteFile>> {
        if !self.root.exists() {
            bail!("file store root does not exist: {}", self.root.display());
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root).follow_links(self.follow_symlinks);
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(&self.root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }

            files.push(file_entry(path, &rel_str)?);
        }

        // Sort for deterministic ordering.
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

#[async_trait]
impl FileStore for FilesystemStore {
    async fn list_files(&self) -> Result<Vec<RemoteFile>> {
        self.scan()
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.root.join(path);
        Ok(tokio::fs::read(&full).await?)
    }
}

fn file_entry(path: &Path, relative_path: &str) -> Result<RemoteFile> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
    let modified_secs = modified
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let bytes = std::fs::read(path)?;
    let content_hash = hex::encode(Sha256::digest(&bytes));

    Ok(RemoteFile {
        path: relative_path.to_string(),
        content_hash,
        last_modified: modified_secs,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
