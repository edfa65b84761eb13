//! Blob store adapter.
//!
//! Chunks are uploaded as whole directories under one URI prefix. The
//! [`BlobFs`] contract is deliberately small: put a directory, check and
//! list a prefix, delete, and download. There is no partial-success
//! contract on `put` — if any file fails the whole call fails and the
//! caller retries or cleans up.

pub mod local;
pub mod s3;

pub use local::LocalBlobFs;
pub use s3::S3BlobFs;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::{Error, Result};

/// A `(scheme, bucket, prefix)` blob address, e.g.
/// `s3://test-s3-bucket/0-30-60-ab12cd34`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobUri {
    pub scheme: String,
    pub bucket: String,
    pub prefix: String,
}

impl BlobUri {
    pub fn new(scheme: &str, bucket: &str, prefix: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| Error::BlobIo(format!("no scheme in blob uri: {uri}")))?;
        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return Err(Error::BlobIo(format!("no bucket in blob uri: {uri}")));
        }
        Ok(Self::new(scheme, bucket, prefix))
    }

    /// Address of an entry directly under this prefix.
    pub fn join(&self, name: &str) -> Self {
        let prefix = if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.prefix)
        };
        Self::new(&self.scheme, &self.bucket, &prefix)
    }
}

impl fmt::Display for BlobUri {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(fmt, "{}://{}", self.scheme, self.bucket)
        } else {
            write!(fmt, "{}://{}/{}", self.scheme, self.bucket, self.prefix)
        }
    }
}

/// Blocking blob store operations.
pub trait BlobFs: Send + Sync {
    /// Upload every regular file under `local_dir` to `uri/`, keeping
    /// relative paths. Fails as a whole on any sub-file failure.
    fn put(&self, uri: &BlobUri, local_dir: &Path) -> Result<()>;

    fn exists(&self, uri: &BlobUri) -> Result<bool>;

    /// Blob URIs under `uri`. Non-recursive listing reports only direct
    /// children.
    fn list(&self, uri: &BlobUri, recursive: bool) -> Result<Vec<String>>;

    /// Delete everything under `uri`.
    fn delete(&self, uri: &BlobUri) -> Result<()>;

    /// Download every blob under `uri` into `local_dir`.
    fn copy_to_local(&self, uri: &BlobUri, local_dir: &Path) -> Result<()>;
}

// Every regular file under `dir`, as paths relative to `dir`, in sorted
// order so uploads are deterministic.
pub(crate) fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    fn walk(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                walk(root, &path, files)?;
            } else if path.is_file() {
                let relative = path
                    .strip_prefix(root)
                    .map_err(|err| Error::BlobIo(err.to_string()))?;
                files.push(relative.to_path_buf());
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(dir, dir, &mut files)?;
    files.sort();
    Ok(files)
}
