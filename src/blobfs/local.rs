//! Filesystem-backed blob store.
//!
//! Buckets are directories under one root and must exist before use, the
//! same contract a real object store enforces. Tests point recovery at a
//! root with (or without) the expected bucket directory to exercise both
//! upload outcomes.

use std::fs;
use std::path::{Path, PathBuf};

use crate::blobfs::{walk_files, BlobFs, BlobUri};
use crate::errors::{Error, Result};

pub struct LocalBlobFs {
    root: PathBuf,
}

impl LocalBlobFs {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn bucket_dir(&self, uri: &BlobUri) -> Result<PathBuf> {
        let bucket = self.root.join(&uri.bucket);
        if !bucket.is_dir() {
            return Err(Error::BlobIo(format!("bucket does not exist: {}", uri.bucket)));
        }
        Ok(bucket)
    }

    fn blob_path(&self, uri: &BlobUri) -> Result<PathBuf> {
        Ok(self.bucket_dir(uri)?.join(&uri.prefix))
    }
}

impl BlobFs for LocalBlobFs {
    fn put(&self, uri: &BlobUri, local_dir: &Path) -> Result<()> {
        let target = self.blob_path(uri)?;
        for relative in walk_files(local_dir)? {
            let destination = target.join(&relative);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(local_dir.join(&relative), destination)?;
        }
        Ok(())
    }

    fn exists(&self, uri: &BlobUri) -> Result<bool> {
        Ok(self.blob_path(uri)?.exists())
    }

    fn list(&self, uri: &BlobUri, recursive: bool) -> Result<Vec<String>> {
        let path = self.blob_path(uri)?;
        if !path.is_dir() {
            return Ok(Vec::new());
        }
        let mut uris = Vec::new();
        if recursive {
            for relative in walk_files(&path)? {
                uris.push(uri.join(&relative.to_string_lossy()).to_string());
            }
        } else {
            let mut names: Vec<String> = fs::read_dir(&path)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().to_string())
                .collect();
            names.sort();
            for name in names {
                uris.push(uri.join(&name).to_string());
            }
        }
        Ok(uris)
    }

    fn delete(&self, uri: &BlobUri) -> Result<()> {
        let path = self.blob_path(uri)?;
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else if path.is_file() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn copy_to_local(&self, uri: &BlobUri, local_dir: &Path) -> Result<()> {
        let source = self.blob_path(uri)?;
        for relative in walk_files(&source)? {
            let destination = local_dir.join(&relative);
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(source.join(&relative), destination)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_bucket(bucket: &str) -> (tempfile::TempDir, LocalBlobFs) {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join(bucket)).unwrap();
        let blobfs = LocalBlobFs::new(root.path());
        (root, blobfs)
    }

    fn chunk_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("segment-0.bin"), b"segment bytes").unwrap();
        fs::write(dir.path().join("chunk.metadata"), b"{}").unwrap();
        dir
    }

    #[test]
    fn put_then_exists_list_and_download() {
        let (_root, blobfs) = store_with_bucket("test-s3-bucket");
        let uri = BlobUri::new("s3", "test-s3-bucket", "chunk-1");
        let chunk = chunk_dir();

        blobfs.put(&uri, chunk.path()).unwrap();
        assert!(blobfs.exists(&uri).unwrap());

        let listed = blobfs.list(&uri, false).unwrap();
        assert_eq!(
            listed,
            vec![
                "s3://test-s3-bucket/chunk-1/chunk.metadata".to_string(),
                "s3://test-s3-bucket/chunk-1/segment-0.bin".to_string(),
            ]
        );

        let download = tempfile::tempdir().unwrap();
        blobfs.copy_to_local(&uri, download.path()).unwrap();
        assert_eq!(
            fs::read(download.path().join("segment-0.bin")).unwrap(),
            b"segment bytes"
        );
    }

    #[test]
    fn put_fails_when_bucket_is_missing() {
        let root = tempfile::tempdir().unwrap();
        let blobfs = LocalBlobFs::new(root.path());
        let uri = BlobUri::new("s3", "fakeBucket", "chunk-1");
        let chunk = chunk_dir();

        let err = blobfs.put(&uri, chunk.path()).unwrap_err();
        assert!(matches!(err, Error::BlobIo(_)));
    }

    #[test]
    fn delete_removes_the_prefix() {
        let (_root, blobfs) = store_with_bucket("test-s3-bucket");
        let uri = BlobUri::new("s3", "test-s3-bucket", "chunk-1");
        let chunk = chunk_dir();

        blobfs.put(&uri, chunk.path()).unwrap();
        blobfs.delete(&uri).unwrap();
        assert!(!blobfs.exists(&uri).unwrap());
        assert!(blobfs.list(&uri, true).unwrap().is_empty());
    }
}
