//! S3 implementation of the blob store adapter.
//!
//! The AWS SDK is async; the rest of the crate is thread-based and
//! blocking, so the adapter owns a current-thread tokio runtime and
//! `block_on`s each call. Individual object uploads are retried a couple
//! of times before the whole `put` is failed.

use std::path::Path;

use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use retry::delay::Fixed;
use tokio::runtime::Runtime;

use crate::blobfs::{walk_files, BlobFs, BlobUri};
use crate::errors::{Error, Result};

const PUT_RETRIES: usize = 3;

pub struct S3BlobFs {
    client: Client,
    rt: Runtime,
}

impl S3BlobFs {
    pub fn new(region: Option<String>) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| Error::BlobIo(format!("building runtime: {err}")))?;

        let shared_config = rt.block_on(async {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region));
            }
            loader.load().await
        });

        Ok(Self {
            client: Client::new(&shared_config),
            rt,
        })
    }

    /// For tests and alternate endpoints (an S3-compatible store).
    pub fn with_client(client: Client) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| Error::BlobIo(format!("building runtime: {err}")))?;
        Ok(Self { client, rt })
    }

    fn keys_under(&self, uri: &BlobUri) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&uri.bucket)
                .prefix(&uri.prefix);
            if let Some(token) = continuation {
                request = request.continuation_token(token);
            }
            let output = self
                .rt
                .block_on(request.send())
                .map_err(|err| Error::BlobIo(format!("listing {uri}: {err}")))?;
            for object in output.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }
}

impl BlobFs for S3BlobFs {
    fn put(&self, uri: &BlobUri, local_dir: &Path) -> Result<()> {
        for relative in walk_files(local_dir)? {
            let key = format!("{}/{}", uri.prefix, relative.to_string_lossy());
            let source = local_dir.join(&relative);
            retry::retry(Fixed::from_millis(500).take(PUT_RETRIES), || {
                self.rt.block_on(async {
                    let body = ByteStream::from_path(&source)
                        .await
                        .map_err(|err| Error::BlobIo(format!("reading {relative:?}: {err}")))?;
                    self.client
                        .put_object()
                        .bucket(&uri.bucket)
                        .key(&key)
                        .body(body)
                        .send()
                        .await
                        .map_err(|err| Error::BlobIo(format!("uploading {key}: {err}")))?;
                    Ok::<(), Error>(())
                })
            })
            .map_err(|err| err.error)?;
        }
        Ok(())
    }

    fn exists(&self, uri: &BlobUri) -> Result<bool> {
        Ok(!self.keys_under(uri)?.is_empty())
    }

    fn list(&self, uri: &BlobUri, recursive: bool) -> Result<Vec<String>> {
        let bucket = BlobUri::new(&uri.scheme, &uri.bucket, "");
        let depth = if uri.prefix.is_empty() {
            0
        } else {
            uri.prefix.split('/').count()
        };
        let mut uris = Vec::new();
        for key in self.keys_under(uri)? {
            if !recursive && key.split('/').count() > depth + 1 {
                continue;
            }
            uris.push(bucket.join(&key).to_string());
        }
        Ok(uris)
    }

    fn delete(&self, uri: &BlobUri) -> Result<()> {
        for key in self.keys_under(uri)? {
            self.rt
                .block_on(
                    self.client
                        .delete_object()
                        .bucket(&uri.bucket)
                        .key(&key)
                        .send(),
                )
                .map_err(|err| Error::BlobIo(format!("deleting {key}: {err}")))?;
        }
        Ok(())
    }

    fn copy_to_local(&self, uri: &BlobUri, local_dir: &Path) -> Result<()> {
        for key in self.keys_under(uri)? {
            let relative = key.strip_prefix(&uri.prefix).unwrap_or(&key);
            let destination = local_dir.join(relative.trim_start_matches('/'));
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let bytes = self
                .rt
                .block_on(async {
                    let output = self
                        .client
                        .get_object()
                        .bucket(&uri.bucket)
                        .key(&key)
                        .send()
                        .await
                        .map_err(|err| Error::BlobIo(format!("downloading {key}: {err}")))?;
                    output
                        .body
                        .collect()
                        .await
                        .map_err(|err| Error::BlobIo(format!("reading {key}: {err}")))
                })?
                .into_bytes();
            std::fs::write(&destination, &bytes)?;
        }
        Ok(())
    }
}
