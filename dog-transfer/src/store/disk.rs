use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::{ByteStream, FileStream, StorageAdapter, TransferError, TransferOptions, TransferResult, WriteSink};

/// Local filesystem adapter.
///
/// Relative descriptors resolve under `root`; absolute ones are used as-is.
#[derive(Debug, Clone)]
pub struct DiskAdapter {
    root: PathBuf,
}

impl DiskAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn locate(&self, fd: &str) -> PathBuf {
        locate(&self.root, fd)
    }
}

fn locate(root: &Path, fd: &str) -> PathBuf {
    let path = Path::new(fd);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

struct DiskSink {
    root: PathBuf,
}

impl DiskSink {
    async fn persist(path: &Path, mut body: ByteStream) -> std::io::Result<u64> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl WriteSink for DiskSink {
    async fn write(self: Box<Self>, mut file: FileStream) -> TransferResult<()> {
        let fd = file
            .fd()
            .ok_or_else(|| TransferError::usage("Cannot receive a stream without a resolved `fd`."))?
            .to_string();
        let path = locate(&self.root, &fd);
        let body = file.take_bytes()?;

        match Self::persist(&path, body).await {
            Ok(written) => {
                debug!(fd = %fd, bytes = written, "wrote file to disk");
                Ok(())
            }
            Err(err) => {
                // Partial files are never left behind.
                let _ = tokio::fs::remove_file(&path).await;
                Err(TransferError::adapter(format!("Failed to write `{}`.", fd), err))
            }
        }
    }
}

#[async_trait]
impl StorageAdapter for DiskAdapter {
    fn receive(&self, _options: &TransferOptions) -> TransferResult<Box<dyn WriteSink>> {
        Ok(Box::new(DiskSink {
            root: self.root.clone(),
        }))
    }

    fn read(&self, fd: &str) -> ByteStream {
        let path = self.locate(fd);
        let stream = async_stream::stream! {
            match tokio::fs::File::open(&path).await {
                Ok(file) => {
                    let mut chunks = ReaderStream::new(file);
                    while let Some(chunk) = chunks.next().await {
                        yield chunk;
                    }
                }
                Err(err) => yield Err(err),
            }
        };
        Box::pin(stream)
    }

    async fn rm(&self, fd: &str) -> TransferResult<()> {
        tokio::fs::remove_file(self.locate(fd))
            .await
            .map_err(|e| TransferError::adapter(format!("Could not remove `{}`.", fd), e))
    }

    async fn ls(&self, dirpath: &str) -> TransferResult<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = vec![self.locate(dirpath)];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Nothing has been uploaded there yet.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(TransferError::adapter(
                        format!("Could not list `{}`.", dir.display()),
                        e,
                    ))
                }
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else {
                    found.push(path.to_string_lossy().into_owned());
                }
            }
        }

        found.sort();
        Ok(found)
    }
}
