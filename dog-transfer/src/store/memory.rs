use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::RwLock;

use crate::{ByteStream, FileStream, StorageAdapter, TransferError, TransferOptions, TransferResult, WriteSink};

const READ_CHUNK_BYTES: usize = 64 * 1024;

/// In-memory adapter with a flat descriptor namespace.
///
/// Clones share the same objects.
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes for `fd`
    pub fn get(&self, fd: &str) -> Option<Bytes> {
        self.objects.read().get(fd).cloned()
    }

    pub fn contains(&self, fd: &str) -> bool {
        self.objects.read().contains_key(fd)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Store bytes directly, bypassing the sink
    pub fn insert(&self, fd: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().insert(fd.into(), data.into());
    }
}

struct MemorySink {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

#[async_trait]
impl WriteSink for MemorySink {
    async fn write(self: Box<Self>, mut file: FileStream) -> TransferResult<()> {
        let fd = file
            .fd()
            .ok_or_else(|| TransferError::usage("Cannot receive a stream without a resolved `fd`."))?
            .to_string();

        let mut body = file.take_bytes()?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| TransferError::adapter(format!("Failed to write `{}`.", fd), e))?;
            buffer.extend_from_slice(&chunk);
        }

        self.objects.write().insert(fd, buffer.freeze());
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn receive(&self, _options: &TransferOptions) -> TransferResult<Box<dyn WriteSink>> {
        Ok(Box::new(MemorySink {
            objects: self.objects.clone(),
        }))
    }

    fn read(&self, fd: &str) -> ByteStream {
        let items: Vec<Result<Bytes, std::io::Error>> = match self.get(fd) {
            Some(data) => (0..data.len())
                .step_by(READ_CHUNK_BYTES)
                .map(|start| Ok(data.slice(start..(start + READ_CHUNK_BYTES).min(data.len()))))
                .collect(),
            None => vec![Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("No file is stored under `{}`.", fd),
            ))],
        };
        Box::pin(futures_util::stream::iter(items))
    }

    async fn rm(&self, fd: &str) -> TransferResult<()> {
        match self.objects.write().remove(fd) {
            Some(_) => Ok(()),
            None => Err(TransferError::adapter(
                "Could not remove file.",
                format!("No file is stored under `{}`.", fd),
            )),
        }
    }

    async fn ls(&self, _dirpath: &str) -> TransferResult<Vec<String>> {
        Ok(self.objects.read().keys().cloned().collect())
    }
}
