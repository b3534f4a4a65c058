#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;

use dog_transfer::store::MemoryAdapter;
use dog_transfer::{ByteStream, StorageAdapter, TransferOptions, TransferResult, WriteSink};

/// Per-method call counters
#[derive(Default)]
pub struct Calls {
    pub receive: AtomicUsize,
    pub read: AtomicUsize,
    pub rm: AtomicUsize,
    pub ls: AtomicUsize,
}

impl Calls {
    pub fn total(&self) -> usize {
        self.receive.load(Ordering::SeqCst)
            + self.read.load(Ordering::SeqCst)
            + self.rm.load(Ordering::SeqCst)
            + self.ls.load(Ordering::SeqCst)
    }

    pub fn receives(&self) -> usize {
        self.receive.load(Ordering::SeqCst)
    }
}

/// Memory-backed adapter that records every call
#[derive(Clone, Default)]
pub struct SpyAdapter {
    pub storage: MemoryAdapter,
    pub calls: Arc<Calls>,
    fail_reads: bool,
}

impl SpyAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `read` errors before its first chunk
    pub fn failing_reads() -> Self {
        Self {
            fail_reads: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl StorageAdapter for SpyAdapter {
    fn receive(&self, options: &TransferOptions) -> TransferResult<Box<dyn WriteSink>> {
        self.calls.receive.fetch_add(1, Ordering::SeqCst);
        self.storage.receive(options)
    }

    fn read(&self, fd: &str) -> ByteStream {
        self.calls.read.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
            return Box::pin(futures_util::stream::iter(vec![Err(err)]));
        }
        self.storage.read(fd)
    }

    async fn rm(&self, fd: &str) -> TransferResult<()> {
        self.calls.rm.fetch_add(1, Ordering::SeqCst);
        self.storage.rm(fd).await
    }

    async fn ls(&self, dirpath: &str) -> TransferResult<Vec<String>> {
        self.calls.ls.fetch_add(1, Ordering::SeqCst);
        self.storage.ls(dirpath).await
    }
}

/// Concatenate a byte stream
pub async fn collect_bytes(body: ByteStream) -> Vec<u8> {
    body.map(|chunk| chunk.expect("chunk").to_vec()).concat().await
}
