use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::store::DiskAdapter;
use crate::{ByteStream, FileStream, TransferOptions, TransferResult};

/// Storage capability consumed by the transfer core.
///
/// Implementations decide how bytes physically reach a medium. Every method is
/// invoked at most once per operation; the core never caches an adapter.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Open a sink for exactly one incoming stream.
    ///
    /// The stream handed to [`WriteSink::write`] carries its resolved `fd`.
    fn receive(&self, options: &TransferOptions) -> TransferResult<Box<dyn WriteSink>>;

    /// Stream the bytes stored under `fd`.
    ///
    /// A missing or unreadable descriptor surfaces as the first item.
    fn read(&self, fd: &str) -> ByteStream;

    /// Remove a stored object
    async fn rm(&self, fd: &str) -> TransferResult<()>;

    /// List stored descriptors under `dirpath`
    async fn ls(&self, dirpath: &str) -> TransferResult<Vec<String>>;
}

/// One-shot write sink returned by [`StorageAdapter::receive`].
///
/// Accepts one stream, then ends. Resolving `Ok` is the sink's `finish`.
#[async_trait]
pub trait WriteSink: Send {
    async fn write(self: Box<Self>, file: FileStream) -> TransferResult<()>;
}

/// Factory building an adapter from the merged call options
pub type AdapterFactory = Arc<dyn Fn(&TransferOptions) -> TransferResult<Arc<dyn StorageAdapter>> + Send + Sync>;

/// Where the active adapter comes from
#[derive(Clone)]
pub enum AdapterSource {
    Instance(Arc<dyn StorageAdapter>),
    Factory(AdapterFactory),
}

impl AdapterSource {
    pub fn instance<A: StorageAdapter + 'static>(adapter: A) -> Self {
        AdapterSource::Instance(Arc::new(adapter))
    }

    pub fn shared(adapter: Arc<dyn StorageAdapter>) -> Self {
        AdapterSource::Instance(adapter)
    }

    pub fn factory<F>(f: F) -> Self
    where
        F: Fn(&TransferOptions) -> TransferResult<Arc<dyn StorageAdapter>> + Send + Sync + 'static,
    {
        AdapterSource::Factory(Arc::new(f))
    }
}

/// Pick the adapter for one call.
///
/// Factories are invoked with the merged options every time; without any
/// configured adapter the built-in disk adapter rooted at `root` is used.
pub fn resolve_adapter(options: &TransferOptions, root: PathBuf) -> TransferResult<Arc<dyn StorageAdapter>> {
    match &options.adapter {
        Some(AdapterSource::Instance(adapter)) => Ok(adapter.clone()),
        Some(AdapterSource::Factory(factory)) => factory(options),
        None => Ok(Arc::new(DiskAdapter::new(root))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAdapter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn factory_runs_for_every_resolution() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let options = TransferOptions::new().with_adapter_source(AdapterSource::factory(move |_opts| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryAdapter::new()) as Arc<dyn StorageAdapter>)
        }));

        resolve_adapter(&options, PathBuf::from(".")).unwrap();
        resolve_adapter(&options, PathBuf::from(".")).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn instance_is_shared() {
        let memory = Arc::new(MemoryAdapter::new());
        let options = TransferOptions::new().with_adapter_source(AdapterSource::shared(memory.clone()));
        assert_eq!(Arc::strong_count(&memory), 2);
        let resolved = resolve_adapter(&options, PathBuf::from(".")).unwrap();
        assert_eq!(Arc::strong_count(&memory), 3);
        drop(resolved);
        assert_eq!(Arc::strong_count(&memory), 2);
    }
}
