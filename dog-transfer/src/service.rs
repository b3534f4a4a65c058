use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::adapter::resolve_adapter;
use crate::upload::{reservoir, upload_all, upload_one};
use crate::{
    ByteStream, Deferred, DrainResult, FileStream, Incoming, Omen, TransferConfig, TransferError, TransferOptions,
    TransferResult, UploadResult,
};

/// The file transfer service.
///
/// Built once at startup and shared by reference. Every method merges the
/// per-call options over the configured defaults, captures an [`Omen`] at the
/// call site and returns a lazy [`Deferred`].
#[derive(Debug, Clone)]
pub struct Transfers {
    config: Arc<TransferConfig>,
}

impl Transfers {
    /// Validate the configuration and build the service
    pub fn new(config: TransferConfig) -> TransferResult<Self> {
        config.validate()?;
        info!(
            environment = ?config.environment,
            app_path = %config.app_path.display(),
            "file transfers ready"
        );
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    #[track_caller]
    fn omen(&self, entry: &'static str) -> Option<Omen> {
        Omen::capture(entry, self.config.omens_enabled())
    }

    /// Persist every file of an upstream
    #[track_caller]
    pub fn upload(&self, incoming: impl Into<Incoming>, more: TransferOptions) -> Deferred<Vec<UploadResult>> {
        let omen = self.omen("upload");
        let config = self.config.clone();
        let options = config.merged(&more);
        let incoming = incoming.into();
        Deferred::new(omen, async move { upload_all(incoming, options, &config).await })
    }

    /// Persist exactly one file (a plain stream or a single-file upstream)
    #[track_caller]
    pub fn upload_one(&self, incoming: impl Into<Incoming>, more: TransferOptions) -> Deferred<UploadResult> {
        let omen = self.omen("upload_one");
        let config = self.config.clone();
        let options = config.merged(&more);
        let incoming = incoming.into();
        Deferred::new(omen, async move { upload_one(incoming, options, &config).await })
    }

    /// Open a stored file for reading.
    ///
    /// Resolves once the first chunk has arrived, or fails if the adapter
    /// errors before that. Later errors arrive through the returned stream.
    #[track_caller]
    pub fn start_download(&self, fd: impl Into<String>, more: TransferOptions) -> Deferred<FileStream> {
        let omen = self.omen("start_download");
        let config = self.config.clone();
        let options = config.merged(&more);
        let fd = fd.into();
        Deferred::new(omen, async move {
            options.ensure_no_filename()?;
            open_download(&fd, &options, &config).await
        })
    }

    /// Stream a stored file into a new upload.
    ///
    /// The destination adapter is never asked to receive anything if the
    /// source fails before its first chunk.
    #[track_caller]
    pub fn copy(
        &self,
        src_fd: impl Into<String>,
        src_more: TransferOptions,
        dest_more: TransferOptions,
    ) -> Deferred<UploadResult> {
        let omen = self.omen("copy");
        let config = self.config.clone();
        let src_options = config.merged(&src_more);
        let dest_options = config.merged(&dest_more);
        let src_fd = src_fd.into();
        Deferred::new(omen, async move {
            src_options.ensure_no_filename()?;
            dest_options.validate_for_upload()?;

            let file = open_download(&src_fd, &src_options, &config).await?;
            debug!(src = %src_fd, "copy source opened");
            upload_one(file.with_path(src_fd).into(), dest_options, &config).await
        })
    }

    /// Drain every file of the input into memory.
    ///
    /// Holds the full contents of every file in memory at once.
    #[track_caller]
    pub fn reservoir(&self, incoming: impl Into<Incoming>, more: TransferOptions) -> Deferred<Vec<DrainResult>> {
        let omen = self.omen("reservoir");
        let options = self.config.merged(&more);
        let incoming = incoming.into();
        Deferred::new(omen, async move {
            options.ensure_no_filename()?;
            reservoir(incoming, options).await
        })
    }

    /// Remove a stored file
    #[track_caller]
    pub fn rm(&self, fd: impl Into<String>, more: TransferOptions) -> Deferred<()> {
        let omen = self.omen("rm");
        let config = self.config.clone();
        let options = config.merged(&more);
        let fd = fd.into();
        Deferred::new(omen, async move {
            options.ensure_no_filename()?;
            let adapter = resolve_adapter(&options, config.resolve_dirpath(&options))?;
            adapter.rm(&fd).await?;
            info!(fd = %fd, "removed file");
            Ok(())
        })
    }

    /// List stored files under the configured storage root
    #[track_caller]
    pub fn ls(&self) -> Deferred<Vec<String>> {
        let omen = self.omen("ls");
        let config = self.config.clone();
        Deferred::new(omen, async move {
            let options = &config.defaults;
            options.ensure_no_filename()?;
            let dirpath = config.resolve_dirpath(options);
            let adapter = resolve_adapter(options, dirpath.clone())?;
            adapter.ls(&dirpath.to_string_lossy()).await
        })
    }
}

async fn open_download(fd: &str, options: &TransferOptions, config: &TransferConfig) -> TransferResult<FileStream> {
    let adapter = resolve_adapter(options, config.resolve_dirpath(options))?;
    let mut body = adapter.read(fd);

    match body.next().await {
        Some(Ok(first)) => Ok(FileStream::new(prepend(first, body))),
        Some(Err(err)) => Err(TransferError::adapter("Download failed.", err)),
        // Empty file: nothing to race.
        None => Ok(FileStream::new(body)),
    }
}

/// Re-emit `first` ahead of the rest of `body`
fn prepend(first: Bytes, body: ByteStream) -> ByteStream {
    Box::pin(futures_util::stream::once(async move { Ok(first) }).chain(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAdapter;
    use crate::{Environment, ErrorKind};

    fn service(memory: &MemoryAdapter) -> Transfers {
        Transfers::new(TransferConfig::new().with_adapter(memory.clone())).unwrap()
    }

    #[tokio::test]
    async fn download_reattaches_the_first_chunk() {
        let memory = MemoryAdapter::new();
        memory.insert("a.txt", "hello");
        let mut file = service(&memory)
            .start_download("a.txt", TransferOptions::new())
            .await
            .unwrap();

        let body: Vec<u8> = file
            .take_bytes()
            .unwrap()
            .map(|c| c.unwrap().to_vec())
            .concat()
            .await;
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn missing_download_fails_with_context() {
        let memory = MemoryAdapter::new();
        let err = service(&memory)
            .start_download("ghost", TransferOptions::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Adapter);
        assert!(err.message().starts_with("Download failed.  "));
        assert!(err.raw().is_some());
        assert_eq!(err.omen().map(|o| o.entry()), Some("start_download"));
    }

    #[tokio::test]
    async fn omen_points_at_the_caller() {
        let memory = MemoryAdapter::new();
        let transfers = service(&memory);
        let line = line!() + 1;
        let pending = transfers.rm("ghost", TransferOptions::new());
        let err = pending.await.unwrap_err();

        let omen = err.omen().unwrap();
        assert_eq!(omen.entry(), "rm");
        assert_eq!(omen.line(), line);
        assert!(omen.file().ends_with("service.rs"));
    }

    #[tokio::test]
    async fn production_skips_omens() {
        let memory = MemoryAdapter::new();
        let transfers = Transfers::new(
            TransferConfig::new()
                .with_adapter(memory)
                .with_environment(Environment::Production),
        )
        .unwrap();
        let err = transfers.rm("ghost", TransferOptions::new()).await.unwrap_err();
        assert!(err.omen().is_none());
    }

    #[test]
    fn production_without_adapter_refuses_to_start() {
        let err = Transfers::new(TransferConfig::new().with_environment(Environment::Production)).unwrap_err();
        assert!(err.is_usage());
    }

    #[tokio::test]
    async fn copy_tags_the_source_descriptor() {
        let memory = MemoryAdapter::new();
        memory.insert("photos/cat.png", vec![0x89, b'P', b'N', b'G']);
        let copied = service(&memory)
            .copy("photos/cat.png", TransferOptions::new(), TransferOptions::new().with_extname(".png"))
            .await
            .unwrap();

        assert_eq!(copied.name, "cat.png");
        assert_eq!(copied.content_type, "image/png");
        assert!(copied.fd.ends_with(".png"));
        assert_eq!(memory.get(&copied.fd).unwrap(), memory.get("photos/cat.png").unwrap());
    }

    #[tokio::test]
    async fn exec_delivers_to_a_callback() {
        let memory = MemoryAdapter::new();
        memory.insert("x", "1");
        let (tx, rx) = tokio::sync::oneshot::channel();
        let _handle = service(&memory).ls().exec(move |listed| {
            let _ = tx.send(listed);
        });
        assert_eq!(rx.await.unwrap().unwrap(), vec!["x".to_string()]);
    }
}
