//! Multi-file upload sources and input classification.
//!
//! An [`Upstream`] is what a multipart parser hands over: a sequence of
//! embedded file streams plus a bulk `upload` capability. Plain
//! [`FileStream`]s are the single-file case. Both arrive as [`Incoming`] and are
//! classified exactly once into a [`Source`].

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::adapter::resolve_adapter;
use crate::basename::{resolve_basename, resolve_fd};
use crate::sniff::sniff_stored;
use crate::{FileStream, TransferError, TransferOptions, TransferResult};

/// Embedded files of an upstream, in emission order
pub type FileEvents = Pin<Box<dyn Stream<Item = TransferResult<FileStream>> + Send>>;

/// Multi-file upload source.
#[async_trait]
pub trait Upstream: Send {
    /// Persist every embedded file.
    ///
    /// The result is loosely typed: a JSON array of objects carrying at least
    /// an `fd` string, and optionally `name`, `filename` and `type`.
    async fn upload(self: Box<Self>, options: TransferOptions) -> TransferResult<Value>;

    /// Hand over the embedded files one by one instead of uploading them
    fn into_files(self: Box<Self>) -> FileEvents;
}

/// Input accepted by the upload and drain operations
pub enum Incoming {
    Upstream(Box<dyn Upstream>),
    Stream(FileStream),
}

impl Incoming {
    pub fn upstream<U: Upstream + 'static>(upstream: U) -> Self {
        Incoming::Upstream(Box::new(upstream))
    }
}

impl From<FileStream> for Incoming {
    fn from(file: FileStream) -> Self {
        Incoming::Stream(file)
    }
}

impl From<Box<dyn Upstream>> for Incoming {
    fn from(upstream: Box<dyn Upstream>) -> Self {
        Incoming::Upstream(upstream)
    }
}

/// Classified input
pub enum Source {
    Upstream(Box<dyn Upstream>),
    Readable(FileStream),
}

/// First probe: does the input carry the bulk upload capability?
///
/// On rejection the plain stream is handed back so the second probe can run.
pub fn verify_upstream(incoming: Incoming) -> Result<Box<dyn Upstream>, (TransferError, FileStream)> {
    match incoming {
        Incoming::Upstream(upstream) => Ok(upstream),
        Incoming::Stream(file) => Err((TransferError::not_an_upstream(), file)),
    }
}

/// Second probe: is it a binary stream we can actually drain?
pub fn verify_readable(file: &FileStream) -> TransferResult<()> {
    let problem = if !file.is_readable() {
        Some("it is not readable (it may have already ended or been consumed)")
    } else if !file.can_pipe() {
        Some("it has no body that can be piped")
    } else if file.is_object_mode() {
        Some("object-mode streams are not supported")
    } else {
        None
    };

    match problem {
        Some(problem) => Err(TransferError::usage(format!(
            "Invalid stream: expected either an upstream or a usable binary readable stream, but {}.",
            problem
        ))),
        None => Ok(()),
    }
}

/// Decide, once, which path an input takes
pub fn classify(incoming: Incoming) -> TransferResult<Source> {
    match verify_upstream(incoming) {
        Ok(upstream) => Ok(Source::Upstream(upstream)),
        Err((not_upstream, file)) => {
            debug!(reason = %not_upstream, "input is not an upstream; checking for a plain stream");
            verify_readable(&file)?;
            Ok(Source::Readable(file))
        }
    }
}

/// Sending half of a [`ChannelUpstream`]
pub type UpstreamSender = mpsc::Sender<TransferResult<FileStream>>;

/// Upstream fed through a tokio channel.
///
/// Whatever produces files (a multipart parser, a directory walker) sends them
/// in; dropping every sender is the end of the upload.
pub struct ChannelUpstream {
    files: ReceiverStream<TransferResult<FileStream>>,
}

impl ChannelUpstream {
    pub fn channel(buffer: usize) -> (UpstreamSender, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            tx,
            Self {
                files: ReceiverStream::new(rx),
            },
        )
    }

    /// Upstream that emits the given files then ends
    pub fn from_files(files: Vec<FileStream>) -> Self {
        let (tx, upstream) = Self::channel(files.len());
        for file in files {
            // Capacity equals the file count, so this never blocks.
            let _ = tx.try_send(Ok(file));
        }
        upstream
    }
}

#[async_trait]
impl Upstream for ChannelUpstream {
    async fn upload(self: Box<Self>, options: TransferOptions) -> TransferResult<Value> {
        let root = options.dirpath.clone().unwrap_or_else(|| "./".to_string());
        let adapter = resolve_adapter(&options, root.into())?;
        let mut files = self.files;
        let mut uploaded = Vec::new();

        while let Some(file) = files.next().await {
            let mut file = file?;
            verify_readable(&file)?;

            let basename = resolve_basename(&options, file.meta()).await?;
            let fd = resolve_fd(&options, &basename);
            file.attach_fd(fd.clone());
            let sniffed = sniff_stored(file.meta(), &fd);

            adapter.receive(&options)?.write(file).await?;
            debug!(fd = %fd, "persisted upstream file");

            uploaded.push(json!({
                "fd": fd,
                "filename": sniffed.name,
                "type": sniffed.content_type,
            }));
        }

        Ok(Value::Array(uploaded))
    }

    fn into_files(self: Box<Self>) -> FileEvents {
        Box::pin(self.files)
    }
}
