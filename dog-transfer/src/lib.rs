//! # dog-transfer: Streaming file transfers for DogRS applications
//!
//! `dog-transfer` moves byte streams between upload sources, a pluggable
//! storage adapter and code that needs either a persisted file descriptor or
//! the whole contents as an encoded string.
//!
//! ## Key Features
//!
//! - **Lazy, single-fire operations**: every call returns a [`Deferred`] that is
//!   either awaited or handed a callback, and completes exactly once
//! - **Upstream-aware uploads**: multi-file sources and plain streams go
//!   through the same entry points
//! - **Pluggable storage**: anything implementing [`StorageAdapter`]; disk and
//!   in-memory adapters are built in
//! - **Chunk-safe transcoding**: drain streams to raw, UTF-8 or base64 strings
//!   regardless of how the bytes were chunked
//! - **Call-site diagnostics**: errors carry an [`Omen`] naming the API call
//!   that started them
//!
//! ## Quick Start
//!
//! ```rust
//! use dog_transfer::prelude::*;
//! use dog_transfer::store::MemoryAdapter;
//!
//! # #[tokio::main]
//! # async fn main() -> TransferResult<()> {
//! let storage = MemoryAdapter::new();
//! let transfers = Transfers::new(TransferConfig::new().with_adapter(storage.clone()))?;
//!
//! // Persist one stream under a generated, time-ordered name
//! let file = FileStream::from_bytes("Hello, world!").with_filename("hello.txt");
//! let uploaded = transfers.upload_one(file, TransferOptions::new()).await?;
//! assert_eq!(uploaded.content_type, "text/plain");
//!
//! // Read it back
//! let download = transfers.start_download(&uploaded.fd, TransferOptions::new()).await?;
//! let drained = transfers
//!     .reservoir(download, TransferOptions::new().with_encoding(Encoding::Utf8))
//!     .await?;
//! assert_eq!(drained[0].content, "Hello, world!");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Your Service  │  ← Business logic only
//! ├─────────────────┤
//! │    Transfers    │  ← Naming, routing, draining, omens
//! ├─────────────────┤
//! │  StorageAdapter │  ← Where the bytes physically go
//! └─────────────────┘
//! ```

pub mod adapter;
pub mod basename;
mod config;
mod deferred;
pub mod drain;
mod error;
#[cfg(feature = "tracing-basic")]
pub mod logging;
mod omen;
mod registry;
mod service;
pub mod sniff;
pub mod store;
mod types;
pub mod upload;
pub mod upstream;

// Re-export main types for clean API
pub use adapter::{AdapterFactory, AdapterSource, StorageAdapter, WriteSink};
pub use config::{Environment, SaveAs, SaveAsFn, TransferConfig, TransferOptions, DEFAULT_DIRPATH, ENV_PREFIX};
pub use deferred::{Deferred, Done};
pub use error::{BoxError, ErrorKind, TransferError, TransferResult};
pub use omen::Omen;
pub use registry::TransferRegistry;
pub use service::Transfers;
pub use types::{
    ByteStream, DrainResult, Encoding, FileStream, ResponseMeta, SniffResult, StreamBody, StreamMeta, UploadResult,
    ValueStream,
};
pub use upstream::{ChannelUpstream, Incoming, Upstream, UpstreamSender};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        Deferred, DrainResult, Encoding, FileStream, Incoming, SaveAs, StorageAdapter, TransferConfig, TransferError,
        TransferOptions, TransferResult, Transfers, UploadResult,
    };
}
