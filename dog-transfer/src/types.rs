use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

use crate::{TransferError, TransferResult};

/// Stream of bytes for file content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Stream of already-parsed records (object mode). Never transferable.
pub type ValueStream = Pin<Box<dyn Stream<Item = Result<serde_json::Value, std::io::Error>> + Send>>;

/// Body of a [`FileStream`]
pub enum StreamBody {
    Bytes(ByteStream),
    Objects(ValueStream),
}

/// Response metadata exposed by streams that came from an HTTP response
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    headers: HashMap<String, String>,
}

impl ResponseMeta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header names are case-insensitive
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

/// Advisory hints a producer may attach to a stream
#[derive(Debug, Clone, Default)]
pub struct StreamMeta {
    pub filename: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub response: Option<ResponseMeta>,
}

/// A consumer-supplied readable source, consumed exactly once.
///
/// Besides its body it carries the advisory hints used for sniffing and,
/// once the upload pipeline has named it, the resolved file descriptor.
pub struct FileStream {
    body: Option<StreamBody>,
    readable: bool,
    meta: StreamMeta,
    fd: Option<String>,
    display_name: Option<String>,
}

impl FileStream {
    /// Binary stream
    pub fn new(body: ByteStream) -> Self {
        Self::with_body(Some(StreamBody::Bytes(body)), true)
    }

    /// Stream over an async reader (file, socket, ...)
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::new(Box::pin(ReaderStream::new(reader)))
    }

    /// Stream yielding the given chunks in order
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks: Vec<Result<Bytes, std::io::Error>> =
            chunks.into_iter().map(|c| Ok(c.into())).collect();
        Self::new(Box::pin(futures_util::stream::iter(chunks)))
    }

    /// Stream yielding one chunk
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::from_chunks([data.into()])
    }

    /// Object-mode stream of parsed records
    pub fn from_values(body: ValueStream) -> Self {
        Self::with_body(Some(StreamBody::Objects(body)), true)
    }

    /// A stream that has already ended or been destroyed
    pub fn closed() -> Self {
        Self::with_body(None, false)
    }

    fn with_body(body: Option<StreamBody>, readable: bool) -> Self {
        Self {
            body,
            readable,
            meta: StreamMeta::default(),
            fd: None,
            display_name: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.meta.filename = Some(filename.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.meta.name = Some(name.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.meta.path = Some(path.into());
        self
    }

    pub fn with_response(mut self, response: ResponseMeta) -> Self {
        self.meta.response = Some(response);
        self
    }

    /// Shorthand for a response carrying only a `content-type` header
    pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
        self.with_response(ResponseMeta::new().with_header("content-type", content_type))
    }

    pub fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn can_pipe(&self) -> bool {
        self.body.is_some()
    }

    pub fn is_object_mode(&self) -> bool {
        matches!(self.body, Some(StreamBody::Objects(_)))
    }

    /// Descriptor attached by the upload pipeline
    pub fn fd(&self) -> Option<&str> {
        self.fd.as_deref()
    }

    /// Diagnostic name for logs; never used for storage addressing
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.fd.as_deref())
            .unwrap_or("<unnamed stream>")
    }

    pub(crate) fn attach_fd(&mut self, fd: String) {
        let display = self
            .meta
            .filename
            .iter()
            .chain(self.meta.name.iter())
            .find(|hint| !hint.is_empty())
            .cloned()
            .unwrap_or_else(|| fd.clone());
        self.display_name = Some(display);
        self.fd = Some(fd);
    }

    /// Take the binary body, leaving the stream unreadable
    pub fn take_bytes(&mut self) -> TransferResult<ByteStream> {
        self.readable = false;
        match self.body.take() {
            Some(StreamBody::Bytes(body)) => Ok(body),
            Some(StreamBody::Objects(_)) => Err(TransferError::usage(
                "Invalid stream: object-mode streams cannot be transferred; only binary/string payloads are supported.",
            )),
            None => Err(TransferError::usage(
                "Invalid stream: the stream has no readable body (it may already have been consumed).",
            )),
        }
    }

    /// Replace the body with a wrapped version of itself
    pub(crate) fn map_bytes<F>(&mut self, f: F) -> TransferResult<()>
    where
        F: FnOnce(ByteStream) -> ByteStream,
    {
        let body = self.take_bytes()?;
        self.body = Some(StreamBody::Bytes(f(body)));
        self.readable = true;
        Ok(())
    }
}

impl fmt::Debug for FileStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStream")
            .field("readable", &self.readable)
            .field("can_pipe", &self.can_pipe())
            .field("object_mode", &self.is_object_mode())
            .field("meta", &self.meta)
            .field("fd", &self.fd)
            .finish()
    }
}

/// Byte encodings understood by the drain engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// One char per byte (latin1)
    Raw,
    Utf8,
    Base64,
}

impl Encoding {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "raw" | "binary" | "latin1" => Some(Encoding::Raw),
            "utf8" | "utf-8" => Some(Encoding::Utf8),
            "base64" => Some(Encoding::Base64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Utf8 => "utf8",
            Encoding::Base64 => "base64",
        }
    }
}

/// Best-effort filename and MIME type of a stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SniffResult {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

/// One persisted file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub fd: String,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

/// One fully drained stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainResult {
    #[serde(rename = "contentBytes")]
    pub content: String,
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_stream_is_not_usable() {
        let mut stream = FileStream::closed();
        assert!(!stream.is_readable());
        assert!(!stream.can_pipe());
        assert!(matches!(stream.take_bytes(), Err(err) if err.is_usage()));
    }

    #[test]
    fn taking_the_body_consumes_it() {
        let mut stream = FileStream::from_bytes("abc");
        assert!(stream.take_bytes().is_ok());
        assert!(!stream.is_readable());
        assert!(stream.take_bytes().is_err());
    }

    #[test]
    fn headers_are_case_insensitive() {
        let meta = ResponseMeta::new().with_header("Content-Type", "text/plain");
        assert_eq!(meta.header("content-type"), Some("text/plain"));
    }

    #[test]
    fn display_name_prefers_original_filename() {
        let mut stream = FileStream::from_bytes("x").with_filename("cat.png");
        stream.attach_fd("uploads/123.upload".to_string());
        assert_eq!(stream.fd(), Some("uploads/123.upload"));
        assert_eq!(stream.display_name(), "cat.png");
    }

    #[test]
    fn upload_result_serializes_type_key() {
        let result = UploadResult {
            fd: "a".into(),
            name: "a.txt".into(),
            content_type: "text/plain".into(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "text/plain");
    }
}
