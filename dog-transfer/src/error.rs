use thiserror::Error;

use crate::omen::Omen;

/// Result type for transfer operations
pub type TransferResult<T> = Result<T, TransferError>;

/// Boxed error carried as the `raw` payload of a wrapped failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad classes of transfer failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller broke the contract before any I/O began.
    Usage,
    /// Internal signal: the input has no bulk upload capability.
    NotAnUpstream,
    /// A single-file operation received an upstream with several files.
    TooManyFiles,
    /// A single-file operation received an upstream with no files at all.
    NoFiles,
    /// The storage collaborator failed (write, read, remove, list).
    Adapter,
    /// A source or transform stage failed mid-transfer.
    Stream,
    Internal,
}

impl ErrorKind {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Usage => "E_USAGE",
            ErrorKind::NotAnUpstream => "E_NOT_AN_UPSTREAM",
            ErrorKind::TooManyFiles => "E_TOO_MANY_FILES",
            ErrorKind::NoFiles => "E_NO_FILES",
            ErrorKind::Adapter => "E_ADAPTER",
            ErrorKind::Stream => "E_STREAM",
            ErrorKind::Internal => "E_INTERNAL",
        }
    }
}

/// Error surfaced by every transfer operation.
///
/// The message is a full sentence meant for humans. The wrapped collaborator
/// error, if any, stays reachable through [`TransferError::raw`] and
/// `std::error::Error::source`.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct TransferError {
    kind: ErrorKind,
    message: String,
    #[source]
    raw: Option<BoxError>,
    omen: Option<Omen>,
}

impl TransferError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw: None,
            omen: None,
        }
    }

    /// Attach the original collaborator error
    pub fn with_raw<E>(mut self, raw: E) -> Self
    where
        E: Into<BoxError>,
    {
        self.raw = Some(raw.into());
        self
    }

    /// Tag the error with the API entry point it surfaced through.
    ///
    /// An existing omen is kept: the outermost public call tags first.
    pub fn with_omen(mut self, omen: Option<Omen>) -> Self {
        if self.omen.is_none() {
            self.omen = omen;
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn raw(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.raw.as_deref()
    }

    pub fn omen(&self) -> Option<&Omen> {
        self.omen.as_ref()
    }

    pub fn is_usage(&self) -> bool {
        self.kind == ErrorKind::Usage
    }

    // ---- Constructors ----

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    pub fn not_an_upstream() -> Self {
        Self::new(
            ErrorKind::NotAnUpstream,
            "Not an upstream: the provided input does not expose a bulk `upload` capability.",
        )
    }

    pub fn too_many_files(count: usize) -> Self {
        Self::new(
            ErrorKind::TooManyFiles,
            format!(
                "Too many files!  .upload_one() expected the upstream to contain exactly one file upload, but instead it contained {}.",
                count
            ),
        )
    }

    pub fn no_files() -> Self {
        Self::new(
            ErrorKind::NoFiles,
            ".upload_one() expected the upstream to contain exactly one file upload, but it did not contain any.",
        )
    }

    /// Wrap a storage collaborator failure with context
    pub fn adapter<E>(context: impl Into<String>, raw: E) -> Self
    where
        E: Into<BoxError>,
    {
        let raw = raw.into();
        Self::new(ErrorKind::Adapter, format!("{}  {}", context.into(), raw)).with_raw(raw)
    }

    /// Wrap a mid-transfer stream failure
    pub fn stream<E>(context: impl Into<String>, raw: E) -> Self
    where
        E: Into<BoxError>,
    {
        let raw = raw.into();
        Self::new(ErrorKind::Stream, format!("{}  {}", context.into(), raw)).with_raw(raw)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::adapter("Storage I/O failed.", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn codes_are_stable() {
        assert_eq!(TransferError::not_an_upstream().code(), "E_NOT_AN_UPSTREAM");
        assert_eq!(TransferError::too_many_files(2).code(), "E_TOO_MANY_FILES");
        assert_eq!(TransferError::usage("bad").code(), "E_USAGE");
    }

    #[test]
    fn stream_error_keeps_raw_payload() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "socket closed");
        let err = TransferError::stream("Stream drain failed.", io);

        assert_eq!(err.kind(), ErrorKind::Stream);
        assert!(err.message().contains("socket closed"));
        let raw = err.raw().unwrap();
        assert_eq!(raw.to_string(), "socket closed");
        assert!(err.source().is_some());
    }

    #[test]
    fn too_many_files_echoes_count() {
        let err = TransferError::too_many_files(3);
        assert!(err.to_string().contains("contained 3"));
    }
}
