use std::fmt;
use std::panic::Location;

/// Marks the public entry point an operation was started from.
///
/// Captured synchronously when a [`Transfers`](crate::Transfers) method is
/// called, so that errors produced deep inside the pipeline still point back
/// at the caller's line rather than at internal plumbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Omen {
    entry: &'static str,
    location: &'static Location<'static>,
}

impl Omen {
    /// Capture the caller of the enclosing `#[track_caller]` function.
    ///
    /// Returns `None` when omens are disabled (production without debug).
    #[track_caller]
    pub fn capture(entry: &'static str, enabled: bool) -> Option<Self> {
        if !enabled {
            return None;
        }
        Some(Self {
            entry,
            location: Location::caller(),
        })
    }

    /// Name of the API operation, e.g. `upload_one`
    pub fn entry(&self) -> &'static str {
        self.entry
    }

    pub fn file(&self) -> &'static str {
        self.location.file()
    }

    pub fn line(&self) -> u32 {
        self.location.line()
    }
}

impl fmt::Display for Omen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}() called at {}:{}:{}",
            self.entry,
            self.location.file(),
            self.location.line(),
            self.location.column()
        )
    }
}
