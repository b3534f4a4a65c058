use std::path::Path;

use tracing::debug;
use uuid::Uuid;

use crate::deferred::run_callback;
use crate::{SaveAs, StreamMeta, TransferError, TransferOptions, TransferResult};

/// Suffix for generated names when no `extname` is configured
pub const DEFAULT_EXTNAME: &str = ".upload";

/// Compute the storage basename for one incoming stream.
///
/// Literal `save_as` wins, then the callback, then a generated
/// time-ordered id with `extname` (or `.upload`) appended.
pub async fn resolve_basename(options: &TransferOptions, meta: &StreamMeta) -> TransferResult<String> {
    match &options.save_as {
        Some(SaveAs::Literal(basename)) => {
            if basename.is_empty() {
                return Err(TransferError::usage(
                    "Invalid `saveAs`:  If specified as a string, it must not be empty.",
                ));
            }
            Ok(basename.clone())
        }
        Some(SaveAs::Callback(save_as)) => {
            let save_as = save_as.clone();
            let basename = run_callback(|done| {
                save_as(meta, done);
                Ok(())
            })
            .await?;
            if basename.is_empty() {
                return Err(TransferError::usage(format!(
                    "The `saveAs` function triggered its callback, but did not send back a valid string.  Instead, got: {:?}",
                    basename
                )));
            }
            Ok(basename)
        }
        None => {
            let extname = options.extname.as_deref().unwrap_or(DEFAULT_EXTNAME);
            let basename = format!("{}{}", Uuid::now_v7(), extname);
            debug!(basename = %basename, "generated basename");
            Ok(basename)
        }
    }
}

/// Join the basename onto `dirname` when one is configured.
///
/// Leading separators of the basename are dropped first, so an absolute
/// basename still lands under `dirname`.
pub fn resolve_fd(options: &TransferOptions, basename: &str) -> String {
    match options.dirname.as_deref() {
        Some(dirname) if !dirname.is_empty() => {
            let relative = basename.trim_start_matches(|c: char| c == '/' || c == '\\');
            Path::new(dirname).join(relative).to_string_lossy().into_owned()
        }
        _ => basename.to_string(),
    }
}
