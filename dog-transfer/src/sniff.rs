//! Best-effort filename and MIME type inference.
//!
//! Unknown values come back as empty strings. There is no catch-all type, so
//! callers can tell "sniffing failed" from "generic binary".

use std::path::Path;

use crate::{FileStream, SniffResult, StreamMeta};

/// Sniff a stream's advisory hints. Never fails.
pub fn sniff(file: &FileStream) -> SniffResult {
    sniff_meta(file.meta())
}

pub fn sniff_meta(meta: &StreamMeta) -> SniffResult {
    let name = sniff_name(meta);
    let content_type = meta
        .response
        .as_ref()
        .and_then(|r| r.header("content-type"))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| mime_from_name(&name).map(str::to_string))
        .unwrap_or_default();

    SniffResult { name, content_type }
}

/// Sniff a stream that has just been stored under `fd`.
///
/// The name still comes from the stream's own hints only. When those give no
/// type, the extension of `fd` is looked up instead.
pub fn sniff_stored(meta: &StreamMeta, fd: &str) -> SniffResult {
    let mut sniffed = sniff_meta(meta);
    if sniffed.content_type.is_empty() {
        if let Some(mime) = mime_from_name(fd) {
            sniffed.content_type = mime.to_string();
        }
    }
    sniffed
}

fn sniff_name(meta: &StreamMeta) -> String {
    let hint = |value: &Option<String>| value.as_deref().filter(|v| !v.is_empty()).map(str::to_string);

    hint(&meta.filename)
        .or_else(|| hint(&meta.name))
        .or_else(|| {
            meta.path
                .as_deref()
                .and_then(|p| Path::new(p).file_name())
                .map(|n| n.to_string_lossy().into_owned())
        })
        .unwrap_or_default()
}

/// MIME type keyed by the extension of `name`
pub(crate) fn mime_from_name(name: &str) -> Option<&'static str> {
    mime_guess::from_path(name).first_raw()
}
