//! Upload orchestration: classify the input, then either hand it to the
//! upstream's bulk capability or name and persist the single stream.

use futures_util::{StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::adapter::resolve_adapter;
use crate::basename::{resolve_basename, resolve_fd};
use crate::drain::{drain_to_string, forward, ErrorSlot};
use crate::sniff::{sniff, sniff_stored};
use crate::upstream::{classify, Source, Upstream};
use crate::{
    DrainResult, Encoding, FileStream, Incoming, TransferConfig, TransferError, TransferOptions, TransferResult,
    UploadResult,
};

/// How many embedded files of one upstream are drained at the same time
pub const RESERVOIR_CONCURRENCY: usize = 4;

/// Persist exactly one file.
///
/// An upstream must contain exactly one file; any extra files it persisted
/// are left in place.
#[instrument(skip(incoming, options, config))]
pub async fn upload_one(
    incoming: Incoming,
    options: TransferOptions,
    config: &TransferConfig,
) -> TransferResult<UploadResult> {
    options.validate_for_upload()?;

    match classify(incoming)? {
        Source::Upstream(upstream) => {
            let mut uploaded = upload_upstream(upstream, &options, config).await?;
            match uploaded.len() {
                1 => Ok(uploaded.remove(0)),
                0 => Err(TransferError::no_files()),
                count => {
                    warn!(count, "upstream contained more than one file; extra files stay persisted");
                    Err(TransferError::too_many_files(count))
                }
            }
        }
        Source::Readable(file) => upload_readable(file, &options, config).await,
    }
}

/// Persist every file of an upstream, in emission order.
///
/// A plain stream is accepted too and yields a single result.
#[instrument(skip(incoming, options, config))]
pub async fn upload_all(
    incoming: Incoming,
    options: TransferOptions,
    config: &TransferConfig,
) -> TransferResult<Vec<UploadResult>> {
    options.validate_for_upload()?;

    match classify(incoming)? {
        Source::Upstream(upstream) => upload_upstream(upstream, &options, config).await,
        Source::Readable(file) => Ok(vec![upload_readable(file, &options, config).await?]),
    }
}

async fn upload_upstream(
    upstream: Box<dyn Upstream>,
    options: &TransferOptions,
    config: &TransferConfig,
) -> TransferResult<Vec<UploadResult>> {
    let mut bulk = options.clone();
    bulk.dirpath = Some(config.resolve_dirpath(options).to_string_lossy().into_owned());

    let uploaded = upstream.upload(bulk).await?;
    let results = normalize_uploaded(uploaded)?;
    debug!(count = results.len(), "upstream upload finished");
    Ok(results)
}

/// Turn a loosely-typed bulk result into upload results.
///
/// Anything but an array is logged and treated as "no files".
pub fn normalize_uploaded(uploaded: Value) -> TransferResult<Vec<UploadResult>> {
    let items = match uploaded {
        Value::Array(items) => items,
        other => {
            warn!(
                result = %other,
                "bulk upload returned something other than an array; treating it as an empty list"
            );
            return Ok(Vec::new());
        }
    };

    items
        .into_iter()
        .map(|item| {
            let fd = item.get("fd").and_then(Value::as_str).ok_or_else(|| {
                TransferError::adapter(
                    "Malformed bulk upload result.",
                    format!("Expected every item to carry an `fd` string, but got: {}", item),
                )
            })?;
            let text = |key: &str| item.get(key).and_then(Value::as_str).map(str::to_string);

            Ok(UploadResult {
                fd: fd.to_string(),
                name: text("name").or_else(|| text("filename")).unwrap_or_default(),
                content_type: text("type").unwrap_or_default(),
            })
        })
        .collect()
}

async fn upload_readable(
    mut file: FileStream,
    options: &TransferOptions,
    config: &TransferConfig,
) -> TransferResult<UploadResult> {
    let basename = resolve_basename(options, file.meta()).await?;
    let fd = resolve_fd(options, &basename);
    file.attach_fd(fd.clone());

    let adapter = resolve_adapter(options, config.resolve_dirpath(options))?;
    let sink = adapter.receive(options)?;

    let first_error = ErrorSlot::default();
    let slot = first_error.clone();
    file.map_bytes(move |body| forward(body, slot))?;
    let meta = file.meta().clone();
    let display_name = file.display_name().to_string();

    let written = sink.write(file).await;
    // A source failure outranks whatever the sink made of it.
    let source_error = first_error.lock().take();
    if let Some(err) = source_error {
        return Err(err);
    }
    written?;

    let sniffed = sniff_stored(&meta, &fd);
    info!(fd = %fd, file = %display_name, "upload complete");
    Ok(UploadResult {
        fd,
        name: sniffed.name,
        content_type: sniffed.content_type,
    })
}

/// Drain every file of the input into memory.
///
/// The target encoding defaults to base64. Embedded files are drained with
/// bounded concurrency and results keep emission order. The first error to
/// happen wins, whichever file it comes from; the other drains are dropped.
#[instrument(skip(incoming, options))]
pub async fn reservoir(incoming: Incoming, options: TransferOptions) -> TransferResult<Vec<DrainResult>> {
    let to = options.encoding.unwrap_or(Encoding::Base64);

    match classify(incoming)? {
        Source::Readable(file) => Ok(vec![drain_one(file, to).await?]),
        Source::Upstream(upstream) => {
            let mut drained: Vec<(usize, DrainResult)> = upstream
                .into_files()
                .enumerate()
                .map(|(index, file)| {
                    file.map(|file| async move { drain_one(file, to).await.map(|result| (index, result)) })
                })
                .try_buffer_unordered(RESERVOIR_CONCURRENCY)
                .try_collect()
                .await?;

            drained.sort_unstable_by_key(|(index, _)| *index);
            Ok(drained.into_iter().map(|(_, result)| result).collect())
        }
    }
}

async fn drain_one(file: FileStream, to: Encoding) -> TransferResult<DrainResult> {
    let sniffed = sniff(&file);
    let content = drain_to_string(file, None, Some(to)).await?;
    Ok(DrainResult {
        content,
        name: sniffed.name,
        content_type: sniffed.content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAdapter;
    use crate::upstream::ChannelUpstream;
    use crate::{ErrorKind, SaveAs};
    use serde_json::json;
    use tracing_test::traced_test;

    fn memory_config(memory: &MemoryAdapter) -> TransferConfig {
        TransferConfig::new().with_adapter(memory.clone())
    }

    #[tokio::test]
    async fn single_stream_is_named_and_persisted() {
        let memory = MemoryAdapter::new();
        let config = memory_config(&memory);
        let options = config.merged(
            &TransferOptions::new()
                .with_dirname("docs")
                .with_save_as(SaveAs::literal("report.pdf")),
        );

        let file = FileStream::from_chunks(["%PDF", "-1.7"]);
        let result = upload_one(file.into(), options, &config).await.unwrap();

        assert_eq!(result.fd, "docs/report.pdf");
        assert_eq!(result.name, "");
        assert_eq!(memory.get("docs/report.pdf").unwrap(), "%PDF-1.7");
    }

    #[tokio::test]
    async fn source_error_beats_sink_error() {
        let memory = MemoryAdapter::new();
        let config = memory_config(&memory);
        let body: crate::ByteStream = Box::pin(futures_util::stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"abc")),
            Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "client went away")),
        ]));

        let err = upload_one(FileStream::new(body).into(), config.merged(&TransferOptions::new()), &config)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Stream);
        assert!(err.message().contains("client went away"));
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn empty_upstream_has_no_files() {
        let memory = MemoryAdapter::new();
        let config = memory_config(&memory);
        let upstream = Incoming::upstream(ChannelUpstream::from_files(vec![]));

        let err = upload_one(upstream, config.merged(&TransferOptions::new()), &config)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E_NO_FILES");
    }

    #[test]
    fn items_fall_back_to_filename() {
        let results = normalize_uploaded(json!([
            { "fd": "a", "filename": "a.txt", "type": "text/plain" },
            { "fd": "b", "name": "b.png", "filename": "ignored" },
            { "fd": "c" }
        ]))
        .unwrap();

        assert_eq!(results[0].name, "a.txt");
        assert_eq!(results[1].name, "b.png");
        assert_eq!(results[1].content_type, "");
        assert_eq!(results[2].name, "");
    }

    #[test]
    fn items_without_fd_are_adapter_errors() {
        let err = normalize_uploaded(json!([{ "name": "x" }])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Adapter);
    }

    #[traced_test]
    #[test]
    fn non_array_result_degrades_to_empty() {
        let results = normalize_uploaded(json!({ "oops": true })).unwrap();
        assert!(results.is_empty());
        assert!(logs_contain("treating it as an empty list"));
    }

    #[tokio::test]
    async fn reservoir_keeps_emission_order() {
        let upstream = ChannelUpstream::from_files(vec![
            FileStream::from_bytes(vec![b'a'; 50_000]).with_filename("big.txt"),
            FileStream::from_bytes("hi").with_filename("small.txt"),
        ]);
        let drained = reservoir(
            Incoming::upstream(upstream),
            TransferOptions::new().with_encoding(Encoding::Utf8),
        )
        .await
        .unwrap();

        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].name, "big.txt");
        assert_eq!(drained[0].content.len(), 50_000);
        assert_eq!(drained[1].content, "hi");
        assert_eq!(drained[1].content_type, "text/plain");
    }

    #[tokio::test]
    async fn reservoir_reports_the_error_that_happens_first() {
        let stalled: crate::ByteStream = Box::pin(futures_util::stream::pending::<std::io::Result<bytes::Bytes>>());
        let broken: crate::ByteStream = Box::pin(futures_util::stream::iter(vec![Err::<bytes::Bytes, _>(
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "second file broke"),
        )]));
        let upstream = ChannelUpstream::from_files(vec![FileStream::new(stalled), FileStream::new(broken)]);

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            reservoir(Incoming::upstream(upstream), TransferOptions::new()),
        )
        .await
        .expect("reservoir waited on the stalled file");

        let err = outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Stream);
        assert!(err.message().contains("second file broke"));
    }

    #[tokio::test]
    async fn reservoir_defaults_to_base64() {
        let drained = reservoir(FileStream::from_bytes("hello").into(), TransferOptions::new())
            .await
            .unwrap();
        assert_eq!(drained[0].content, "aGVsbG8=");
    }
}
