//! # Stream drain and transcoding
//!
//! Two ways of consuming a [`FileStream`]:
//!
//! - [`drain_to_string`] reads the whole stream into one string in the
//!   requested [`Encoding`]. **Memory use is unbounded**: the full encoded
//!   contents are held in memory, so only use it for payloads known to be small.
//! - `forward` wraps a body so it can be piped into an adapter's sink while
//!   remembering the first source error.
//!
//! Block encodings are chunk-boundary safe: leftover bytes that do not fill a
//! block are carried into the next chunk and flushed at the end of the stream.

use std::sync::Arc;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::upstream::verify_readable;
use crate::{ByteStream, Encoding, FileStream, TransferError, TransferResult};

/// Accepts padded and unpadded input alike
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Incremental `from -> to` converter.
///
/// Input bytes are first decoded according to `from` (only base64 changes
/// anything), then the resulting bytes are encoded as `to`.
#[derive(Debug)]
pub struct Transcoder {
    from: Option<Encoding>,
    to: Encoding,
    // base64 text waiting for a full 4-char group
    decode_carry: Vec<u8>,
    // bytes waiting for a full 3-byte block or a complete UTF-8 sequence
    encode_carry: Vec<u8>,
}

impl Transcoder {
    /// `to` falls back to `from`; with neither there is nothing to convert to.
    pub fn new(from: Option<Encoding>, to: Option<Encoding>) -> TransferResult<Self> {
        let to = to.or(from).ok_or_else(|| {
            TransferError::usage(
                "Ambiguous encoding: neither a source nor a target encoding was specified, so there is nothing to convert to.",
            )
        })?;
        Ok(Self {
            from,
            to,
            decode_carry: Vec::new(),
            encode_carry: Vec::new(),
        })
    }

    pub fn target(&self) -> Encoding {
        self.to
    }

    /// Feed one chunk, returning whatever output is complete so far
    pub fn push(&mut self, chunk: &[u8]) -> TransferResult<String> {
        let decoded = self.decode(chunk, false)?;
        Ok(self.encode(&decoded, false))
    }

    /// Flush every carried byte at end of stream
    pub fn finish(&mut self) -> TransferResult<String> {
        let decoded = self.decode(&[], true)?;
        Ok(self.encode(&decoded, true))
    }

    fn decode(&mut self, chunk: &[u8], last: bool) -> TransferResult<Vec<u8>> {
        if self.from != Some(Encoding::Base64) {
            return Ok(chunk.to_vec());
        }

        self.decode_carry
            .extend(chunk.iter().copied().filter(|b| !b.is_ascii_whitespace()));

        let ready = if last {
            let len = self.decode_carry.len();
            if len % 4 == 1 {
                // A lone trailing char cannot encode any byte.
                debug!("ignoring dangling base64 character at end of stream");
                len - 1
            } else {
                len
            }
        } else {
            self.decode_carry.len() / 4 * 4
        };

        let group: Vec<u8> = self.decode_carry.drain(..ready).collect();
        if last {
            self.decode_carry.clear();
        }
        if group.is_empty() {
            return Ok(Vec::new());
        }
        LENIENT_BASE64
            .decode(&group)
            .map_err(|e| TransferError::stream("Could not decode base64 input.", e))
    }

    fn encode(&mut self, bytes: &[u8], last: bool) -> String {
        match self.to {
            Encoding::Raw => bytes.iter().map(|&b| b as char).collect(),
            Encoding::Base64 => {
                self.encode_carry.extend_from_slice(bytes);
                let ready = if last {
                    self.encode_carry.len()
                } else {
                    self.encode_carry.len() / 3 * 3
                };
                let block: Vec<u8> = self.encode_carry.drain(..ready).collect();
                STANDARD.encode(block)
            }
            Encoding::Utf8 => {
                self.encode_carry.extend_from_slice(bytes);
                let keep = if last { 0 } else { incomplete_utf8_tail(&self.encode_carry) };
                let ready = self.encode_carry.len() - keep;
                let text: Vec<u8> = self.encode_carry.drain(..ready).collect();
                String::from_utf8_lossy(&text).into_owned()
            }
        }
    }
}

/// Length of a trailing UTF-8 sequence that may still be completed by more input
fn incomplete_utf8_tail(buf: &[u8]) -> usize {
    for back in 1..=buf.len().min(3) {
        let byte = buf[buf.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = match byte {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if needed > back { back } else { 0 };
    }
    0
}

enum DrainState {
    Idle {
        file: FileStream,
        transcoder: Transcoder,
    },
    Streaming {
        body: ByteStream,
        transcoder: Transcoder,
        out: String,
    },
    Completed(String),
    Failed(TransferError),
}

/// Read a whole stream into one string in the requested encoding.
///
/// Memory grows with the size of the stream; see the module docs.
pub async fn drain_to_string(
    file: FileStream,
    from: Option<Encoding>,
    to: Option<Encoding>,
) -> TransferResult<String> {
    verify_readable(&file)?;
    let transcoder = Transcoder::new(from, to)?;
    let mut state = DrainState::Idle { file, transcoder };

    loop {
        state = match state {
            DrainState::Idle { mut file, transcoder } => match file.take_bytes() {
                Ok(body) => {
                    trace!(stream = %file.display_name(), to = transcoder.target().as_str(), "drain started");
                    DrainState::Streaming {
                        body,
                        transcoder,
                        out: String::new(),
                    }
                }
                Err(err) => DrainState::Failed(err),
            },
            DrainState::Streaming {
                mut body,
                mut transcoder,
                mut out,
            } => match body.next().await {
                Some(Ok(chunk)) => match transcoder.push(&chunk) {
                    Ok(text) => {
                        out.push_str(&text);
                        DrainState::Streaming { body, transcoder, out }
                    }
                    Err(err) => DrainState::Failed(err),
                },
                Some(Err(err)) => DrainState::Failed(TransferError::stream("Stream drain failed.", err)),
                None => match transcoder.finish() {
                    Ok(text) => {
                        out.push_str(&text);
                        DrainState::Completed(out)
                    }
                    Err(err) => DrainState::Failed(err),
                },
            },
            // The body has been dropped by now, so nothing can fire late.
            DrainState::Completed(out) => return Ok(out),
            DrainState::Failed(err) => return Err(err),
        };
    }
}

/// First source error seen while forwarding into a sink
pub(crate) type ErrorSlot = Arc<Mutex<Option<TransferError>>>;

/// Pass chunks through unchanged; on the first error, record it in `slot`,
/// hand the sink an I/O error and stop.
pub(crate) fn forward(mut body: ByteStream, slot: ErrorSlot) -> ByteStream {
    Box::pin(async_stream::stream! {
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => yield Ok(bytes),
                Err(err) => {
                    let message = err.to_string();
                    {
                        let mut first = slot.lock();
                        if first.is_none() {
                            *first = Some(TransferError::stream("Upload stream failed.", err));
                        }
                    }
                    yield Err(std::io::Error::new(std::io::ErrorKind::Other, message));
                    break;
                }
            }
        }
    })
}
