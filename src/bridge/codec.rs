//! Line framer for the child's stdio streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving child emitting an unterminated or absurdly large message
//! cannot force unbounded buffering.
//!
//! One newline-terminated UTF-8 line is one complete JSON-RPC message; the
//! codec only frames, it never parses JSON.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted from the child's stdout: 4 MiB.
///
/// MCP tool responses routinely embed file contents, so the cap is generous;
/// a line beyond it fails the decode with [`AppError::Parse`] instead of
/// allocating without bound.
pub const MAX_LINE_BYTES: usize = 4 * 1_048_576;

/// Newline-delimited JSON framer for the child process streams.
///
/// Delegates framing to [`LinesCodec`] capped at [`MAX_LINE_BYTES`].
/// Decode errors carry [`AppError::Parse`] for oversized lines and
/// [`AppError::Io`] for stream-level failures; the length cap applies to
/// decoding only.
#[derive(Debug)]
pub struct RelayCodec(LinesCodec);

impl RelayCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] cap.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for RelayCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RelayCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for RelayCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(err: LinesCodecError) -> AppError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Parse(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
