//! Newline-delimited token framing.
//!
//! Bad lines (not an integer, not UTF-8, or longer than the limit) decode to
//! `Err(FrameError)` items rather than codec errors, so a `FramedRead` keeps
//! going past them. Only I/O errors end the stream.

use bytes::{BufMut, BytesMut};
use ring_core::{FrameError, Token, encode_frame, parse_frame};
use std::io;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

/// Longest accepted inbound line. A token needs at most 20 characters.
pub const MAX_FRAME_LENGTH: usize = 1024;

pub struct TokenCodec {
    lines: AnyDelimiterCodec,
    max_length: usize,
}

impl TokenCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\n".to_vec(),
                max_length,
            ),
            max_length,
        }
    }

    fn frame(
        &self,
        chunk: Result<Option<bytes::Bytes>, AnyDelimiterCodecError>,
    ) -> io::Result<Option<Result<Token, FrameError>>> {
        match chunk {
            Ok(Some(line)) => {
                let frame = std::str::from_utf8(&line)
                    .map_err(|_| FrameError::InvalidUtf8)
                    .and_then(parse_frame);
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            // The inner codec discards the rest of the line on its next call
            Err(AnyDelimiterCodecError::MaxChunkLengthExceeded) => {
                Ok(Some(Err(FrameError::TooLong {
                    limit: self.max_length,
                })))
            }
            Err(AnyDelimiterCodecError::Io(e)) => Err(e),
        }
    }
}

impl Default for TokenCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TokenCodec {
    type Item = Result<Token, FrameError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        let chunk = self.lines.decode(src);
        self.frame(chunk)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<Self::Item>> {
        let chunk = self.lines.decode_eof(src);
        self.frame(chunk)
    }
}

impl Encoder<Token> for TokenCodec {
    type Error = io::Error;

    fn encode(&mut self, token: Token, dst: &mut BytesMut) -> io::Result<()> {
        let frame = encode_frame(token);
        dst.reserve(frame.len() + 1);
        dst.put_slice(frame.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
