// src/core/protocol/utf8.rs

//! Incremental UTF-8 decoding for byte streams whose reads can end in the
//! middle of a character.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Longest UTF-8 sequence; an incomplete tail is always shorter.
const MAX_SEQUENCE_LEN: usize = 4;

/// Drains the decodable text from `buf`, leaving an incomplete trailing
/// sequence in place. Invalid bytes become U+FFFD.
fn take_text(buf: &mut BytesMut) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(buf) {
            Ok(text) => {
                out.push_str(text);
                buf.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&buf[..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        buf.advance(valid + bad);
                    }
                    None => {
                        buf.advance(valid);
                        debug_assert!(buf.len() < MAX_SEQUENCE_LEN);
                        return out;
                    }
                }
            }
        }
    }
}

/// Push-style decoder for callers that receive owned chunks, such as SSH
/// channel data or binary WebSocket frames.
#[derive(Debug, Default)]
pub struct Utf8Chunks {
    pending: BytesMut,
}

impl Utf8Chunks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns the text completed so far, possibly empty.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        take_text(&mut self.pending)
    }

    /// Flushes a held-back partial sequence as U+FFFD once the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = self.pending.split();
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// `Decoder` yielding text chunks; `FramedRead` keeps the partial tail in
/// its buffer between reads.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8ChunkCodec;

impl Decoder for Utf8ChunkCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        let text = take_text(src);
        Ok((!text.is_empty()).then_some(text))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(text) = self.decode(src)? {
            return Ok(Some(text));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}

