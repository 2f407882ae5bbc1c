// tests/unit_utf8_chunks_test.rs

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use unicon::core::protocol::{Utf8ChunkCodec, Utf8Chunks};

#[test]
fn test_split_character_is_held_until_complete() {
    let mut chunks = Utf8Chunks::new();
    assert_eq!(chunks.push(b"caf\xc3"), "caf");
    assert_eq!(chunks.push(b"\xa9\n"), "é\n");
    assert_eq!(chunks.finish(), None);
}

#[test]
fn test_four_byte_character_across_three_reads() {
    let mut chunks = Utf8Chunks::new();
    assert_eq!(chunks.push(b"\xf0\x9f"), "");
    assert_eq!(chunks.push(b"\x98"), "");
    assert_eq!(chunks.push(b"\x80!"), "😀!");
}

#[test]
fn test_invalid_bytes_are_replaced_without_stalling() {
    let mut chunks = Utf8Chunks::new();
    assert_eq!(chunks.push(b"a\xffb"), "a\u{FFFD}b");
    assert_eq!(chunks.push(b"\xc3("), "\u{FFFD}(");
}

#[test]
fn test_truncated_tail_is_flushed_at_end() {
    let mut chunks = Utf8Chunks::new();
    assert_eq!(chunks.push(b"x\xe2\x82"), "x");
    assert_eq!(chunks.finish().as_deref(), Some("\u{FFFD}"));
}

#[test]
fn test_codec_keeps_partial_tail_in_buffer() {
    let mut codec = Utf8ChunkCodec;
    let mut buf = BytesMut::from(&b"ok \xc3"[..]);
    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("ok "));
    assert_eq!(&buf[..], b"\xc3");
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"\xa9");
    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("é"));
    assert!(buf.is_empty());
}

#[test]
fn test_codec_flushes_leftover_at_eof() {
    let mut codec = Utf8ChunkCodec;
    let mut buf = BytesMut::from(&b"\xc3"[..]);
    assert_eq!(
        codec.decode_eof(&mut buf).unwrap().as_deref(),
        Some("\u{FFFD}")
    );
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
}
