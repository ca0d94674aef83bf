//! Unit tests for the newline-delimited line framer.
//!
//! Covers:
//! - a single complete line decodes without its terminator
//! - batched lines in one buffer decode as separate items
//! - a partial line is buffered until its newline arrives
//! - a line beyond the length cap fails the decode instead of allocating
//! - encoding appends the newline delimiter

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use mcp_relay::bridge::codec::{RelayCodec, MAX_LINE_BYTES};
use mcp_relay::AppError;

#[test]
fn single_line_decodes_without_terminator() {
    let mut codec = RelayCodec::new();
    let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"result\":\"pong\",\"id\":1}\n");

    let line = codec
        .decode(&mut buf)
        .expect("decode must succeed for a complete line");

    assert_eq!(
        line,
        Some("{\"jsonrpc\":\"2.0\",\"result\":\"pong\",\"id\":1}".to_owned()),
        "codec must strip the trailing newline"
    );
}

#[test]
fn batched_lines_decode_as_separate_items() {
    let mut codec = RelayCodec::new();
    let raw = concat!(
        "{\"jsonrpc\":\"2.0\",\"result\":1,\"id\":1}\n",
        "{\"jsonrpc\":\"2.0\",\"result\":2,\"id\":2}\n",
    );
    let mut buf = BytesMut::from(raw);

    let first = codec.decode(&mut buf).expect("first decode");
    assert!(first.is_some(), "first line must be decoded");

    let second = codec.decode(&mut buf).expect("second decode");
    assert!(second.is_some(), "second line must be decoded");

    let third = codec.decode(&mut buf).expect("empty buffer decode");
    assert!(third.is_none(), "no further lines must be present");
}

#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = RelayCodec::new();

    let mut buf = BytesMut::from("{\"jsonrpc\":\"2.0\",\"resu");
    let line = codec.decode(&mut buf).expect("partial decode must not error");
    assert!(
        line.is_none(),
        "incomplete line must not be emitted before its newline"
    );

    buf.extend_from_slice(b"lt\":\"pong\",\"id\":1}\n");
    let line = codec.decode(&mut buf).expect("decode after newline");
    assert!(line.is_some(), "complete line must be emitted once terminated");
}

#[test]
fn oversized_line_fails_decode() {
    let mut codec = RelayCodec::new();
    let big = "x".repeat(MAX_LINE_BYTES + 1) + "\n";
    let mut buf = BytesMut::from(big.as_str());

    match codec.decode(&mut buf) {
        Err(AppError::Parse(msg)) => assert!(
            msg.contains("line too long"),
            "error must mention 'line too long', got: {msg}"
        ),
        other => panic!("expected Err(AppError::Parse), got: {other:?}"),
    }
}

#[test]
fn encode_appends_newline() {
    let mut codec = RelayCodec::new();
    let mut dst = BytesMut::new();

    codec
        .encode("{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":1}".to_owned(), &mut dst)
        .expect("encode must succeed");

    assert!(dst.ends_with(b"\n"), "encoded line must end with a newline");
    assert_eq!(dst.iter().filter(|&&b| b == b'\n').count(), 1);
}
