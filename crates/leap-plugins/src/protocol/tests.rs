//! Unit tests for frame writing and incremental parsing.

use mockall::mock;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;

mock! {
    Sink {}
    impl EnvelopeSink for Sink {
        fn deliver(&mut self, envelope: Envelope);
    }
}

fn framed(envelopes: &[Envelope]) -> Vec<u8> {
    envelopes
        .iter()
        .flat_map(|envelope| frame(envelope).expect("frame"))
        .collect()
}

#[fixture]
fn traffic() -> Vec<Envelope> {
    vec![
        Envelope::new("first", json!({"op": "ping", "reqid": 1})),
        Envelope::new("second", json!("colons: inside: text")),
        Envelope::new("third", json!([1, 2, {"nested": null}])),
        Envelope::new("fourth", Value::Null),
    ]
}

fn collect(parser: &mut FrameParser, source: &mut Vec<u8>, out: &mut Vec<Envelope>) -> usize {
    parser
        .parse(source, &mut |envelope: Envelope| out.push(envelope))
        .expect("well-formed input")
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

#[rstest]
fn frame_prefixes_the_encoded_length() {
    let bytes = frame(&Envelope::new("p", json!(1))).expect("frame");
    let body = br#"{"pump":"p","data":1}"#;
    let mut expected = format!("{}:", body.len()).into_bytes();
    expected.extend_from_slice(body);
    assert_eq!(bytes, expected);
}

#[rstest]
fn frame_rejects_an_empty_pump() {
    let err = frame(&Envelope::new("", json!(1))).expect_err("empty pump");
    assert!(matches!(err, CodecError::EmptyPump));
}

// ---------------------------------------------------------------------------
// Parsing well-formed input
// ---------------------------------------------------------------------------

#[rstest]
fn whole_burst_yields_every_frame(traffic: Vec<Envelope>) {
    let mut source = framed(&traffic);
    let mut parser = FrameParser::default();
    let mut out = Vec::new();

    assert_eq!(collect(&mut parser, &mut source, &mut out), traffic.len());
    assert_eq!(out, traffic);
    assert!(source.is_empty());
    assert_eq!(parser.state(), ParseState::AwaitingLength);
}

#[rstest]
#[case::single_bytes(1)]
#[case::pairs(2)]
#[case::odd(7)]
#[case::large(64)]
fn chunking_does_not_change_the_result(traffic: Vec<Envelope>, #[case] chunk: usize) {
    let wire = framed(&traffic);
    let mut parser = FrameParser::default();
    let mut source = Vec::new();
    let mut out = Vec::new();

    for piece in wire.chunks(chunk) {
        source.extend_from_slice(piece);
        collect(&mut parser, &mut source, &mut out);
    }

    assert_eq!(out, traffic);
}

#[rstest]
fn partial_body_waits_for_more_bytes() {
    let mut source = b"15:hello".to_vec();
    let mut parser = FrameParser::default();
    let mut out = Vec::new();

    assert_eq!(collect(&mut parser, &mut source, &mut out), 0);
    assert_eq!(parser.state(), ParseState::AwaitingBody(15));
    assert_eq!(parser.expected(), Some(15));
    assert_eq!(source, b"hello");
}

#[rstest]
#[case::newline(&b"\n"[..])]
#[case::crlf_and_spaces(&b"\r\n  "[..])]
fn whitespace_between_frames_is_skipped(#[case] separator: &[u8]) {
    let first = Envelope::new("p", json!(1));
    let second = Envelope::new("p", json!(2));
    let mut source = separator.to_vec();
    source.extend(framed(&[first.clone()]));
    source.extend_from_slice(separator);
    source.extend(framed(&[second.clone()]));
    source.extend_from_slice(separator);
    let mut parser = FrameParser::default();
    let mut out = Vec::new();

    assert_eq!(collect(&mut parser, &mut source, &mut out), 2);
    assert_eq!(out, [first, second]);
    assert!(source.is_empty());
    assert_eq!(parser.state(), ParseState::AwaitingLength);
}

#[rstest]
fn bare_digits_wait_for_the_colon() {
    let mut source = b"12".to_vec();
    let mut parser = FrameParser::default();
    let mut out = Vec::new();

    assert_eq!(collect(&mut parser, &mut source, &mut out), 0);
    assert_eq!(parser.state(), ParseState::AwaitingLength);
    assert_eq!(source, b"12");
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

#[rstest]
#[case::letter_in_prefix(&b"5a2:xxxxx"[..])]
#[case::text_line(&b"hello world\n"[..])]
#[case::empty_prefix(&b":{}"[..])]
#[case::endless_digits(&b"123456789012345678901234"[..])]
#[case::negative(&b"-5:xxxxx"[..])]
#[case::space_inside_prefix(&b"1 2:xxxxxxxxxxxx"[..])]
#[case::newline_then_text(&b"\nhello\n"[..])]
fn bad_prefix_fails_once_without_delivery(#[case] input: &[u8]) {
    let mut sink = MockSink::new();
    sink.expect_deliver().never();
    let mut parser = FrameParser::default();
    let mut source = input.to_vec();

    let err = parser.parse(&mut source, &mut sink).expect_err("bad prefix");
    assert!(matches!(err, ProtocolError::BadLengthPrefix { .. }));
    assert_eq!(parser.state(), ParseState::Failed);

    source.extend_from_slice(b"2:{}");
    assert_eq!(parser.parse(&mut source, &mut sink).expect("ignored"), 0);
}

#[rstest]
fn bad_prefix_is_caught_a_byte_at_a_time() {
    let mut sink = MockSink::new();
    sink.expect_deliver().never();
    let mut parser = FrameParser::default();
    let mut source = Vec::new();
    let mut errors = 0_usize;

    for byte in b"5a2:xxxxx" {
        source.push(*byte);
        if parser.parse(&mut source, &mut sink).is_err() {
            errors += 1;
        }
    }

    assert_eq!(errors, 1);
}

#[rstest]
fn undecodable_body_is_bad_body() {
    let mut sink = MockSink::new();
    sink.expect_deliver().never();
    let mut source = b"5:hello".to_vec();

    let err = FrameParser::default()
        .parse(&mut source, &mut sink)
        .expect_err("not json");

    let ProtocolError::BadBody { length, preview, .. } = err else {
        panic!("expected BadBody, got {err}");
    };
    assert_eq!(length, 5);
    assert_eq!(preview, "hello");
}

#[rstest]
fn body_without_pump_is_missing_fields() {
    let mut sink = MockSink::new();
    sink.expect_deliver().never();
    let mut source = b"10:{\"data\":1}".to_vec();

    let err = FrameParser::default()
        .parse(&mut source, &mut sink)
        .expect_err("no pump");

    assert!(matches!(err, ProtocolError::MissingFields { .. }));
}

#[rstest]
fn frames_before_an_error_are_delivered() {
    let mut sink = MockSink::new();
    sink.expect_deliver().times(1).return_const(());
    let mut source = frame(&Envelope::new("ok", json!(1))).expect("frame");
    source.extend_from_slice(b"x:");

    let err = FrameParser::default().parse(&mut source, &mut sink);
    assert!(err.is_err());
}

#[rstest]
fn previews_are_truncated() {
    let mut source = b"abcdefghij".to_vec();
    let err = FrameParser::new(4)
        .parse(&mut source, &mut |_: Envelope| {})
        .expect_err("bad prefix");
    assert_eq!(err.to_string(), "bad length prefix: 'abcd...'");
}
