//! Unit tests for the envelope codec.

use rstest::rstest;
use serde_json::{Value, json};

use super::*;

#[rstest]
#[case::map(json!({"op": "ping", "reqid": 7}))]
#[case::array(json!([1, "two", null]))]
#[case::string(json!("hello"))]
#[case::number(json!(2.5))]
#[case::empty(Value::Null)]
fn envelope_survives_the_codec(#[case] data: Value) {
    let envelope = Envelope::new("p", data);
    let bytes = encode(&envelope).expect("encode");
    let decoded = Envelope::from_value(decode(&bytes).expect("decode"), "").expect("envelope");
    assert_eq!(decoded, envelope);
}

#[rstest]
fn envelope_encodes_as_a_pump_data_map() {
    let bytes = encode(&Envelope::new("reply", json!({"x": 1}))).expect("encode");
    let value = decode(&bytes).expect("decode");
    assert_eq!(value, json!({"pump": "reply", "data": {"x": 1}}));
}

#[rstest]
#[case::not_a_map(json!("text"), &["pump", "data"][..])]
#[case::no_pump(json!({"data": 1}), &["pump"][..])]
#[case::empty_pump(json!({"pump": "", "data": 1}), &["pump"][..])]
#[case::numeric_pump(json!({"pump": 3, "data": 1}), &["pump"][..])]
#[case::no_data(json!({"pump": "p"}), &["data"][..])]
fn malformed_envelopes_name_missing_fields(#[case] value: Value, #[case] expected: &[&str]) {
    let err = Envelope::from_value(value, "body").expect_err("malformed");
    let ProtocolError::MissingFields { missing, preview } = err else {
        panic!("expected MissingFields, got {err}");
    };
    assert_eq!(missing, expected);
    assert_eq!(preview, "body");
}

#[rstest]
fn null_data_is_still_present() {
    let envelope = Envelope::from_value(json!({"pump": "p", "data": null}), "").expect("envelope");
    assert_eq!(envelope.data(), &Value::Null);
}

#[rstest]
#[case(b"hello", 10, "hello")]
#[case(b"hello world", 5, "hello...")]
#[case(b"", 5, "")]
fn previews_are_bounded(#[case] bytes: &[u8], #[case] limit: usize, #[case] expected: &str) {
    assert_eq!(preview(bytes, limit), expected);
}
