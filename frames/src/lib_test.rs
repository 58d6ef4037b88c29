use super::*;

fn sample_frame() -> Frame {
    Frame {
        id: "id-1".to_owned(),
        ts: 42,
        session: Some("TIGER-42".to_owned()),
        from: Some("peer-1".to_owned()),
        syscall: "canvas:updated".to_owned(),
        data: serde_json::json!({
            "x": 1.25,
            "ok": true,
            "tags": ["a", "b"],
            "nested": {"k": "v"},
            "nil": null
        }),
    }
}

#[test]
fn encode_decode_preserves_frame() {
    let frame = sample_frame();
    let bytes = encode_frame(&frame);
    let decoded = decode_frame(&bytes).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn encode_frame_outputs_non_empty_binary() {
    let bytes = encode_frame(&sample_frame());
    assert!(!bytes.is_empty());
}

#[test]
fn decode_frame_rejects_malformed_bytes() {
    let err = decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_frame_rejects_empty_syscall() {
    let wire = WireFrame {
        id: "id-9".to_owned(),
        ts: 1,
        session: None,
        from: None,
        syscall: String::new(),
        data: None,
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let err = decode_frame(&bytes).expect_err("empty syscall should fail");
    assert!(matches!(err, CodecError::MissingSyscall(id) if id == "id-9"));
}

#[test]
fn decode_frame_defaults_missing_data_to_empty_object() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        ts: 1,
        session: None,
        from: None,
        syscall: "progress:request".to_owned(),
        data: None,
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, serde_json::json!({}));
}

#[test]
fn decode_frame_converts_nan_number_to_json_null() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        ts: 1,
        session: None,
        from: None,
        syscall: "canvas:updated".to_owned(),
        data: Some(prost_types::Value {
            kind: Some(prost_types::value::Kind::NumberValue(f64::NAN)),
        }),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, Value::Null);
}

#[test]
fn integral_numbers_come_back_as_json_integers() {
    let frame = Frame {
        data: serde_json::json!({"clock": 7, "index": 0, "offset": -3}),
        ..sample_frame()
    };

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.data.get("clock").and_then(Value::as_u64), Some(7));
    assert_eq!(decoded.data.get("index").and_then(Value::as_u64), Some(0));
    assert_eq!(decoded.data.get("offset").and_then(Value::as_i64), Some(-3));
}

#[test]
fn fractional_numbers_stay_floats() {
    let frame = Frame { data: serde_json::json!({"x": 12.5}), ..sample_frame() };

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.data.get("x"), Some(&serde_json::json!(12.5)));
}

#[test]
fn clock_sized_integers_survive_u64_deserialization() {
    #[derive(Deserialize)]
    struct Payload {
        clock: u64,
    }

    let frame = Frame { data: serde_json::json!({"clock": 1_700_000_000_000_u64}), ..sample_frame() };
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    let payload: Payload = serde_json::from_value(decoded.data).expect("payload");
    assert_eq!(payload.clock, 1_700_000_000_000);
}

#[test]
fn nested_payload_round_trips() {
    let frame = Frame {
        id: "id-nested".to_owned(),
        ts: -99,
        session: None,
        from: None,
        syscall: "canvas:updated".to_owned(),
        data: serde_json::json!({
            "notes": [
                {"note_id": "a", "x": 1.5},
                {"note_id": "b", "x": 2.5}
            ],
            "meta": {"next": null, "label": "z"}
        }),
    };

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded, frame);
}

#[test]
fn prefix_extraction() {
    let frame = Frame { syscall: "join:request".to_owned(), ..sample_frame() };
    assert_eq!(frame.prefix(), "join");

    let frame = Frame { syscall: "noseparator".to_owned(), ..sample_frame() };
    assert_eq!(frame.prefix(), "noseparator");
}

#[test]
fn new_frame_is_unstamped() {
    let frame = Frame::new("presence:heartbeat", serde_json::json!({}));
    assert!(frame.session.is_none());
    assert!(frame.from.is_none());
    assert!(!frame.id.is_empty());
    assert!(frame.ts > 0);
}

#[test]
fn error_frame_carries_code_and_message() {
    let err = CodecError::MissingSyscall("f-1".to_owned());
    let frame = Frame::error_from(&err);
    assert_eq!(frame.syscall, SYSCALL_ERROR);
    assert_eq!(frame.data[FRAME_CODE], "E_FRAME_SYSCALL");
    assert_eq!(frame.data[FRAME_MESSAGE], "frame f-1 has an empty syscall");
    assert_eq!(frame.data[FRAME_RETRYABLE], false);
}
