use bson::DateTime;
use bson::oid::ObjectId;
use serde_json::json;

use super::*;
use crate::error::FormatError;

const FORMS: [Form; 2] = [Form::Text, Form::Binary];

fn sample_values() -> Vec<Value> {
    let oid = ObjectId::parse_str("65705d84dfc3f3b5094e1f72").unwrap();
    let mut nested = Document::new();
    nested.insert("city", "Oslo");
    nested.insert("zip", Value::Null);

    vec![
        Value::Null,
        Value::Boolean(true),
        Value::Boolean(false),
        Value::Integer(0),
        Value::Integer(i64::MIN),
        Value::Integer(i64::MAX),
        Value::Float(0.25),
        Value::Float(-0.0),
        Value::Float(1e300),
        Value::Float(f64::NAN),
        Value::Float(f64::INFINITY),
        Value::Float(f64::NEG_INFINITY),
        Value::String(String::new()),
        Value::String("héllo \"quoted\" \n newline".into()),
        Value::Binary(BinaryBlob {
            subtype: 0,
            bytes: vec![],
        }),
        Value::Binary(BinaryBlob {
            subtype: 0x80,
            bytes: vec![0, 1, 2, 255],
        }),
        Value::DateTime(DateTime::from_millis(1701862788373)),
        Value::DateTime(DateTime::from_millis(0)),
        Value::DateTime(DateTime::from_millis(-86_400_000)),
        Value::DateTime(DateTime::from_millis(i64::MAX)),
        Value::ObjectId(oid),
        Value::Regex(RegexValue {
            pattern: "^a.*z$".into(),
            options: "im".into(),
        }),
        Value::Array(vec![]),
        Value::Array(vec![Value::Integer(1), "two".into(), Value::Null]),
        Value::Document(Document::new()),
        Value::Document(nested),
    ]
}

fn nested_arrays(levels: usize) -> Value {
    let mut value = Value::Integer(1);
    for _ in 0..levels {
        value = Value::Array(vec![value]);
    }
    value
}

#[test]
fn test_every_value_round_trips_in_both_forms() {
    let codec = ValueCodec::default();
    for form in FORMS {
        for value in sample_values() {
            let bytes = codec.encode(&value, form).unwrap();
            let decoded = codec.decode(&bytes, form).unwrap();
            assert_eq!(decoded, value, "{form} round trip of {value:?}");
            assert_eq!(decoded.tag(), value.tag());
        }
    }
}

#[test]
fn test_every_tag_is_covered_by_samples() {
    let tags: Vec<TypeTag> = sample_values().iter().map(Value::tag).collect();
    for tag in TypeTag::ALL {
        assert!(tags.contains(&tag), "no sample for {tag}");
    }
}

#[test]
fn test_document_field_order_survives() {
    let codec = ValueCodec::default();
    let doc: Document = [
        ("zeta", Value::Integer(1)),
        ("alpha", Value::Integer(2)),
        ("mid", Value::Integer(3)),
    ]
    .into_iter()
    .collect();

    for form in FORMS {
        let bytes = codec.encode_document(&doc, form).unwrap();
        let back = codec.decode_document(&bytes, form).unwrap();
        assert_eq!(back.keys().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
    }
}

#[test]
fn test_dollar_keys_are_not_read_as_tags() {
    let codec = ValueCodec::default();
    let mut inner = Document::new();
    inner.insert("$oid", "not an id");
    let mut doc = Document::new();
    doc.insert("filter", inner.clone());

    let json = codec.document_to_json(&doc).unwrap();
    assert_eq!(json["filter"], json!({ "$document": { "$oid": "not an id" } }));

    let back = codec.document_from_json(&json).unwrap();
    assert_eq!(back.get("filter"), Some(&Value::Document(inner)));
}

#[test]
fn test_text_form_uses_extended_json_tags() {
    let codec = ValueCodec::default();
    let oid = ObjectId::parse_str("65705d84dfc3f3b5094e1f72").unwrap();

    assert_eq!(
        codec.to_json(&Value::ObjectId(oid)).unwrap(),
        json!({ "$oid": "65705d84dfc3f3b5094e1f72" })
    );
    assert_eq!(
        codec
            .to_json(&Value::DateTime(DateTime::from_millis(1701862788373)))
            .unwrap(),
        json!({ "$date": "2023-12-06T11:39:48.373Z" })
    );
    assert_eq!(
        codec
            .to_json(&Value::DateTime(DateTime::from_millis(-1)))
            .unwrap(),
        json!({ "$date": { "$numberLong": "-1" } })
    );
    assert_eq!(
        codec
            .to_json(&Value::Binary(BinaryBlob {
                subtype: 4,
                bytes: vec![1, 2, 3]
            }))
            .unwrap(),
        json!({ "$binary": { "base64": "AQID", "subType": "04" } })
    );
    assert_eq!(
        codec.to_json(&Value::Float(f64::NAN)).unwrap(),
        json!({ "$numberDouble": "NaN" })
    );
}

#[test]
fn test_legacy_extended_json_is_accepted() {
    let codec = ValueCodec::default();

    let regex = codec
        .from_json(&json!({ "$regex": "^a", "$options": "i" }))
        .unwrap();
    assert_eq!(
        regex,
        Value::Regex(RegexValue {
            pattern: "^a".into(),
            options: "i".into()
        })
    );

    let blob = codec
        .from_json(&json!({ "$binary": "AQID", "$type": "05" }))
        .unwrap();
    assert_eq!(
        blob,
        Value::Binary(BinaryBlob {
            subtype: 5,
            bytes: vec![1, 2, 3]
        })
    );

    assert_eq!(
        codec.from_json(&json!({ "$numberLong": "42" })).unwrap(),
        Value::Integer(42)
    );
    assert_eq!(
        codec.from_json(&json!({ "$date": 1000 })).unwrap(),
        Value::DateTime(DateTime::from_millis(1000))
    );
}

#[test]
fn test_unknown_text_tag_fails() {
    let codec = ValueCodec::default();
    let err = codec.from_json(&json!({ "$mystery": 1 })).unwrap_err();
    assert_eq!(err, FormatError::UnknownTag("$mystery".into()));
}

#[test]
fn test_unknown_binary_tag_fails() {
    let codec = ValueCodec::default();
    let err = codec.decode(&[0x7f, 0, 0, 0, 0], Form::Binary).unwrap_err();
    assert!(matches!(err, FormatError::UnknownTag(_)));
}

#[test]
fn test_length_prefix_beyond_buffer_fails() {
    let codec = ValueCodec::default();
    // String tag claiming a 1 GiB payload followed by three bytes.
    let bytes = [TypeTag::String.code(), 0, 0, 0, 0x40, b'a', b'b', b'c'];
    let err = codec.decode(&bytes, Form::Binary).unwrap_err();
    assert!(matches!(err, FormatError::Truncated { .. }));

    // Array claiming u32::MAX elements.
    let bytes = [TypeTag::Array.code(), 0xff, 0xff, 0xff, 0xff];
    let err = codec.decode(&bytes, Form::Binary).unwrap_err();
    assert!(matches!(err, FormatError::Truncated { .. }));
}

#[test]
fn test_truncated_binary_fails_at_every_cut() {
    let codec = ValueCodec::default();
    let mut doc = Document::new();
    doc.insert("name", "Ada");
    doc.insert("tags", Value::Array(vec!["x".into(), "y".into()]));
    let bytes = codec.encode_document(&doc, Form::Binary).unwrap();

    for cut in 0..bytes.len() {
        assert!(
            codec.decode(&bytes[..cut], Form::Binary).is_err(),
            "prefix of {cut} bytes decoded"
        );
    }
}

#[test]
fn test_trailing_bytes_are_rejected() {
    let codec = ValueCodec::default();
    let mut bytes = codec.encode(&Value::Integer(5), Form::Binary).unwrap();
    bytes.push(0);
    assert!(matches!(
        codec.decode(&bytes, Form::Binary),
        Err(FormatError::InvalidPayload(_))
    ));
}

#[test]
fn test_depth_ceiling_applies_to_encode_and_decode() {
    let shallow = ValueCodec::new(5);
    let deep = ValueCodec::new(50);
    let value = nested_arrays(10);

    for form in FORMS {
        assert_eq!(
            shallow.encode(&value, form).unwrap_err(),
            FormatError::DepthExceeded(5)
        );

        let bytes = deep.encode(&value, form).unwrap();
        assert_eq!(
            shallow.decode(&bytes, form).unwrap_err(),
            FormatError::DepthExceeded(5)
        );
        assert_eq!(deep.decode(&bytes, form).unwrap(), value);
    }
}

#[test]
fn test_depth_ceiling_is_inclusive() {
    let codec = ValueCodec::new(3);
    for form in FORMS {
        assert!(codec.encode(&nested_arrays(3), form).is_ok());
        assert!(codec.encode(&nested_arrays(4), form).is_err());
    }
}

#[test]
fn test_deep_dollar_documents_decode_within_ceiling() {
    let codec = ValueCodec::new(MAX_DEPTH_LIMIT);
    let mut doc = Document::new();
    doc.insert("$leaf", 1i64);
    for _ in 1..200 {
        let mut outer = Document::new();
        outer.insert("$next", doc);
        doc = outer;
    }

    let bytes = codec.encode_document(&doc, Form::Text).unwrap();
    assert_eq!(codec.decode_document(&bytes, Form::Text).unwrap(), doc);
}

#[test]
fn test_runaway_nesting_fails_before_parsing() {
    let codec = ValueCodec::default();
    let mut bytes = vec![b'['; 100_000];
    bytes.extend(std::iter::repeat_n(b']', 100_000));
    assert_eq!(
        codec.decode(&bytes, Form::Text).unwrap_err(),
        FormatError::DepthExceeded(DEFAULT_MAX_DEPTH)
    );

    // Brackets inside strings do not count.
    let quoted = format!("\"{}\"", "[".repeat(1000));
    assert!(codec.decode(quoted.as_bytes(), Form::Text).is_ok());
}

/// Deterministic xorshift sequence of finite doubles spread over every
/// exponent.
fn random_finite_floats(count: usize) -> Vec<f64> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let f = f64::from_bits(state);
        if f.is_finite() {
            out.push(f);
        }
    }
    out
}

#[test]
fn test_random_floats_round_trip_exactly() {
    let codec = ValueCodec::default();
    for f in random_finite_floats(50_000) {
        let value = Value::Float(f);
        for form in FORMS {
            let bytes = codec.encode(&value, form).unwrap();
            assert_eq!(
                codec.decode(&bytes, form).unwrap(),
                value,
                "{form} round trip of {f:e} ({:016x})",
                f.to_bits()
            );
        }
    }
}

#[test]
fn test_nan_bit_patterns_survive_text_form() {
    let codec = ValueCodec::default();
    let payload = f64::from_bits(0x7ff0_0000_0000_0001);
    for f in [-f64::NAN, payload, f64::NAN] {
        let value = Value::Float(f);
        for form in FORMS {
            let bytes = codec.encode(&value, form).unwrap();
            match codec.decode(&bytes, form).unwrap() {
                Value::Float(back) => assert_eq!(back.to_bits(), f.to_bits(), "{form}"),
                other => panic!("decoded {other:?}"),
            }
        }
    }

    assert_eq!(
        codec.to_json(&Value::Float(-f64::NAN)).unwrap(),
        json!({ "$numberDouble": "NaN:fff8000000000000" })
    );
    assert_eq!(
        codec.to_json(&Value::Float(f64::NAN)).unwrap(),
        json!({ "$numberDouble": "NaN" })
    );
    assert!(
        codec
            .from_json(&json!({ "$numberDouble": "NaN:3ff0000000000000" }))
            .is_err()
    );
}

#[test]
fn test_oversized_integer_text_fails() {
    let codec = ValueCodec::default();
    let err = codec
        .decode(b"18446744073709551615", Form::Text)
        .unwrap_err();
    assert!(matches!(err, FormatError::InvalidPayload(_)));
}

#[test]
fn test_decode_document_rejects_scalars() {
    let codec = ValueCodec::default();
    for form in FORMS {
        let bytes = codec.encode(&Value::Integer(1), form).unwrap();
        assert!(codec.decode_document(&bytes, form).is_err());
    }
}

#[test]
fn test_form_parsing() {
    assert_eq!("text".parse::<Form>().unwrap(), Form::Text);
    assert_eq!("JSON".parse::<Form>().unwrap(), Form::Text);
    assert_eq!("bin".parse::<Form>().unwrap(), Form::Binary);
    assert!("xml".parse::<Form>().is_err());
    assert_eq!(Form::Binary.to_string(), "binary");
}
