// tests/unit_coercion_test.rs

use chrono::{TimeZone, Utc};
use opcua::types::{ByteString, NodeId, UAString, Variant};
use serde_json::json;
use unicon::core::UniconError;
use unicon::core::handlers::opcua::DataType;
use unicon::core::handlers::opcua::coercion::{
    array_variant, coerce_scalar, coerce_variant, parse_data_type,
};
use unicon::core::handlers::opcua::types::variant_data_type;

#[test]
fn test_numeric_strings_coerce_to_integers() {
    assert_eq!(
        coerce_scalar(&json!("42"), DataType::Int32).unwrap(),
        Variant::Int32(42)
    );
    assert_eq!(
        coerce_scalar(&json!(" -7 "), DataType::Int16).unwrap(),
        Variant::Int16(-7)
    );
}

#[test]
fn test_fractional_input_truncates_for_integer_types() {
    assert_eq!(
        coerce_scalar(&json!(3.9), DataType::Int16).unwrap(),
        Variant::Int16(3)
    );
    assert_eq!(
        coerce_scalar(&json!("-2.5"), DataType::Int32).unwrap(),
        Variant::Int32(-2)
    );
}

#[test]
fn test_out_of_range_integer_is_type_mismatch() {
    let err = coerce_scalar(&json!(300), DataType::Byte).unwrap_err();
    assert!(matches!(err, UniconError::TypeMismatch(_)));

    let err = coerce_scalar(&json!(-1), DataType::UInt32).unwrap_err();
    assert!(matches!(err, UniconError::TypeMismatch(_)));
}

#[test]
fn test_non_numeric_string_is_type_mismatch() {
    let err = coerce_scalar(&json!("abc"), DataType::Int32).unwrap_err();
    assert!(matches!(err, UniconError::TypeMismatch(_)));
    assert!(err.to_string().contains("Int32"));
}

#[test]
fn test_non_finite_input_is_rejected() {
    let err = coerce_scalar(&json!("inf"), DataType::Double).unwrap_err();
    assert!(matches!(err, UniconError::TypeMismatch(_)));
    let err = coerce_scalar(&json!("NaN"), DataType::Float).unwrap_err();
    assert!(matches!(err, UniconError::TypeMismatch(_)));
}

#[test]
fn test_64_bit_integers_keep_full_precision() {
    assert_eq!(
        coerce_scalar(&json!(9_007_199_254_740_993_i64), DataType::Int64).unwrap(),
        Variant::Int64(9_007_199_254_740_993)
    );
    assert_eq!(
        coerce_scalar(&json!(u64::MAX), DataType::UInt64).unwrap(),
        Variant::UInt64(u64::MAX)
    );
    assert_eq!(
        coerce_scalar(&json!("18446744073709551615"), DataType::UInt64).unwrap(),
        Variant::UInt64(u64::MAX)
    );
}

#[test]
fn test_boolean_truthiness() {
    assert_eq!(
        coerce_scalar(&json!("TRUE"), DataType::Boolean).unwrap(),
        Variant::Boolean(true)
    );
    assert_eq!(
        coerce_scalar(&json!("yes"), DataType::Boolean).unwrap(),
        Variant::Boolean(false)
    );
    assert_eq!(
        coerce_scalar(&json!(0), DataType::Boolean).unwrap(),
        Variant::Boolean(false)
    );
    assert_eq!(
        coerce_scalar(&json!(2.5), DataType::Boolean).unwrap(),
        Variant::Boolean(true)
    );
}

#[test]
fn test_string_target_stringifies() {
    assert_eq!(
        coerce_scalar(&json!(12), DataType::String).unwrap(),
        Variant::String(UAString::from("12"))
    );
    assert_eq!(
        coerce_scalar(&json!(null), DataType::String).unwrap(),
        Variant::String(UAString::null())
    );
}

#[test]
fn test_date_time_from_rfc3339_and_millis() {
    let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(
        coerce_scalar(&json!("2024-01-01T00:00:00Z"), DataType::DateTime).unwrap(),
        Variant::DateTime(Box::new(opcua::types::DateTime::from(t)))
    );
    assert_eq!(
        coerce_scalar(&json!(t.timestamp_millis()), DataType::DateTime).unwrap(),
        Variant::DateTime(Box::new(opcua::types::DateTime::from(t)))
    );
    assert!(coerce_scalar(&json!("yesterday"), DataType::DateTime).is_err());
}

#[test]
fn test_byte_string_is_base64() {
    assert_eq!(
        coerce_scalar(&json!("aGVsbG8="), DataType::ByteString).unwrap(),
        Variant::ByteString(ByteString::from(b"hello".to_vec()))
    );
    assert!(matches!(
        coerce_scalar(&json!("!!not base64!!"), DataType::ByteString),
        Err(UniconError::TypeMismatch(_))
    ));
}

#[test]
fn test_node_id_target() {
    assert_eq!(
        coerce_scalar(&json!("ns=2;s=Pump.Speed"), DataType::NodeId).unwrap(),
        Variant::NodeId(Box::new("ns=2;s=Pump.Speed".parse::<NodeId>().unwrap()))
    );
}

#[test]
fn test_unsupported_write_type() {
    let err = coerce_scalar(&json!("x"), DataType::Guid).unwrap_err();
    assert!(matches!(err, UniconError::TypeMismatch(_)));
}

#[test]
fn test_array_with_target_type() {
    let variant = coerce_variant(&json!([1, "2", 3.5]), Some(DataType::Double)).unwrap();
    assert_eq!(
        variant,
        array_variant(
            DataType::Double,
            vec![Variant::Double(1.0), Variant::Double(2.0), Variant::Double(3.5)]
        )
    );
}

#[test]
fn test_array_element_failure_fails_whole_array() {
    let err = coerce_variant(&json!([1, "two", 3]), Some(DataType::Int32)).unwrap_err();
    assert!(matches!(err, UniconError::TypeMismatch(_)));
}

#[test]
fn test_inference_without_target() {
    assert_eq!(
        coerce_variant(&json!("12"), None).unwrap(),
        Variant::Int32(12)
    );
    assert_eq!(
        coerce_variant(&json!("3.5"), None).unwrap(),
        Variant::Double(3.5)
    );
    assert_eq!(
        coerce_variant(&json!("hello"), None).unwrap(),
        Variant::String(UAString::from("hello"))
    );
    assert_eq!(
        coerce_variant(&json!(5_000_000_000_i64), None).unwrap(),
        Variant::Double(5_000_000_000.0)
    );
    assert_eq!(
        coerce_variant(&json!(true), None).unwrap(),
        Variant::Boolean(true)
    );
    assert_eq!(
        variant_data_type(&coerce_variant(&json!([1, 2]), None).unwrap()),
        Some(DataType::Int32)
    );
}

#[test]
fn test_parse_data_type_by_name_and_id() {
    assert_eq!(
        parse_data_type(&json!("double")).unwrap(),
        Some(DataType::Double)
    );
    assert_eq!(parse_data_type(&json!(6)).unwrap(), Some(DataType::Int32));
    assert_eq!(parse_data_type(&json!(null)).unwrap(), None);
    assert_eq!(parse_data_type(&json!("")).unwrap(), None);
    assert!(matches!(
        parse_data_type(&json!("Quaternion")),
        Err(UniconError::InvalidParams(_))
    ));
}
