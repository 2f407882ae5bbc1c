// tests/property/coercion_test.rs

//! Property-based tests for OPC UA value coercion and shape checks

use opcua::types::{UAString, Variant};
use proptest::prelude::*;
use serde_json::{Value, json};
use unicon::core::UniconError;
use unicon::core::handlers::opcua::{DataType, NodeMeta};
use unicon::core::handlers::opcua::coercion::{coerce_scalar, coerce_variant, validate_shape};

proptest! {
    #[test]
    fn test_int32_from_number_or_string(i in any::<i32>()) {
        prop_assert_eq!(coerce_scalar(&json!(i), DataType::Int32).unwrap(), Variant::Int32(i));
        prop_assert_eq!(
            coerce_scalar(&json!(i.to_string()), DataType::Int32).unwrap(),
            Variant::Int32(i)
        );
    }

    #[test]
    fn test_64_bit_integers_keep_full_precision(i in any::<i64>(), u in any::<u64>()) {
        prop_assert_eq!(coerce_scalar(&json!(i), DataType::Int64).unwrap(), Variant::Int64(i));
        prop_assert_eq!(
            coerce_scalar(&json!(u.to_string()), DataType::UInt64).unwrap(),
            Variant::UInt64(u)
        );
    }

    #[test]
    fn test_out_of_range_bytes_are_rejected(i in prop_oneof![i64::MIN..0i64, 256i64..i64::MAX]) {
        let err = coerce_scalar(&json!(i), DataType::Byte).unwrap_err();
        prop_assert!(matches!(err, UniconError::TypeMismatch(_)));
    }

    #[test]
    fn test_in_range_bytes_are_accepted(b in any::<u8>()) {
        prop_assert_eq!(coerce_scalar(&json!(b), DataType::Byte).unwrap(), Variant::Byte(b));
    }

    #[test]
    fn test_finite_doubles_survive(f in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
        prop_assert_eq!(coerce_scalar(&json!(f), DataType::Double).unwrap(), Variant::Double(f));
    }

    #[test]
    fn test_words_are_not_numbers(word in "[a-zA-Z]{1,12}") {
        let value = Value::String(word);
        prop_assert!(coerce_scalar(&value, DataType::Int32).is_err());
        prop_assert!(coerce_scalar(&value, DataType::Double).is_err());
    }

    #[test]
    fn test_strings_pass_through_unchanged(s in ".{0,64}") {
        prop_assert_eq!(
            coerce_scalar(&Value::String(s.clone()), DataType::String).unwrap(),
            Variant::String(UAString::from(s))
        );
    }

    #[test]
    fn test_typed_arrays_keep_length(items in prop::collection::vec(any::<i16>(), 0..32)) {
        let variant = coerce_variant(&json!(items), Some(DataType::Int16)).unwrap();
        match variant {
            Variant::Array(array) => prop_assert_eq!(array.values.len(), items.len()),
            other => prop_assert!(false, "expected an array, got {:?}", other),
        }
    }

    #[test]
    fn test_scalar_nodes_reject_every_array(items in prop::collection::vec(any::<i32>(), 0..8)) {
        let meta = NodeMeta::scalar(Some(DataType::Int32));
        let err = validate_shape(&json!(items), &meta).unwrap_err();
        prop_assert!(matches!(err, UniconError::ShapeMismatch(_)));
    }

    #[test]
    fn test_fixed_length_arrays(len in 1u32..16, actual in 0usize..20) {
        let meta = NodeMeta::array(Some(DataType::Double), vec![len]);
        let value = json!(vec![0.5; actual]);
        prop_assert_eq!(validate_shape(&value, &meta).is_ok(), actual == len as usize);
    }
}
