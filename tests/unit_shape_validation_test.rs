// tests/unit_shape_validation_test.rs

use opcua::types::{DataValue, NodeId, StatusCode, Variant};
use serde_json::json;
use unicon::core::UniconError;
use unicon::core::handlers::opcua::{DataType, NodeMeta};
use unicon::core::handlers::opcua::coercion::{
    RANK_ANY, RANK_SCALAR_OR_ONE_DIMENSION, array_variant, validate_shape,
};

fn good(value: Variant) -> DataValue {
    DataValue {
        value: Some(value),
        status: Some(StatusCode::Good),
        ..Default::default()
    }
}

fn unreadable() -> DataValue {
    DataValue {
        status: Some(StatusCode::BadUnexpectedError),
        ..Default::default()
    }
}

fn meta(rank: i32, dims: Vec<u32>) -> NodeMeta {
    NodeMeta {
        data_type: Some(DataType::Int32),
        value_rank: rank,
        array_dimensions: dims,
    }
}

#[test]
fn test_scalar_variable_rejects_array() {
    let err = validate_shape(&json!([1, 2]), &NodeMeta::scalar(Some(DataType::Int32))).unwrap_err();
    assert_eq!(
        err,
        UniconError::ShapeMismatch("BadTypeMismatch: scalar expected".into())
    );
}

#[test]
fn test_scalar_variable_accepts_scalar() {
    assert!(validate_shape(&json!(5), &NodeMeta::scalar(Some(DataType::Int32))).is_ok());
    assert!(validate_shape(&json!("5"), &NodeMeta::scalar(None)).is_ok());
}

#[test]
fn test_array_variable_rejects_scalar() {
    let err = validate_shape(&json!(5), &NodeMeta::array(Some(DataType::Int32), vec![3])).unwrap_err();
    assert_eq!(
        err,
        UniconError::ShapeMismatch("BadTypeMismatch: array expected".into())
    );
}

#[test]
fn test_fixed_length_is_enforced() {
    let m = NodeMeta::array(Some(DataType::Int32), vec![3]);
    let err = validate_shape(&json!([1, 2]), &m).unwrap_err();
    assert_eq!(
        err,
        UniconError::ShapeMismatch("BadTypeMismatch: expected length 3".into())
    );
    assert!(validate_shape(&json!([1, 2, 3]), &m).is_ok());
}

#[test]
fn test_unspecified_length_accepts_any_array() {
    let m = NodeMeta::array(Some(DataType::Int32), vec![0]);
    assert!(validate_shape(&json!([]), &m).is_ok());
    assert!(validate_shape(&json!([1, 2, 3, 4, 5]), &m).is_ok());
    assert!(validate_shape(&json!([1]), &meta(1, vec![])).is_ok());
}

#[test]
fn test_flexible_ranks_accept_either_shape() {
    for rank in [RANK_ANY, RANK_SCALAR_OR_ONE_DIMENSION] {
        let m = meta(rank, vec![]);
        assert!(validate_shape(&json!(1), &m).is_ok());
        assert!(validate_shape(&json!([1, 2]), &m).is_ok());
    }
}

#[test]
fn test_multi_dimensional_shapes_pass_through() {
    let m = meta(2, vec![2, 3]);
    assert!(validate_shape(&json!([[1, 2, 3], [4, 5, 6]]), &m).is_ok());
    assert!(validate_shape(&json!([1]), &m).is_ok());
}

#[test]
fn test_shape_check_ignores_element_contents() {
    let m = NodeMeta::scalar(Some(DataType::Int32));
    let err = validate_shape(&json!(["not", "numbers"]), &m).unwrap_err();
    assert!(matches!(err, UniconError::ShapeMismatch(_)));
}

#[test]
fn test_meta_from_attribute_reads() {
    let values = vec![
        good(Variant::NodeId(Box::new(NodeId::new(0, 6u32)))),
        good(Variant::Int32(1)),
        good(array_variant(DataType::UInt32, vec![Variant::UInt32(4)])),
    ];
    let m = NodeMeta::from_attributes(&values);
    assert_eq!(m.data_type, Some(DataType::Int32));
    assert_eq!(m.value_rank, 1);
    assert_eq!(m.array_dimensions, vec![4]);
}

#[test]
fn test_meta_from_unreadable_attributes_defaults_to_scalar() {
    let values = vec![
        unreadable(),
        unreadable(),
        unreadable(),
    ];
    let m = NodeMeta::from_attributes(&values);
    assert_eq!(m, NodeMeta::scalar(None));
}

#[test]
fn test_custom_data_type_is_unknown() {
    let values = vec![
        good(Variant::NodeId(Box::new(NodeId::new(2, 3001u32)))),
        good(Variant::Int32(-1)),
    ];
    let m = NodeMeta::from_attributes(&values);
    assert_eq!(m.data_type, None);
    assert_eq!(m.value_rank, -1);
    assert!(m.array_dimensions.is_empty());
}
