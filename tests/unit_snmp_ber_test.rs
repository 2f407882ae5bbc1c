// tests/unit_snmp_ber_test.rs

use serde_json::json;
use std::str::FromStr;
use unicon::core::UniconError;
use unicon::core::handlers::snmp::{SetDescriptor, coerce_varbind};
use unicon::core::protocol::snmp::{
    Message, Oid, Pdu, PduType, SnmpValue, SnmpVersion, VarBind, error_status_name,
};

/// GET sysDescr.0, community "public", v2c, request id 1.
const GET_SYS_DESCR: &[u8] = &[
    0x30, 0x26, 0x02, 0x01, 0x01, 0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c', 0xA0, 0x19, 0x02,
    0x01, 0x01, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0E, 0x30, 0x0C, 0x06, 0x08, 0x2B, 0x06,
    0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05, 0x00,
];

fn sys_descr_get() -> Message {
    Message {
        version: SnmpVersion::V2c,
        community: b"public".to_vec(),
        pdu: Pdu::new(
            PduType::Get,
            1,
            vec![VarBind::null(Oid::from_str("1.3.6.1.2.1.1.1.0").unwrap())],
        ),
    }
}

#[test]
fn test_encode_matches_reference_bytes() {
    assert_eq!(sys_descr_get().encode(), GET_SYS_DESCR);
}

#[test]
fn test_decode_reference_bytes() {
    assert_eq!(Message::decode(GET_SYS_DESCR).unwrap(), sys_descr_get());
}

#[test]
fn test_truncated_message_is_a_protocol_error() {
    let err = Message::decode(&GET_SYS_DESCR[..20]).unwrap_err();
    assert!(matches!(err, UniconError::Protocol(_)));
}

#[test]
fn test_response_with_typed_values_survives_the_wire() {
    let base = Oid::from_str("1.3.6.1.4.1.1206.4.2.3.3").unwrap();
    let mut pdu = Pdu::new(
        PduType::Response,
        0x7FFF_0001,
        vec![
            VarBind { oid: base.child(1), value: SnmpValue::Integer(-1) },
            VarBind { oid: base.child(2), value: SnmpValue::Integer(128) },
            VarBind { oid: base.child(3), value: SnmpValue::Counter32(0x8000_0000) },
            VarBind { oid: base.child(4), value: SnmpValue::Counter64(u64::MAX) },
            VarBind { oid: base.child(5), value: SnmpValue::IpAddress([10, 0, 0, 5]) },
            VarBind { oid: base.child(6), value: SnmpValue::OctetString(vec![0xFF; 300]) },
            VarBind { oid: base.child(7), value: SnmpValue::NoSuchInstance },
        ],
    );
    pdu.error_status = 0;
    let message = Message {
        version: SnmpVersion::V1,
        community: b"private".to_vec(),
        pdu,
    };
    assert_eq!(Message::decode(&message.encode()).unwrap(), message);
}

#[test]
fn test_large_arcs_use_base128() {
    let message = Message {
        version: SnmpVersion::V2c,
        community: b"public".to_vec(),
        pdu: Pdu::new(
            PduType::Get,
            1,
            vec![VarBind::null(Oid::from_str("1.3.6.1.4.1.1206").unwrap())],
        ),
    };
    let bytes = message.encode();
    // 1206 = 9 * 128 + 54
    assert!(bytes.windows(2).any(|w| w == [0x89, 0x36]));
}

#[test]
fn test_oid_parsing() {
    let oid = Oid::from_str(".1.3.6.1.2.1.1.5.0").unwrap();
    assert_eq!(oid.to_string(), "1.3.6.1.2.1.1.5.0");
    assert_eq!(oid.child(7).to_string(), "1.3.6.1.2.1.1.5.0.7");
    assert!(oid.starts_with(&Oid::from_str("1.3.6.1.2.1").unwrap()));

    for bad in ["", "1", "1.3.x", "5.1.2", "1..3"] {
        assert!(Oid::from_str(bad).is_err(), "{bad:?} should not parse");
    }
}

#[test]
fn test_oid_ordering_is_lexicographic_by_arc() {
    let a = Oid::from_str("1.3.6.1.2").unwrap();
    let b = Oid::from_str("1.3.6.1.10").unwrap();
    assert!(a < b);
}

#[test]
fn test_error_status_names() {
    assert_eq!(error_status_name(0), "noError");
    assert_eq!(error_status_name(2), "noSuchName");
    assert_eq!(error_status_name(17), "notWritable");
    assert_eq!(error_status_name(99), "unknownError");
}

#[test]
fn test_value_json_rendering() {
    assert_eq!(SnmpValue::OctetString(b"Sign 7".to_vec()).to_json(), json!("Sign 7"));
    assert_eq!(SnmpValue::OctetString(vec![0xC3, 0x28]).to_json(), json!("c328"));
    assert_eq!(SnmpValue::IpAddress([192, 168, 1, 9]).to_json(), json!("192.168.1.9"));
    assert_eq!(SnmpValue::NoSuchObject.to_json(), json!(null));
    assert!(SnmpValue::EndOfMibView.is_exception());
}

fn descriptor(oid: &str, value_type: &str, value: serde_json::Value) -> SetDescriptor {
    SetDescriptor {
        oid: oid.into(),
        value_type: value_type.into(),
        value,
    }
}

#[test]
fn test_coerce_varbind_by_type_name() {
    let vb = coerce_varbind(&descriptor("1.3.6.1.2.1.1.5.0", "OctetString", json!("sign-7"))).unwrap();
    assert_eq!(vb.value, SnmpValue::OctetString(b"sign-7".to_vec()));

    let vb = coerce_varbind(&descriptor("1.3.6.1.2.1.1.5.0", "gauge32", json!("42"))).unwrap();
    assert_eq!(vb.value, SnmpValue::Gauge32(42));

    let vb = coerce_varbind(&descriptor("1.3.6.1.2.1.1.5.0", "ipaddress", json!("10.1.2.3"))).unwrap();
    assert_eq!(vb.value, SnmpValue::IpAddress([10, 1, 2, 3]));

    let vb = coerce_varbind(&descriptor("1.3.6.1.2.1.1.5.0", "oid", json!("1.3.6.1.4.1"))).unwrap();
    assert_eq!(vb.value, SnmpValue::ObjectId(Oid::from_str("1.3.6.1.4.1").unwrap()));
}

#[test]
fn test_unknown_type_defaults_to_integer() {
    let vb = coerce_varbind(&descriptor("1.3.6.1.2.1.1.5.0", "", json!(" 12 "))).unwrap();
    assert_eq!(vb.value, SnmpValue::Integer(12));
    let vb = coerce_varbind(&descriptor("1.3.6.1.2.1.1.5.0", "whatever", json!(3.7))).unwrap();
    assert_eq!(vb.value, SnmpValue::Integer(3));
}

#[test]
fn test_coerce_varbind_rejects_bad_values() {
    assert!(matches!(
        coerce_varbind(&descriptor("1.3.6.1.2.1.1.5.0", "integer", json!("abc"))),
        Err(UniconError::TypeMismatch(_))
    ));
    assert!(matches!(
        coerce_varbind(&descriptor("1.3.6.1.2.1.1.5.0", "counter32", json!(-1))),
        Err(UniconError::TypeMismatch(_))
    ));
    assert!(matches!(
        coerce_varbind(&descriptor("not-an-oid", "integer", json!(1))),
        Err(UniconError::InvalidParams(_))
    ));
}
