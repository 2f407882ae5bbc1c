// tests/property/classifier_test.rs

//! Property-based tests for the error classifier

use proptest::prelude::*;
use strum::IntoEnumIterator;
use unicon::core::classifier::{classify, classify_error};
use unicon::core::{ProtocolFamily, UniconError};

fn any_family() -> impl Strategy<Value = ProtocolFamily> {
    prop::sample::select(ProtocolFamily::iter().collect::<Vec<_>>())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_classification_is_total_and_deterministic(
        family in any_family(),
        message in ".{0,200}",
    ) {
        let first = classify(family, &message);
        let second = classify(family, &message);
        prop_assert!(!first.code.is_empty());
        prop_assert!(!first.hint.is_empty());
        prop_assert!(first.code.chars().all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit()));
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_family_is_generic(message in ".{0,200}") {
        prop_assert_eq!(classify(ProtocolFamily::Unknown, &message).code, "UNKNOWN_ERROR");
    }

    #[test]
    fn test_structural_errors_ignore_family(
        family in any_family(),
        id in "[a-z0-9-]{1,36}",
    ) {
        // Even an id that looks like a network failure keeps the fixed code.
        let noisy = format!("{id} ECONNREFUSED timeout");
        prop_assert_eq!(
            classify_error(family, &UniconError::NotActive(noisy.clone())).code,
            "NOT_ACTIVE"
        );
        prop_assert_eq!(
            classify_error(family, &UniconError::ConnectionNotFound(noisy)).code,
            "CONNECTION_NOT_FOUND"
        );
    }

    #[test]
    fn test_refused_connections_are_recognized_across_families(
        family in prop::sample::select(vec![
            ProtocolFamily::OpcUa,
            ProtocolFamily::Snmp,
            ProtocolFamily::Ssh,
            ProtocolFamily::Ftp,
            ProtocolFamily::Sql,
            ProtocolFamily::Grpc,
            ProtocolFamily::Http,
        ]),
        octets in prop::array::uniform4(0u8..=255),
        port in 1024u16..5000,
    ) {
        let message = format!(
            "connect ECONNREFUSED {}.{}.{}.{}:{port}",
            octets[0], octets[1], octets[2], octets[3]
        );
        let code = classify(family, &message).code;
        prop_assert!(code.ends_with("_CONNECTION_REFUSED"), "{} -> {}", message, code);
    }
}
