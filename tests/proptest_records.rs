//! Property-based tests using proptest
//!
//! These tests verify the field-bag invariants and the attachment
//! payload encoding using randomized inputs.

use proptest::prelude::*;
use serde_json::json;

use bugzilla_rest::{Attachment, FieldValue, Fields, ResourceKind, ResourceRecord};

/// Arbitrary field names in the shape Bugzilla uses
fn arb_field_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,30}".prop_map(String::from)
}

/// Arbitrary scalar field values
fn arb_scalar() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::from),
        any::<i64>().prop_map(FieldValue::from),
        "[ -~]{0,40}".prop_map(FieldValue::from),
    ]
}

fn arb_bag() -> impl Strategy<Value = Fields> {
    prop::collection::vec((arb_field_name(), arb_scalar()), 0..20).prop_map(|pairs| {
        let mut bag = Fields::new();
        for (name, value) in pairs {
            bag.set(name, value);
        }
        bag
    })
}

proptest! {
    /// Setting a field makes exactly that value readable back
    #[test]
    fn set_then_get_returns_value(
        mut bag in arb_bag(),
        name in arb_field_name(),
        value in arb_scalar()
    ) {
        bag.set(name.clone(), value.clone());
        prop_assert_eq!(bag.get(&name).unwrap(), &value);
    }

    /// On update, values from the incoming bag win for shared names
    #[test]
    fn update_later_wins(
        mut bag in arb_bag(),
        incoming in arb_bag()
    ) {
        let expected: Vec<(String, FieldValue)> = incoming
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect();
        bag.update(incoming);
        for (name, value) in expected {
            prop_assert_eq!(bag.get(&name).unwrap(), &value);
        }
    }

    /// On merge_missing, values already in the bag win for shared names
    #[test]
    fn merge_missing_keeps_existing(
        mut bag in arb_bag(),
        incoming in arb_bag()
    ) {
        let before: Vec<(String, FieldValue)> = bag
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect();
        bag.merge_missing(incoming);
        for (name, value) in before {
            prop_assert_eq!(bag.get(&name).unwrap(), &value);
        }
    }

    /// Attachment payloads survive the trip through base64 wire encoding,
    /// including the empty payload
    #[test]
    fn attachment_data_round_trips(payload in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut attachment = Attachment::new();
        attachment.set("file_name", "blob.bin");
        attachment.set("summary", "binary payload");
        attachment.set("content_type", "application/octet-stream");
        attachment.set_data(payload.clone());

        let body = attachment.add_body().unwrap();
        let encoded = body["data"].as_str().unwrap().to_string();
        // Base64 text only, never raw bytes on the wire.
        prop_assert!(encoded.chars().all(|c| c.is_ascii_alphanumeric() || "+/=".contains(c)));

        let wire = json!({"id": 1, "data": encoded, "size": payload.len()});
        let record = ResourceRecord::from_wire(ResourceKind::Attachment, wire).unwrap();
        let decoded: Attachment = record.try_into().unwrap();
        prop_assert_eq!(decoded.data().unwrap(), payload.as_slice());
        // size is virtual, recomputed from the payload
        prop_assert!(decoded.try_get("size").is_none());
        prop_assert_eq!(decoded.size().unwrap(), payload.len());
    }

    /// Serialized bags keep insertion order
    #[test]
    fn serialization_keeps_insertion_order(bag in arb_bag()) {
        let map = bag.to_json_map();
        let bag_names: Vec<&str> = bag.names().collect();
        let map_names: Vec<&str> = map.keys().map(String::as_str).collect();
        prop_assert_eq!(bag_names, map_names);
    }
}
