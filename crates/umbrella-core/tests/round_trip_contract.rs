//! Reconciliation Contract Test: Round Trip
//!
//! Constraints verified:
//! - For a fully known tree T, mapping T out and back (with T as prior)
//!   reproduces T on every user-controlled attribute
//! - Any inbound payload yields a tree carrying exactly the declared keys
//!
//! If this test fails, plans will show spurious diffs after every apply.

use serde_json::json;
use umbrella_core::mapper::{from_payload, to_payload};
use umbrella_core::schema::ObjectSchema;
use umbrella_core::{AttrValue, Known, Object, ResourceKind};

/// Keep user-controlled attributes, null out everything the server owns
fn user_view(tree: &Object, schema: &ObjectSchema) -> Object {
    schema
        .fields
        .iter()
        .map(|field| {
            let value = tree.value(field.name);
            let kept = if !field.is_user_controlled() {
                AttrValue::Null
            } else {
                match (value, field.nested()) {
                    (AttrValue::Known(Known::Object(inner)), Some(nested)) => {
                        AttrValue::object(user_view(inner, nested))
                    }
                    _ => value.clone(),
                }
            };
            (field.name.to_string(), kept)
        })
        .collect()
}

fn tree(kind: ResourceKind, set: &[(&[&str], AttrValue)]) -> Object {
    let mut tree = kind.schema().root.skeleton(&AttrValue::Null);
    for (path, value) in set {
        tree.set_path(path, value.clone()).unwrap();
    }
    tree
}

fn assert_round_trip(kind: ResourceKind, original: &Object) {
    let schema = &kind.schema().root;
    let payload = to_payload(original, schema);
    let back = from_payload(&payload, schema, Some(original)).expect("own payload maps back");

    assert_eq!(
        user_view(&back, schema),
        user_view(original, schema),
        "{} round trip through {:?}",
        kind,
        payload
    );
}

#[test]
fn site_round_trips() {
    assert_round_trip(
        ResourceKind::Site,
        &tree(
            ResourceKind::Site,
            &[
                (&["name"], AttrValue::string("hq")),
                (&["site_id"], AttrValue::int(7)),
                (&["is_default"], AttrValue::bool(true)),
            ],
        ),
    );
}

#[test]
fn virtual_appliance_round_trips() {
    let settings = ResourceKind::VirtualAppliance
        .schema()
        .root
        .field("settings")
        .and_then(|f| f.nested())
        .unwrap()
        .null_tree()
        .with("uptime", AttrValue::int(60))
        .with("domains", AttrValue::string_list(["corp.local"]));

    assert_round_trip(
        ResourceKind::VirtualAppliance,
        &tree(
            ResourceKind::VirtualAppliance,
            &[
                (&["site_id"], AttrValue::int(5)),
                (&["name"], AttrValue::string("va-1")),
                (&["settings"], AttrValue::object(settings)),
            ],
        ),
    );
}

#[test]
fn tunnel_round_trips_in_every_shape() {
    let full = tree(
        ResourceKind::Tunnel,
        &[
            (&["name"], AttrValue::string("branch-1")),
            (&["site_origin_id"], AttrValue::int(500)),
            (&["service_type"], AttrValue::string("SIG")),
            (
                &["network_cidrs"],
                AttrValue::string_list(["10.1.0.0/16", "10.2.0.0/16"]),
            ),
            (&["client", "device_type"], AttrValue::string("ASA")),
            (&["client", "authentication", "type"], AttrValue::string("PSK")),
            (
                &["client", "authentication", "parameters", "id_prefix"],
                AttrValue::string("branch"),
            ),
            (
                &["client", "authentication", "parameters", "secret"],
                AttrValue::string("s3cr3t"),
            ),
            (&["transport", "protocol"], AttrValue::string("ipsec")),
        ],
    );
    assert_round_trip(ResourceKind::Tunnel, &full);

    // Optional objects left Null
    let mut bare = full.clone();
    bare.insert("client", AttrValue::Null);
    bare.insert("transport", AttrValue::Null);
    assert_round_trip(ResourceKind::Tunnel, &bare);

    // Objects present but with every field Null
    let hollow = tree(
        ResourceKind::Tunnel,
        &[(&["name"], AttrValue::string("branch-1"))],
    );
    assert_round_trip(ResourceKind::Tunnel, &hollow);

    // Empty list is distinct from Null
    let mut empty_cidrs = full;
    empty_cidrs.insert("network_cidrs", AttrValue::list(Vec::new()));
    assert_round_trip(ResourceKind::Tunnel, &empty_cidrs);
}

#[test]
fn inbound_trees_carry_exactly_the_declared_keys() {
    let payloads = [
        (ResourceKind::Site, json!({})),
        (ResourceKind::Site, json!({"siteId": 1, "name": "hq", "extra": [1, 2]})),
        (ResourceKind::VirtualAppliance, json!({"originId": 3, "settings": {}})),
        (
            ResourceKind::VirtualAppliance,
            json!({"originId": 3, "settings": null, "state": {"syncing": "true", "bogus": 1}}),
        ),
        (ResourceKind::Tunnel, json!({"id": 9, "client": {"authentication": {}}})),
        (
            ResourceKind::Tunnel,
            json!({"id": 9, "client": null, "transport": {"protocol": "ipsec", "mtu": 1400}}),
        ),
    ];

    for (kind, payload) in payloads {
        let schema = &kind.schema().root;
        let payload = payload.as_object().cloned().unwrap();
        let tree = from_payload(&payload, schema, None).expect("payload maps");

        assert_eq!(tree.len(), schema.fields.len(), "{} {:?}", kind, payload);
        assert!(
            schema.check_shape(&tree).is_ok(),
            "{} {:?}: {:?}",
            kind,
            payload,
            schema.check_shape(&tree)
        );
    }
}
