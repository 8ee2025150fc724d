//! Descriptors for the Site, Virtual Appliance and Tunnel kinds, and the
//! datacenter list data source

use super::{Field, ObjectSchema, Payload, ResourceKind, ResourceSchema};
use serde_json::Value;
use std::sync::LazyLock;

/// Local attribute stamped with the time of the last successful write
fn last_updated() -> Field {
    Field::string("last_updated")
        .local()
        .describe("Timestamp of the last successful create or update")
}

pub(super) static SITE: LazyLock<ResourceSchema> = LazyLock::new(|| ResourceSchema {
    kind: ResourceKind::Site,
    description: "Umbrella site",
    root: ObjectSchema::new(vec![
        Field::int("id").wire("siteId").computed(),
        Field::int("site_id").wire("siteId").computed(),
        Field::int("origin_id").wire("originId").computed(),
        Field::bool("is_default").wire("isDefault").computed(),
        Field::string("name").required().describe("Name of the site"),
        Field::string("modified_at").wire("modifiedAt").computed(),
        Field::string("created_at").wire("createdAt").computed(),
        last_updated(),
    ]),
    id_attribute: "id",
    id_wire: "siteId",
    timestamp_attribute: Some("last_updated"),
    supports_create: true,
    addressable: true,
    unsupported_hint: "",
    create_fixup: None,
    list_filter: None,
});

pub(super) static VIRTUAL_APPLIANCE: LazyLock<ResourceSchema> = LazyLock::new(|| {
    let settings = vec![
        Field::int("uptime"),
        Field::string("external_ip").wire("externalIP"),
        Field::string("host_type").wire("hostType"),
        Field::string("last_sync_time").wire("lastSyncTime"),
        Field::string("upgrade_error").wire("upgradeError"),
        Field::string("version"),
        Field::bool("is_dnscrypt_enabled").wire("isDnscryptEnabled"),
        Field::string_list("domains"),
        Field::string_list("internal_ips").wire("internalIPs"),
    ];

    let state = vec![
        Field::string("connected_to_connector").wire("connectedToConnector"),
        Field::string("has_local_domain_configured").wire("hasLocalDomainConfigured"),
        Field::string("query_failure_rate_acceptable").wire("queryFailureRateAcceptable"),
        Field::string("received_internal_dns_queries").wire("receivedInternalDNSQueries"),
        Field::string("redundant_within_site").wire("redundantWithinSite"),
        Field::string("syncing"),
    ];

    ResourceSchema {
        kind: ResourceKind::VirtualAppliance,
        description: "Umbrella virtual appliance",
        root: ObjectSchema::new(vec![
            Field::int("id").wire("originId").computed(),
            Field::int("origin_id").wire("originId").computed().use_last_known(),
            Field::int("site_id").wire("siteId").required().describe("Site the appliance belongs to"),
            Field::string("name").computed().use_last_known(),
            Field::string("health").computed().use_last_known(),
            Field::string("type").computed().use_last_known(),
            Field::string("created_at").wire("createdAt").computed().use_last_known(),
            Field::bool("is_upgradable").wire("isUpgradable").computed().use_last_known(),
            Field::string("modified_at").wire("modifiedAt").computed(),
            Field::string("state_updated_at").wire("stateUpdatedAt").computed(),
            Field::object("settings", settings).computed().use_last_known(),
            Field::object("state", state).computed().use_last_known(),
            last_updated(),
        ]),
        id_attribute: "id",
        id_wire: "originId",
        timestamp_attribute: Some("last_updated"),
        supports_create: false,
        addressable: true,
        unsupported_hint: "virtual appliances are registered by the appliance itself; import an existing one by its origin id",
        create_fixup: None,
        list_filter: Some(is_virtual_appliance),
    }
});

pub(super) static TUNNEL: LazyLock<ResourceSchema> = LazyLock::new(|| {
    let parameters = vec![
        Field::string("id").computed().use_last_known(),
        Field::string("modified_at").wire("modifiedAt").computed(),
        Field::string("secret").optional_computed().use_last_known().sensitive(),
        Field::string("id_prefix").wire("id").write_only(),
    ];

    let authentication = vec![
        Field::string("type").optional_computed(),
        Field::object("parameters", parameters)
            .optional_computed()
            .use_last_known(),
    ];

    let client = vec![
        Field::string("device_type")
            .wire("deviceType")
            .optional_computed()
            .use_last_known(),
        Field::object("authentication", authentication).optional_computed(),
    ];

    let transport = vec![Field::string("protocol").optional_computed().use_last_known()];

    ResourceSchema {
        kind: ResourceKind::Tunnel,
        description: "Umbrella network tunnel",
        root: ObjectSchema::new(vec![
            Field::int("id").computed().use_last_known(),
            Field::string("uri").computed().use_last_known(),
            Field::string("name").required().describe("Name of the tunnel"),
            Field::int("site_origin_id")
                .wire("siteOriginId")
                .optional_computed()
                .use_last_known(),
            Field::object("client", client).optional_computed(),
            Field::object("transport", transport)
                .optional_computed()
                .use_last_known(),
            Field::string("service_type")
                .wire("serviceType")
                .optional_computed()
                .use_last_known(),
            Field::string_list("network_cidrs").wire("networkCIDRs"),
            Field::string("modified_at").wire("modifiedAt").computed(),
            Field::string("created_at").wire("createdAt").computed().use_last_known(),
            last_updated(),
        ]),
        id_attribute: "id",
        id_wire: "id",
        timestamp_attribute: Some("last_updated"),
        supports_create: true,
        addressable: true,
        unsupported_hint: "",
        create_fixup: Some(qualify_tunnel_uri),
        list_filter: None,
    }
});

pub(super) static DATACENTERS: LazyLock<ResourceSchema> = LazyLock::new(|| {
    let cities = vec![
        Field::string("latitude").computed(),
        Field::string("longitude").computed(),
        Field::string("name").computed(),
        Field::string("dc").computed(),
        Field::string("range").computed(),
        Field::string("fqdn").computed(),
    ];

    let continents = vec![
        Field::string("name").computed(),
        Field::object_list("cities", cities).computed(),
    ];

    ResourceSchema {
        kind: ResourceKind::Datacenters,
        description: "Umbrella datacenters grouped by continent",
        root: ObjectSchema::new(vec![Field::object_list("continents", continents).computed()]),
        id_attribute: "",
        id_wire: "",
        timestamp_attribute: None,
        supports_create: false,
        addressable: false,
        unsupported_hint: "the datacenter list is a read-only data source; read it as a whole",
        create_fixup: None,
        list_filter: None,
    }
});

/// Create responses carry the collection uri; reads return the item uri
fn qualify_tunnel_uri(payload: &mut Payload, id: i64) {
    if let Some(Value::String(uri)) = payload.get_mut("uri") {
        let suffix = format!("/{}", id);
        if !uri.ends_with(&suffix) {
            uri.push_str(&suffix);
        }
    }
}

fn is_virtual_appliance(payload: &Payload) -> bool {
    payload.get("type").and_then(Value::as_str) == Some("virtual_appliance")
}
