use super::*;
use chrono::Duration;

fn field(display_name: &str, key: &str) -> DiscoveredField {
    DiscoveredField {
        display_name: display_name.to_string(),
        provider_field_key: key.to_string(),
        field_type: "enum".to_string(),
    }
}

fn discovered(entity: EntityType, fields: Vec<DiscoveredField>) -> BTreeMap<EntityType, Vec<DiscoveredField>> {
    let mut map = BTreeMap::new();
    map.insert(entity, fields);
    map
}

#[test]
fn test_normalize_field_name() {
    assert_eq!(normalize_field_name("Service Type"), "service_type");
    assert_eq!(normalize_field_name("service_type"), "service_type");
    assert_eq!(normalize_field_name("SMS Opt-In"), "sms_opt_in");
    assert_eq!(normalize_field_name("Job-Type (internal)"), "job_type_internal");
    assert_eq!(normalize_field_name("  Lead   Source  "), "lead_source");
    assert_eq!(normalize_field_name("__Priority__"), "priority");
    assert_eq!(normalize_field_name("!!!"), "");
    assert_eq!(normalize_field_name(""), "");
}

#[test]
fn test_entity_type_parse() {
    assert_eq!("deal".parse::<EntityType>(), Ok(EntityType::Deal));
    assert_eq!("person".parse::<EntityType>(), Ok(EntityType::Person));
    assert_eq!("organization".parse::<EntityType>(), Ok(EntityType::Organization));
    assert_eq!(
        "lead".parse::<EntityType>(),
        Err(UnknownEntityType("lead".to_string()))
    );
    assert_eq!(EntityType::Organization.to_string(), "organization");
}

#[test]
fn test_entity_type_serde() {
    let json = serde_json::to_string(&EntityType::Deal).unwrap();
    assert_eq!(json, "\"deal\"");
    let parsed: EntityType = serde_json::from_str("\"person\"").unwrap();
    assert_eq!(parsed, EntityType::Person);
}

#[test]
fn test_catalog_membership() {
    assert!(EntityType::Deal.is_semantic_field("service_type"));
    assert!(EntityType::Person.is_semantic_field("sms_opt_in"));
    assert!(!EntityType::Person.is_semantic_field("service_type"));
    assert!(!EntityType::Organization.is_semantic_field("title"));
}

#[test]
fn test_from_discovery_matches_display_names() {
    let fields = discovered(
        EntityType::Deal,
        vec![
            field("Service Type", "abc123"),
            field("Priority", "def456"),
            field("Internal Notes", "zzz999"),
        ],
    );

    let table = MappingTable::from_discovery(&fields);

    assert_eq!(table.resolve(EntityType::Deal, "service_type"), Some("abc123"));
    assert_eq!(table.resolve(EntityType::Deal, "priority"), Some("def456"));
    assert_eq!(table.resolve(EntityType::Deal, "internal_notes"), None);
    assert_eq!(table.resolve(EntityType::Deal, "job_type"), None);
    assert_eq!(table.len(), 2);
}

#[test]
fn test_from_discovery_first_match_wins() {
    let fields = discovered(
        EntityType::Deal,
        vec![
            field("Service Type", "first"),
            field("service-type", "second"),
        ],
    );

    let table = MappingTable::from_discovery(&fields);

    assert_eq!(table.resolve(EntityType::Deal, "service_type"), Some("first"));
    assert_eq!(table.semantic_name_for(EntityType::Deal, "second"), None);
}

#[test]
fn test_from_discovery_scopes_by_entity() {
    let mut fields = discovered(EntityType::Deal, vec![field("Customer Type", "deal-ct")]);
    fields.insert(EntityType::Person, vec![field("Customer Type", "person-ct")]);

    let table = MappingTable::from_discovery(&fields);

    assert_eq!(table.resolve(EntityType::Deal, "customer_type"), Some("deal-ct"));
    assert_eq!(table.resolve(EntityType::Person, "customer_type"), Some("person-ct"));
    assert_eq!(table.resolve(EntityType::Organization, "customer_type"), None);
    assert_eq!(table.semantic_name_for(EntityType::Deal, "person-ct"), None);
}

#[test]
fn test_reverse_index_matches_forward() {
    let fields = discovered(
        EntityType::Organization,
        vec![field("Industry", "ind1"), field("Account Number", "acct7")],
    );

    let table = MappingTable::from_discovery(&fields);

    for (entity, mapped) in table.mappings() {
        for (semantic, key) in mapped {
            assert_eq!(table.semantic_name_for(*entity, key), Some(semantic.as_str()));
        }
    }
    assert_eq!(
        table.semantic_name_for(EntityType::Organization, "acct7"),
        Some("account_number")
    );
}

#[test]
fn test_table_from_persisted_mappings() {
    let fields = discovered(EntityType::Deal, vec![field("Lead Source", "ls1")]);
    let table = MappingTable::from_discovery(&fields);

    let rebuilt = MappingTable::from(table.mappings().clone());

    assert_eq!(rebuilt, table);
}

#[test]
fn test_empty_table() {
    let table = MappingTable::default();
    assert!(table.is_empty());
    assert_eq!(table.resolve(EntityType::Deal, "service_type"), None);
    assert_eq!(table.semantic_name_for(EntityType::Deal, "abc123"), None);
}

#[test]
fn test_snapshot_freshness() {
    let now = Utc::now();
    let freshness = Duration::hours(24);

    let fresh = MappingSnapshot::discovered(MappingTable::default(), now - Duration::hours(23));
    let boundary = MappingSnapshot::discovered(MappingTable::default(), now - Duration::hours(24));
    let stale = MappingSnapshot::discovered(MappingTable::default(), now - Duration::hours(25));

    assert!(fresh.is_fresh(now, freshness));
    assert!(!boundary.is_fresh(now, freshness));
    assert!(!stale.is_fresh(now, freshness));
    assert!(!MappingSnapshot::default().is_fresh(now, freshness));
}

#[test]
fn test_mapping_source_serializes_snake_case() {
    assert_eq!(
        serde_json::to_value(MappingSource::Discovered).unwrap(),
        serde_json::json!("discovered")
    );
    assert_eq!(
        serde_json::to_value(MappingSource::Fallback).unwrap(),
        serde_json::json!("fallback")
    );
}
