use std::collections::HashSet;
use std::str::FromStr;
use tasksync_types::{DeviceId, EntityId};

// ── EntityId ──────────────────────────────────────────────────────

#[test]
fn entity_id_new_is_unique() {
    let a = EntityId::new();
    let b = EntityId::new();
    assert_ne!(a, b);
}

#[test]
fn entity_id_displays_lowercase_hyphenated() {
    let id = EntityId::parse("0190A1B2-C3D4-7E5F-8A9B-0C1D2E3F4A5B").unwrap();
    assert_eq!(id.to_string(), "0190a1b2-c3d4-7e5f-8a9b-0c1d2e3f4a5b");
}

#[test]
fn entity_id_display_and_parse() {
    let id = EntityId::new();
    let parsed = EntityId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn entity_id_parse_accepts_uppercase() {
    let id = EntityId::new();
    let upper = id.to_string().to_uppercase();
    assert_eq!(EntityId::from_str(&upper).unwrap(), id);
}

#[test]
fn entity_id_parse_invalid() {
    assert!(EntityId::parse("not-a-uuid").is_err());
}

#[test]
fn entity_ids_are_time_ordered() {
    let a = EntityId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = EntityId::new();
    assert!(a < b);
}

#[test]
fn entity_id_hash_and_eq() {
    let id = EntityId::new();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
}

#[test]
fn entity_id_serializes_as_plain_string() {
    let id = EntityId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
    let parsed: EntityId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, parsed);
}

// ── DeviceId ──────────────────────────────────────────────────────

#[test]
fn device_id_new_is_unique() {
    assert_ne!(DeviceId::new(), DeviceId::new());
}

#[test]
fn device_id_display_and_parse() {
    let id = DeviceId::new();
    assert_eq!(DeviceId::parse(&id.to_string()).unwrap(), id);
}

#[test]
fn device_id_from_str_invalid() {
    assert!(DeviceId::from_str("garbage").is_err());
}
