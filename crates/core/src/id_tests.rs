// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashMap;

// --- define_id! macro tests ---

crate::define_id! {
    /// Test ID type for macro verification.
    pub struct TestId;
}

#[test]
fn define_id_hash_map_lookup_by_str() {
    let mut map = HashMap::new();
    map.insert(TestId::new("k"), 42);
    assert_eq!(map.get("k"), Some(&42));
}

#[test]
fn define_id_str_comparisons_and_conversions() {
    let id = TestId::new("task-7f3a");
    assert_eq!(id, "task-7f3a");
    assert_eq!(id.as_str(), "task-7f3a");
    assert_eq!(id.to_string(), "task-7f3a");
    assert_eq!(TestId::from("task-7f3a"), id);
    assert_eq!(TestId::from("task-7f3a".to_string()), id);
}

#[test]
fn define_id_serde_is_transparent() {
    let id = TestId::new("task-7f3a");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"task-7f3a\"");
    let back: TestId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

// --- IdGen tests ---

#[test]
fn ids_carry_prefix_and_are_unique() {
    let gen = NanoIdGen;
    let a = gen.id("req");
    let b = gen.id("req");
    assert!(a.starts_with("req-"));
    assert!(b.starts_with("req-"));
    assert_ne!(a, b);
    assert_eq!(a.len(), "req-".len() + 12);
}
