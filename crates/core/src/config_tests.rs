// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn empty_json_yields_defaults() {
    let cfg: Config = serde_json::from_str("{}").unwrap();
    assert_eq!(cfg, Config::default());
    assert_eq!(cfg.error_threshold, 5);
    assert_eq!(cfg.start_concurrency, 5);
    assert_eq!(cfg.reconcile_interval(), Duration::from_secs(60));
}

#[test]
fn partial_json_keeps_other_defaults() {
    let cfg: Config =
        serde_json::from_str(r#"{"error_threshold": 3, "recorder": {"resolution": "720"}}"#)
            .unwrap();
    assert_eq!(cfg.error_threshold, 3);
    assert_eq!(cfg.recorder.resolution, "720");
    assert_eq!(cfg.recorder.framerate, "30");
    assert_eq!(cfg.restart_delay_secs, 10);
}

#[test]
fn canonical_url_substitutes_username() {
    let cfg = Config::default();
    assert_eq!(
        cfg.canonical_url("chaturbate", "bob").as_deref(),
        Some("https://chaturbate.com/bob/")
    );
    assert!(cfg.canonical_url("nosuch", "bob").is_none());
    assert!(cfg.knows_driver("chaturbate"));
    assert!(!cfg.knows_driver("nosuch"));
}

#[test]
fn round_trips_through_json() {
    let mut cfg = Config::default();
    cfg.recorder.segment_length = "1800".to_string();
    cfg.driver_urls
        .insert("myfreecams".to_string(), "https://myfreecams.com/#{username}".to_string());
    let json = serde_json::to_string(&cfg).unwrap();
    let back: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(back, cfg);
}
