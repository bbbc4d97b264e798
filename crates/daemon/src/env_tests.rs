// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

fn clear_env() {
    for key in [
        "VCR_STATE_DIR",
        "XDG_STATE_HOME",
        "VCR_OVERSEER_URL",
        "VCR_ADMIN_USER",
        "VCR_ADMIN_PASS_HASH",
        "VCR_DRAIN_TIMEOUT_MS",
        "VCR_LOG",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
#[serial]
fn state_dir_prefers_explicit_override() {
    clear_env();
    std::env::set_var("VCR_STATE_DIR", "/tmp/vcr-test");
    std::env::set_var("XDG_STATE_HOME", "/tmp/xdg");

    assert_eq!(state_dir().unwrap(), PathBuf::from("/tmp/vcr-test"));

    std::env::remove_var("VCR_STATE_DIR");
    assert_eq!(state_dir().unwrap(), PathBuf::from("/tmp/xdg/vcr"));
    clear_env();
}

#[test]
#[serial]
fn overseer_url_is_required() {
    clear_env();
    assert!(matches!(overseer_url(), Err(LifecycleError::NoOverseerUrl)));

    std::env::set_var("VCR_OVERSEER_URL", "ws://127.0.0.1:9400");
    assert_eq!(overseer_url().unwrap(), "ws://127.0.0.1:9400");
    clear_env();
}

#[test]
#[serial]
fn admin_seed_requires_both_vars() {
    clear_env();
    assert!(admin_seed().is_none());

    std::env::set_var("VCR_ADMIN_USER", "admin");
    assert!(admin_seed().is_none());

    std::env::set_var("VCR_ADMIN_PASS_HASH", "$argon2$...");
    assert_eq!(admin_seed(), Some(("admin".to_string(), "$argon2$...".to_string())));
    clear_env();
}

#[test]
#[serial]
fn drain_timeout_parses_override() {
    clear_env();
    assert_eq!(drain_timeout(), Duration::from_secs(10));

    std::env::set_var("VCR_DRAIN_TIMEOUT_MS", "2500");
    assert_eq!(drain_timeout(), Duration::from_millis(2500));

    std::env::set_var("VCR_DRAIN_TIMEOUT_MS", "not-a-number");
    assert_eq!(drain_timeout(), Duration::from_secs(10));
    clear_env();
}

#[test]
#[serial]
fn log_filter_defaults_to_info() {
    clear_env();
    assert_eq!(log_filter(), "info");

    std::env::set_var("VCR_LOG", "vcr_daemon=debug");
    assert_eq!(log_filter(), "vcr_daemon=debug");
    clear_env();
}
