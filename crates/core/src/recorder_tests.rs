// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    recording_start = { r#"{"event":"RECORDING START"}"#, RecorderEvent::RecordingStart },
    recording_end = { r#"{"event":"RECORDING END"}"#, RecorderEvent::RecordingEnd },
    sleep = { r#"{"event":"SLEEP"}"#, RecorderEvent::Sleep },
    session_end = { r#"{"event":"SESSION END"}"#, RecorderEvent::SessionEnd },
    heartbeat_bare = { r#"{"event":"HEARTBEAT"}"#, RecorderEvent::Heartbeat { session_duration: None } },
)]
fn parses_known_events(line: &str, expected: RecorderEvent) {
    assert_eq!(RecorderEvent::parse(line), Some(expected));
}

#[test]
fn heartbeat_carries_session_duration() {
    let ev = RecorderEvent::parse(r#"{"event":"HEARTBEAT","session_duration":"00:00:30"}"#);
    assert_eq!(
        ev,
        Some(RecorderEvent::Heartbeat { session_duration: Some("00:00:30".to_string()) })
    );
}

#[test]
fn extra_fields_are_ignored() {
    let ev = RecorderEvent::parse(r#"{"event":"RECORDING START","file":"out.ts","seq":3}"#);
    assert_eq!(ev, Some(RecorderEvent::RecordingStart));
}

#[parameterized(
    plain_text = { "opening stream..." },
    unknown_event = { r#"{"event":"UNKNOWN THING"}"# },
    no_event_field = { r#"{"level":"info","msg":"hi"}"# },
    empty = { "" },
    not_an_object = { "[1,2,3]" },
)]
fn rejects_non_events(line: &str) {
    assert_eq!(RecorderEvent::parse(line), None);
}

#[test]
fn tolerates_surrounding_whitespace() {
    assert_eq!(RecorderEvent::parse("  {\"event\":\"SLEEP\"}\n"), Some(RecorderEvent::Sleep));
}
