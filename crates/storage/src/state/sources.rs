// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Source and worker-event op handlers.

use super::{advance, MaterializedState, MAX_EVENTS_PER_SOURCE};
use crate::op::StoreOp;

pub(crate) fn apply(state: &mut MaterializedState, op: &StoreOp) {
    match op {
        StoreOp::SourceCreated { source } => {
            advance(&mut state.next_source_id, source.id);
            state.source_by_key.insert(source.key(), source.id);
            state.sources.insert(source.id, source.clone());
        }

        StoreOp::SourceTaskBound { id, task_id } => {
            if let Some(source) = state.sources.get_mut(id) {
                source.overseer_task_id = task_id.clone();
            }
        }

        StoreOp::WorkerEventAppended { event } => {
            advance(&mut state.next_worker_event_id, event.id);
            let feed = state.worker_events.entry(event.source_id).or_default();
            // Guarded append: replay may re-apply an op already in the
            // snapshot
            if feed.last().map(|e| e.id) < Some(event.id) {
                feed.push(event.clone());
            }
            if feed.len() > MAX_EVENTS_PER_SOURCE {
                let excess = feed.len() - MAX_EVENTS_PER_SOURCE;
                feed.drain(..excess);
            }
        }

        _ => {}
    }
}
