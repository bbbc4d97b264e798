// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription op handlers.

use super::{advance, MaterializedState};
use crate::op::StoreOp;

pub(crate) fn apply(state: &mut MaterializedState, op: &StoreOp) {
    match op {
        StoreOp::SubscriptionCreated { subscription } => {
            advance(&mut state.next_subscription_id, subscription.id);
            state
                .sub_by_edge
                .insert((subscription.user_id, subscription.source_id), subscription.id);
            state.subscriptions.insert(subscription.id, subscription.clone());
        }

        StoreOp::SubscriptionPosture { id, posture, at } => {
            if let Some(sub) = state.subscriptions.get_mut(id) {
                sub.posture = *posture;
                sub.updated_at = *at;
            }
        }

        _ => {}
    }
}
