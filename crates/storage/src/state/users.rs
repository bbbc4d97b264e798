// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User and auth-session op handlers.

use super::{advance, MaterializedState};
use crate::op::StoreOp;

pub(crate) fn apply(state: &mut MaterializedState, op: &StoreOp) {
    match op {
        StoreOp::UserCreated { user } => {
            advance(&mut state.next_user_id, user.id);
            state.user_by_name.insert(user.username.clone(), user.id);
            state.users.insert(user.id, user.clone());
        }

        StoreOp::UserUpdated { user } => {
            if let Some(existing) = state.users.get(&user.id) {
                if existing.username != user.username {
                    state.user_by_name.remove(&existing.username);
                }
            }
            state.user_by_name.insert(user.username.clone(), user.id);
            state.users.insert(user.id, user.clone());
        }

        StoreOp::UserDeleted { id } => {
            if let Some(user) = state.users.remove(id) {
                state.user_by_name.remove(&user.username);
            }
            // Cascade: sessions and subscriptions go with the user
            let dead_tokens: Vec<String> = state
                .sessions
                .values()
                .filter(|s| s.user_id == *id)
                .map(|s| s.refresh_token.clone())
                .collect();
            state.sessions.retain(|_, s| s.user_id != *id);
            for token in dead_tokens {
                state.session_by_token.remove(&token);
            }

            let dead_edges: Vec<_> = state
                .subscriptions
                .values()
                .filter(|s| s.user_id == *id)
                .map(|s| (s.user_id, s.source_id))
                .collect();
            state.subscriptions.retain(|_, s| s.user_id != *id);
            for edge in dead_edges {
                state.sub_by_edge.remove(&edge);
            }
        }

        StoreOp::SessionCreated { session } => {
            advance(&mut state.next_session_id, session.id);
            state
                .session_by_token
                .insert(session.refresh_token.clone(), session.id);
            state.sessions.insert(session.id, session.clone());
        }

        StoreOp::SessionDeleted { id } => {
            if let Some(session) = state.sessions.remove(id) {
                state.session_by_token.remove(&session.refresh_token);
            }
        }

        StoreOp::SessionsSwept { cutoff } => {
            let dead_tokens: Vec<String> = state
                .sessions
                .values()
                .filter(|s| s.expires_at <= *cutoff)
                .map(|s| s.refresh_token.clone())
                .collect();
            state.sessions.retain(|_, s| s.expires_at > *cutoff);
            for token in dead_tokens {
                state.session_by_token.remove(&token);
            }
        }

        _ => {}
    }
}
