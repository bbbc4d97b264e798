// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manager scenario tests, driven through a [`FakeOverseer`].

mod events;
mod reconcile;
mod restart;
mod subscribe;

use super::fake::FakeOverseer;
use super::*;
use std::time::Duration;
use tempfile::TempDir;
use vcr_core::{FakeClock, Posture, Role, TaskId, User};
use vcr_overseer::OverseerEvent;

pub(crate) struct TestCtx {
    _dir: TempDir,
    pub clock: FakeClock,
    pub store: Arc<vcr_storage::Store<FakeClock>>,
    pub overseer: Arc<FakeOverseer>,
    pub manager: Arc<Manager<FakeClock>>,
}

pub(crate) fn setup() -> TestCtx {
    let dir = tempfile::tempdir().unwrap();
    let clock = FakeClock::new();
    let store = Arc::new(vcr_storage::Store::open_with_clock(dir.path(), clock.clone()).unwrap());
    let overseer = FakeOverseer::new();
    let manager = Arc::new(Manager::new(
        store.clone(),
        overseer.clone() as Arc<dyn Overseer>,
        clock.clone(),
    ));
    TestCtx { _dir: dir, clock, store, overseer, manager }
}

impl TestCtx {
    pub fn user(&self, name: &str) -> User {
        self.store.create_user(name, "$hash$", Role::User).unwrap()
    }

    /// Poll until the condition holds; background worker starts run on
    /// spawned tasks.
    pub async fn wait_until(&self, what: &str, condition: impl Fn() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for: {what}");
    }

    /// Subscribe and wait until the worker is running. Returns the bound
    /// task id.
    pub async fn subscribe_running(
        &self,
        user_id: vcr_core::UserId,
        driver: &str,
        username: &str,
    ) -> TaskId {
        self.manager.subscribe(user_id, driver, username).await.unwrap();
        let source = self.store.source_by_key(driver, username).unwrap();
        self.wait_until("worker running", || {
            self.manager.worker_state(source.id) == vcr_core::WorkerState::Running
        })
        .await;
        self.store
            .source(source.id)
            .and_then(|s| s.overseer_task_id)
            .unwrap_or_else(|| panic!("no task bound for {driver}/{username}"))
    }

    pub fn worker_state_of(&self, driver: &str, username: &str) -> vcr_core::WorkerState {
        let source = self.store.source_by_key(driver, username).unwrap();
        self.manager.worker_state(source.id)
    }

    pub fn status(&self, user_id: vcr_core::UserId, driver: &str, username: &str) -> vcr_core::SubscriptionStatus {
        self.manager.get_status(user_id, driver, username).unwrap()
    }
}
