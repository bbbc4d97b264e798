// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! vcr-storage: the durable store behind the control-plane.
//!
//! Every mutation is a [`StoreOp`] appended to a write-ahead log and applied
//! to an in-memory [`MaterializedState`]; a zstd-compressed snapshot bounds
//! replay. Recovery loads the snapshot and replays the WAL tail. Relational
//! uniqueness constraints (`(driver, username)` on sources, `(user, source)`
//! on subscriptions) are keyed indices rebuilt from the row maps.

mod op;
mod snapshot;
mod state;
mod store;
mod wal;

pub use op::StoreOp;
pub use snapshot::{Snapshot, SnapshotError, CURRENT_SNAPSHOT_VERSION};
pub use state::MaterializedState;
pub use store::{Store, StorageError};
pub use wal::{Wal, WalEntry};
