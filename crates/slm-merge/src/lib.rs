//! Device-reported state reconciliation: the Snapshot Merger and the
//! Start-Time Synchronizer that rides on top of it.

pub mod merge;
pub mod sync;

pub use merge::{apply_snapshot, next_status, MergeError, Observation};
pub use sync::{needs_sync, synchronize_start_time, SyncOutcome};
