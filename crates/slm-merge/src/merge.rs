//! Snapshot Merger (C7): the state-transition rule that turns a freshly
//! parsed [`Snapshot`] into the next [`DeviceStatus`] row.
//!
//! `DOD?`'s payload is purely the six numeric fields (§4.3); it carries no
//! state word. The measurement state merged here comes from a separate
//! `Measure?` read taken in the same poll step — see [`Observation`]. The
//! decision itself ([`next_status`]) is a pure function with no I/O so it
//! can be tested directly against the property from the spec ("start time
//! set iff state is Start"). [`apply_snapshot`] wraps it in a
//! failure-atomic read-modify-write against the store.

use chrono::{DateTime, Utc};
use slm_core::{DeviceStatus, GatewayStore, StoreError, StoredMeasurementState};
use slm_protocol::{MeasurementState, Snapshot};

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One poll step's worth of device-reported data: the numeric `DOD?`
/// snapshot plus the measurement state from `Measure?`.
#[derive(Debug, Clone)]
pub struct Observation {
    pub snapshot: Snapshot,
    pub state: MeasurementState,
}

fn stored_state_of(state: MeasurementState) -> StoredMeasurementState {
    match state {
        MeasurementState::Start => StoredMeasurementState::Start,
        MeasurementState::Stop => StoredMeasurementState::Stop,
        MeasurementState::Unknown => StoredMeasurementState::Unknown,
    }
}

/// Compute the next status row from the prior one and a new observation.
/// Pure: callers decide when/whether to persist the result.
pub fn next_status(prev: &DeviceStatus, observation: &Observation, now: DateTime<Utc>) -> DeviceStatus {
    let snapshot = &observation.snapshot;
    let next_state = stored_state_of(observation.state);
    let mut next = prev.clone();

    let was_start = prev.measurement_state == StoredMeasurementState::Start;
    let becomes_start = next_state == StoredMeasurementState::Start;
    if !was_start && becomes_start {
        next.measurement_start_time = Some(now);
    } else if was_start && !becomes_start {
        next.measurement_start_time = None;
        next.start_time_sync_attempted = false;
    }

    next.measurement_state = next_state;
    next.last_seen = Some(now);
    next.counter = snapshot.counter.clone();
    next.lp = snapshot.lp.clone();
    next.leq = snapshot.leq.clone();
    next.lmax = snapshot.lmax.clone();
    next.lmin = snapshot.lmin.clone();
    next.lpeak = snapshot.lpeak.clone();
    next.raw_payload = Some(snapshot.raw_payload.clone());
    next
}

/// Failure-atomic merge: read the current row, compute the next one, write
/// it back, all inside one transaction. On any storage failure, nothing
/// changes.
pub fn apply_snapshot(
    store: &mut GatewayStore,
    unit_id: &str,
    observation: &Observation,
    now: DateTime<Utc>,
) -> Result<DeviceStatus, MergeError> {
    store
        .with_transaction(|txn| {
            txn.ensure_status_row(unit_id)?;
            let prev = txn
                .read_status(unit_id)?
                .unwrap_or_else(|| DeviceStatus::new(unit_id));
            let next = next_status(&prev, observation, now);
            txn.write_status(&next)?;
            Ok(next)
        })
        .map_err(MergeError::from)
}
