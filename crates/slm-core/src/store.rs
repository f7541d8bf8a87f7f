//! `GatewayStore` — the SQLite-backed Device Registry (C1) and Status Store
//! (C2).
//!
//! Applies WAL + `synchronous=FULL` + `foreign_keys=ON` at open, runs
//! `PRAGMA integrity_check`, and creates the schema idempotently (no
//! external migration runner — see `SPEC_FULL.md` §3). Reads are unlocked;
//! writes that must be failure-atomic (the Snapshot Merger's merge) go
//! through [`GatewayStore::with_transaction`].

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::config::DeviceConfig;
use crate::status::{DeviceStatus, StoredMeasurementState};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("unknown device '{0}'")]
    UnknownDevice(String),
}

pub struct GatewayStore {
    conn: Connection,
}

impl GatewayStore {
    /// Open (or create) the store at `path`. Returns `Err` if
    /// `PRAGMA integrity_check` fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (used by tests).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(GatewayStore { conn })
    }

    // -----------------------------------------------------------------------
    // Device Registry (C1)
    // -----------------------------------------------------------------------

    pub fn upsert_device(&mut self, cfg: &DeviceConfig) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO device_config
                 (unit_id, host, tcp_port, ftp_port, tcp_enabled, ftp_enabled,
                  ftp_username, ftp_password, poll_interval_seconds, poll_enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(unit_id) DO UPDATE SET
                 host = excluded.host,
                 tcp_port = excluded.tcp_port,
                 ftp_port = excluded.ftp_port,
                 tcp_enabled = excluded.tcp_enabled,
                 ftp_enabled = excluded.ftp_enabled,
                 ftp_username = excluded.ftp_username,
                 ftp_password = excluded.ftp_password,
                 poll_interval_seconds = excluded.poll_interval_seconds,
                 poll_enabled = excluded.poll_enabled",
            params![
                cfg.unit_id,
                cfg.host,
                cfg.tcp_port,
                cfg.ftp_port,
                cfg.tcp_enabled,
                cfg.ftp_enabled,
                cfg.ftp_username,
                cfg.ftp_password,
                cfg.poll_interval_seconds,
                cfg.poll_enabled,
            ],
        )?;
        Ok(())
    }

    pub fn get_device(&self, unit_id: &str) -> Result<Option<DeviceConfig>, StoreError> {
        self.conn
            .query_row(
                "SELECT unit_id, host, tcp_port, ftp_port, tcp_enabled, ftp_enabled,
                        ftp_username, ftp_password, poll_interval_seconds, poll_enabled
                 FROM device_config WHERE unit_id = ?1",
                params![unit_id],
                map_device_config,
            )
            .optional()
            .map_err(StoreError::from)
    }

    pub fn list_devices(&self) -> Result<Vec<DeviceConfig>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT unit_id, host, tcp_port, ftp_port, tcp_enabled, ftp_enabled,
                    ftp_username, ftp_password, poll_interval_seconds, poll_enabled
             FROM device_config ORDER BY unit_id",
        )?;
        let rows = stmt.query_map([], map_device_config)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Devices eligible for the Background Poller: `poll_enabled = true`.
    pub fn list_enabled_devices(&self) -> Result<Vec<DeviceConfig>, StoreError> {
        Ok(self
            .list_devices()?
            .into_iter()
            .filter(|d| d.poll_enabled)
            .collect())
    }

    /// Delete a device; cascades to its status row via `ON DELETE CASCADE`.
    pub fn delete_device(&mut self, unit_id: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn
            .execute("DELETE FROM device_config WHERE unit_id = ?1", params![unit_id])?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Status Store (C2)
    // -----------------------------------------------------------------------

    pub fn read_status(&self, unit_id: &str) -> Result<Option<DeviceStatus>, StoreError> {
        query_status(&self.conn, unit_id)
    }

    /// Lazily create the status row for a device if it doesn't exist yet.
    pub fn ensure_status_row(&mut self, unit_id: &str) -> Result<(), StoreError> {
        ensure_status_row(&self.conn, unit_id)
    }

    /// Full replace of a device's status row (used by the Snapshot Merger
    /// and anywhere else that already holds a complete, decided
    /// [`DeviceStatus`]).
    pub fn write_status(&mut self, status: &DeviceStatus) -> Result<(), StoreError> {
        write_status(&self.conn, status)
    }

    pub fn set_last_poll_attempt(
        &mut self,
        unit_id: &str,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        ensure_status_row(&self.conn, unit_id)?;
        self.conn.execute(
            "UPDATE device_status SET last_poll_attempt = ?2 WHERE unit_id = ?1",
            params![unit_id, when.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record a successful poll: `is_reachable = true`, failures reset,
    /// `last_success`/`last_seen` stamped, `last_error` cleared (I4).
    pub fn record_poll_success(&mut self, unit_id: &str, when: DateTime<Utc>) -> Result<(), StoreError> {
        ensure_status_row(&self.conn, unit_id)?;
        self.conn.execute(
            "UPDATE device_status
             SET is_reachable = 1, consecutive_failures = 0,
                 last_success = ?2, last_seen = ?2, last_error = NULL
             WHERE unit_id = ?1",
            params![unit_id, when.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Record a failed poll. `consecutive_failures` increments
    /// monotonically; `is_reachable` flips to false on the step that brings
    /// the counter to 3 (I4). Returns `true` exactly on that transition, so
    /// callers log it once.
    pub fn record_poll_failure(
        &mut self,
        unit_id: &str,
        when: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        ensure_status_row(&self.conn, unit_id)?;
        let truncated = crate::status::truncate_error(error);
        let prev_failures: u32 = self.conn.query_row(
            "SELECT consecutive_failures FROM device_status WHERE unit_id = ?1",
            params![unit_id],
            |row| row.get(0),
        )?;
        let new_failures = prev_failures + 1;
        self.conn.execute(
            "UPDATE device_status SET consecutive_failures = ?2, last_error = ?3 WHERE unit_id = ?1",
            params![unit_id, new_failures, truncated],
        )?;
        let just_became_unreachable = prev_failures < 3 && new_failures >= 3;
        if just_became_unreachable {
            self.conn.execute(
                "UPDATE device_status SET is_reachable = 0 WHERE unit_id = ?1",
                params![unit_id],
            )?;
        }
        Ok(just_became_unreachable)
    }

    // -----------------------------------------------------------------------
    // Device log (C13)
    // -----------------------------------------------------------------------

    pub fn append_log(
        &mut self,
        unit_id: &str,
        level: &str,
        category: &str,
        message: &str,
        when: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO device_log (unit_id, timestamp, level, category, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![unit_id, when.to_rfc3339(), level, category, message],
        )?;
        Ok(())
    }

    /// Delete `device_log` rows older than `cutoff`. Returns the number of
    /// rows removed.
    pub fn purge_logs_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let affected = self.conn.execute(
            "DELETE FROM device_log WHERE timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(affected)
    }

    // -----------------------------------------------------------------------
    // Transactional access (used by the Snapshot Merger for failure-atomic merges)
    // -----------------------------------------------------------------------

    pub fn with_transaction<F, T>(&mut self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StoreTxn<'_>) -> Result<T, StoreError>,
    {
        let txn = self.conn.transaction()?;
        let mut wrapped = StoreTxn { txn };
        let result = f(&mut wrapped)?;
        wrapped.txn.commit()?;
        Ok(result)
    }
}

/// A transaction handle exposing the same status-row primitives as
/// [`GatewayStore`], for callers (e.g. the Snapshot Merger) that need a
/// failure-atomic read-modify-write.
pub struct StoreTxn<'conn> {
    txn: rusqlite::Transaction<'conn>,
}

impl StoreTxn<'_> {
    pub fn read_status(&self, unit_id: &str) -> Result<Option<DeviceStatus>, StoreError> {
        query_status(&self.txn, unit_id)
    }

    pub fn ensure_status_row(&mut self, unit_id: &str) -> Result<(), StoreError> {
        ensure_status_row(&self.txn, unit_id)
    }

    pub fn write_status(&mut self, status: &DeviceStatus) -> Result<(), StoreError> {
        write_status(&self.txn, status)
    }
}

// ---------------------------------------------------------------------------
// Free functions shared between `GatewayStore` and `StoreTxn`
// ---------------------------------------------------------------------------

fn query_status(conn: &Connection, unit_id: &str) -> Result<Option<DeviceStatus>, StoreError> {
    conn.query_row(
        "SELECT unit_id, last_seen, measurement_state, measurement_start_time,
                counter, lp, leq, lmax, lmin, lpeak,
                battery_level, power_source, sd_remaining_mb, sd_free_ratio,
                raw_payload, is_reachable, consecutive_failures,
                last_poll_attempt, last_success, last_error, start_time_sync_attempted
         FROM device_status WHERE unit_id = ?1",
        params![unit_id],
        map_device_status,
    )
    .optional()
    .map_err(StoreError::from)
}

fn ensure_status_row(conn: &Connection, unit_id: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO device_status
             (unit_id, measurement_state, is_reachable, consecutive_failures,
              start_time_sync_attempted)
         VALUES (?1, 'unknown', 0, 0, 0)",
        params![unit_id],
    )?;
    Ok(())
}

fn write_status(conn: &Connection, status: &DeviceStatus) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO device_status
             (unit_id, last_seen, measurement_state, measurement_start_time,
              counter, lp, leq, lmax, lmin, lpeak,
              battery_level, power_source, sd_remaining_mb, sd_free_ratio,
              raw_payload, is_reachable, consecutive_failures,
              last_poll_attempt, last_success, last_error, start_time_sync_attempted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
         ON CONFLICT(unit_id) DO UPDATE SET
             last_seen = excluded.last_seen,
             measurement_state = excluded.measurement_state,
             measurement_start_time = excluded.measurement_start_time,
             counter = excluded.counter, lp = excluded.lp, leq = excluded.leq,
             lmax = excluded.lmax, lmin = excluded.lmin, lpeak = excluded.lpeak,
             battery_level = excluded.battery_level, power_source = excluded.power_source,
             sd_remaining_mb = excluded.sd_remaining_mb, sd_free_ratio = excluded.sd_free_ratio,
             raw_payload = excluded.raw_payload, is_reachable = excluded.is_reachable,
             consecutive_failures = excluded.consecutive_failures,
             last_poll_attempt = excluded.last_poll_attempt,
             last_success = excluded.last_success, last_error = excluded.last_error,
             start_time_sync_attempted = excluded.start_time_sync_attempted",
        params![
            status.unit_id,
            status.last_seen.map(|t| t.to_rfc3339()),
            status.measurement_state.as_str(),
            status.measurement_start_time.map(|t| t.to_rfc3339()),
            status.counter,
            status.lp,
            status.leq,
            status.lmax,
            status.lmin,
            status.lpeak,
            status.battery_level,
            status.power_source,
            status.sd_remaining_mb,
            status.sd_free_ratio,
            status.raw_payload,
            status.is_reachable,
            status.consecutive_failures,
            status.last_poll_attempt.map(|t| t.to_rfc3339()),
            status.last_success.map(|t| t.to_rfc3339()),
            status.last_error,
            status.start_time_sync_attempted,
        ],
    )?;
    Ok(())
}

fn map_device_config(row: &rusqlite::Row<'_>) -> Result<DeviceConfig, rusqlite::Error> {
    Ok(DeviceConfig {
        unit_id: row.get(0)?,
        host: row.get(1)?,
        tcp_port: row.get(2)?,
        ftp_port: row.get(3)?,
        tcp_enabled: row.get(4)?,
        ftp_enabled: row.get(5)?,
        ftp_username: row.get(6)?,
        ftp_password: row.get(7)?,
        poll_interval_seconds: row.get(8)?,
        poll_enabled: row.get(9)?,
    })
}

fn map_device_status(row: &rusqlite::Row<'_>) -> Result<DeviceStatus, rusqlite::Error> {
    let parse_dt = |s: Option<String>| -> Option<DateTime<Utc>> {
        s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };
    Ok(DeviceStatus {
        unit_id: row.get(0)?,
        last_seen: parse_dt(row.get(1)?),
        measurement_state: StoredMeasurementState::parse(&row.get::<_, String>(2)?),
        measurement_start_time: parse_dt(row.get(3)?),
        counter: row.get(4)?,
        lp: row.get(5)?,
        leq: row.get(6)?,
        lmax: row.get(7)?,
        lmin: row.get(8)?,
        lpeak: row.get(9)?,
        battery_level: row.get(10)?,
        power_source: row.get(11)?,
        sd_remaining_mb: row.get(12)?,
        sd_free_ratio: row.get(13)?,
        raw_payload: row.get(14)?,
        is_reachable: row.get(15)?,
        consecutive_failures: row.get(16)?,
        last_poll_attempt: parse_dt(row.get(17)?),
        last_success: parse_dt(row.get(18)?),
        last_error: row.get(19)?,
        start_time_sync_attempted: row.get(20)?,
    })
}

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), StoreError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(StoreError::IntegrityCheckFailed(result));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;

    fn sample_device(unit_id: &str) -> DeviceConfig {
        DeviceConfig::new(unit_id, "10.0.0.5", 3001, None, true, true, None, None, None, true).unwrap()
    }

    #[test]
    fn upsert_then_get_device_round_trips() {
        let mut store = GatewayStore::open_in_memory().unwrap();
        store.upsert_device(&sample_device("NL43-001")).unwrap();
        let got = store.get_device("NL43-001").unwrap().unwrap();
        assert_eq!(got.host, "10.0.0.5");
        assert_eq!(got.tcp_port, 3001);
    }

    #[test]
    fn unknown_device_returns_none() {
        let store = GatewayStore::open_in_memory().unwrap();
        assert!(store.get_device("nope").unwrap().is_none());
    }

    #[test]
    fn delete_device_cascades_status_row() {
        let mut store = GatewayStore::open_in_memory().unwrap();
        store.upsert_device(&sample_device("NL43-001")).unwrap();
        store.ensure_status_row("NL43-001").unwrap();
        assert!(store.read_status("NL43-001").unwrap().is_some());

        assert!(store.delete_device("NL43-001").unwrap());
        assert!(store.read_status("NL43-001").unwrap().is_none());
        assert!(store.get_device("NL43-001").unwrap().is_none());
    }

    #[test]
    fn list_enabled_devices_filters_by_poll_enabled() {
        let mut store = GatewayStore::open_in_memory().unwrap();
        store.upsert_device(&sample_device("on")).unwrap();
        let mut off = sample_device("off");
        off.poll_enabled = false;
        store.upsert_device(&off).unwrap();

        let enabled = store.list_enabled_devices().unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].unit_id, "on");
    }

    #[test]
    fn record_poll_failure_increments_and_flips_reachable_at_three() {
        let mut store = GatewayStore::open_in_memory().unwrap();
        store.upsert_device(&sample_device("NL43-001")).unwrap();
        let now = Utc::now();

        store.record_poll_success("NL43-001", now).unwrap();
        assert!(store.read_status("NL43-001").unwrap().unwrap().is_reachable);

        let mut just_flipped = false;
        for _ in 0..3 {
            just_flipped = store.record_poll_failure("NL43-001", now, "boom").unwrap();
        }
        let status = store.read_status("NL43-001").unwrap().unwrap();
        assert_eq!(status.consecutive_failures, 3);
        assert!(!status.is_reachable);
        assert!(just_flipped);
    }

    #[test]
    fn record_poll_success_resets_failures_and_reachability() {
        let mut store = GatewayStore::open_in_memory().unwrap();
        store.upsert_device(&sample_device("NL43-001")).unwrap();
        let now = Utc::now();
        for _ in 0..3 {
            store.record_poll_failure("NL43-001", now, "boom").unwrap();
        }
        store.record_poll_success("NL43-001", now).unwrap();
        let status = store.read_status("NL43-001").unwrap().unwrap();
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.is_reachable);
        assert!(status.last_error.is_none());
    }

    #[test]
    fn with_transaction_rolls_back_on_error() {
        let mut store = GatewayStore::open_in_memory().unwrap();
        store.upsert_device(&sample_device("NL43-001")).unwrap();
        store.ensure_status_row("NL43-001").unwrap();

        let result: Result<(), StoreError> = store.with_transaction(|txn| {
            let mut status = txn.read_status("NL43-001").unwrap().unwrap();
            status.counter = Some("999".to_owned());
            txn.write_status(&status)?;
            Err(StoreError::UnknownDevice("force-rollback".to_owned()))
        });
        assert!(result.is_err());

        let status = store.read_status("NL43-001").unwrap().unwrap();
        assert!(status.counter.is_none(), "write must not survive a rolled-back transaction");
    }

    #[test]
    fn purge_logs_older_than_removes_only_stale_rows() {
        let mut store = GatewayStore::open_in_memory().unwrap();
        store.upsert_device(&sample_device("NL43-001")).unwrap();
        let old = Utc::now() - chrono::Duration::days(10);
        let recent = Utc::now();
        store.append_log("NL43-001", "INFO", "POLL", "old", old).unwrap();
        store.append_log("NL43-001", "INFO", "POLL", "recent", recent).unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(7);
        let removed = store.purge_logs_older_than(cutoff).unwrap();
        assert_eq!(removed, 1);
    }
}
