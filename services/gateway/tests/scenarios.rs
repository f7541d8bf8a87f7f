//! The literal end-to-end scenarios: each test reconstructs one of the
//! worked examples against real stub servers rather than asserting on
//! implementation internals.

use chrono::{DateTime, TimeZone, Utc};
use slm_core::{GatewayStore, StoredMeasurementState};
use slm_device::{CallError, DeviceClient, DeviceLockTable, FtpCredentials, RateGovernor};
use slm_merge::{apply_snapshot, synchronize_start_time, Observation};
use slm_orchestrator::{start_cycle, CycleTarget, StartCycleOptions};
use slm_protocol::{commands, MeasurementState};
use slm_test_support::ftp::FixtureEntry;
use slm_test_support::{spawn_mock_ftp, spawn_mock_tcp, FtpFixture, TcpFixture};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn client() -> DeviceClient {
    DeviceClient::new(Arc::new(RateGovernor::new()), Arc::new(DeviceLockTable::new()))
}

/// Scenario 1: two `DOD?` calls issued back-to-back must be spaced at
/// least `RateGovernor::MIN_INTERVAL` apart, and both still succeed.
#[tokio::test]
async fn rate_limit_spaces_back_to_back_calls() {
    let fixture = TcpFixture::new().on(commands::live_sample(), b"R+0000\r\n1,2,3,4,5,6\r\n".to_vec());
    let (host, port, _handle) = spawn_mock_tcp(fixture).await;
    let client = client();

    let start = Instant::now();
    client
        .call("u1", &host, port, &commands::live_sample(), Duration::from_secs(5))
        .await
        .unwrap();
    client
        .call("u1", &host, port, &commands::live_sample(), Duration::from_secs(5))
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= RateGovernor::MIN_INTERVAL, "expected >= 1000ms spacing, got {elapsed:?}");
}

/// Scenario 2: two concurrent `DOD?` calls against a stub that refuses a
/// second concurrent connect must still both succeed, serialized by the
/// device lock, with no connect error surfacing.
#[tokio::test]
async fn single_session_is_enforced_against_a_single_connection_stub() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let busy = Arc::new(AtomicBool::new(false));

    let busy_for_server = busy.clone();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            if busy_for_server.swap(true, Ordering::SeqCst) {
                // A second concurrent connection arrived; refuse it by
                // closing immediately, which the client sees as a connect
                // or read failure — the test fails if this ever happens.
                drop(socket);
                continue;
            }
            let busy_for_server = busy_for_server.clone();
            tokio::spawn(async move {
                use tokio::io::{AsyncReadExt, AsyncWriteExt};
                let mut buf = vec![0u8; 64];
                let _ = socket.read(&mut buf).await;
                tokio::time::sleep(Duration::from_millis(50)).await;
                let _ = socket.write_all(b"R+0000\r\n1,2,3,4,5,6\r\n").await;
                busy_for_server.store(false, Ordering::SeqCst);
            });
        }
    });

    let client = Arc::new(client());
    let host = addr.ip().to_string();
    let port = addr.port();

    let c1 = client.clone();
    let h1 = host.clone();
    let first = tokio::spawn(async move {
        c1.call("u1", &h1, port, &commands::live_sample(), Duration::from_secs(5)).await
    });
    let c2 = client.clone();
    let h2 = host.clone();
    let second = tokio::spawn(async move {
        c2.call("u1", &h2, port, &commands::live_sample(), Duration::from_secs(5)).await
    });

    let (r1, r2) = (first.await.unwrap(), second.await.unwrap());
    assert!(r1.is_ok(), "first call failed: {r1:?}");
    assert!(r2.is_ok(), "second call failed: {r2:?}");
    assert!(!matches!(r1, Err(CallError::Device(_))));
    assert!(!matches!(r2, Err(CallError::Device(_))));
}

/// Scenario 3: merging states `Stop, Stop, Start, Start, Stop` leaves
/// `measurement_start_time` set to the wall time of the first `Start` and
/// clears it again once the session ends.
#[tokio::test]
async fn state_transition_tracks_start_time_across_a_session() {
    let mut store = GatewayStore::open_in_memory().unwrap();
    let config = slm_core::DeviceConfig::new("u1", "127.0.0.1", 3001, None, true, true, None, None, None, true).unwrap();
    store.upsert_device(&config).unwrap();
    let times: Vec<DateTime<Utc>> = (0..5).map(|i| Utc.timestamp_opt(1_700_000_000 + i * 60, 0).unwrap()).collect();
    let states = [
        MeasurementState::Stop,
        MeasurementState::Stop,
        MeasurementState::Start,
        MeasurementState::Start,
        MeasurementState::Stop,
    ];

    let snapshot = slm_protocol::parse_payload("1,2,3,4,5,6").unwrap();
    let mut after_step3 = None;
    let mut last = None;
    for (i, (state, t)) in states.into_iter().zip(times.iter()).enumerate() {
        let observation = Observation { snapshot: snapshot.clone(), state };
        let status = apply_snapshot(&mut store, "u1", &observation, *t).unwrap();
        if i == 2 {
            after_step3 = Some(status.clone());
        }
        last = Some(status);
    }

    // After step 3 (the first Start), start time equals t2.
    assert_eq!(after_step3.unwrap().measurement_start_time, Some(times[2]));

    // After step 5 (the final Stop), start time is absent again.
    assert_eq!(last.unwrap().measurement_start_time, None);
}

/// Scenario 4: `Overwrite?` reports `Exist` for the first two candidate
/// indexes past the current one, then `None`; the cycle reports
/// `old_index=7, new_index=10, attempts=3`.
#[tokio::test]
async fn index_rotation_skips_occupied_slots() {
    let fixture = TcpFixture::new()
        .on("Clock,2024/01/07 10:00:00", b"R+0000\r\n".to_vec())
        .on("Store Name?", b"R+0000\r\n0007\r\n".to_vec())
        .on("Store Name,0008", b"R+0000\r\n".to_vec())
        .on("Store Name,0009", b"R+0000\r\n".to_vec())
        .on("Store Name,0010", b"R+0000\r\n".to_vec())
        .on("Overwrite?", b"R+0000\r\nExist\r\n".to_vec())
        .on("Overwrite?", b"R+0000\r\nExist\r\n".to_vec())
        .on("Overwrite?", b"R+0000\r\nNone\r\n".to_vec())
        .on("Measure,Start", b"R+0000\r\n".to_vec());
    let (host, port, _handle) = spawn_mock_tcp(fixture).await;

    let target = CycleTarget {
        unit_id: "u1",
        host: &host,
        tcp_port: port,
        ftp_port: 21,
        ftp_username: "USER",
        ftp_password: "0000",
    };
    let now = "2024-01-07T10:00:00Z".parse().unwrap();
    let report = start_cycle(&client(), &target, now, StartCycleOptions::default()).await.unwrap();

    assert_eq!(report.old_index, 7);
    assert_eq!(report.new_index, 10);
    assert_eq!(report.attempts, 3);
}

/// Scenario 5: downloading a folder containing `a.bin` and `b/c.bin`
/// produces a ZIP with exactly those two entries, rooted at the folder
/// name, with matching byte counts.
#[tokio::test]
async fn folder_download_produces_the_expected_zip_entries() {
    let a_bytes = vec![1u8, 2, 3];
    let c_bytes = vec![4u8, 5, 6, 7, 8];

    let fixture = FtpFixture::new()
        .with_dir(
            "/NL-43/Auto_0010",
            vec![
                FixtureEntry { name: "a.bin".to_owned(), is_dir: false, raw_mtime: "Jan 07 14:23".to_owned() },
                FixtureEntry { name: "b".to_owned(), is_dir: true, raw_mtime: "Jan 07 14:23".to_owned() },
            ],
        )
        .with_dir(
            "/NL-43/Auto_0010/b",
            vec![FixtureEntry { name: "c.bin".to_owned(), is_dir: false, raw_mtime: "Jan 07 14:23".to_owned() }],
        )
        .with_file("/NL-43/Auto_0010/a.bin", a_bytes.clone())
        .with_file("/NL-43/Auto_0010/b/c.bin", c_bytes.clone());
    let (host, port, _handle) = spawn_mock_ftp(fixture).await;

    let creds = FtpCredentials {
        host: &host,
        port,
        username: "USER",
        password: "0000",
    };
    let dest = tempfile::NamedTempFile::new().unwrap();
    let report = slm_device::download_folder_as_zip(&creds, "/NL-43/Auto_0010", dest.path(), Duration::from_secs(5))
        .await
        .unwrap();

    let mut archived = report.archived.clone();
    archived.sort();
    assert_eq!(archived, vec!["a.bin".to_owned(), "b/c.bin".to_owned()]);
    assert!(report.failed.is_empty());
    assert_eq!(report.zip_bytes, a_bytes.len() + c_bytes.len());

    let zip_on_disk = std::fs::metadata(dest.path()).unwrap();
    assert!(zip_on_disk.len() > 0, "zip file should be non-empty");
}

/// Scenario 6: a device stuck in `Start` with no recorded start time
/// recovers it from the newest `Auto_NNNN` folder's FTP mtime, adjusted
/// for the configured timezone offset.
#[tokio::test]
async fn start_time_recovers_from_the_newest_ftp_folder() {
    let tcp_fixture = TcpFixture::new()
        .on("FTP,Off", b"R+0000\r\n".to_vec())
        .on("FTP,On", b"R+0000\r\n".to_vec())
        .on("FTP?", b"R+0000\r\nOn\r\n".to_vec());
    let (tcp_host, tcp_port, _tcp_handle) = spawn_mock_tcp(tcp_fixture).await;

    let ftp_fixture = FtpFixture::new().with_dir(
        "/NL-43",
        vec![
            FixtureEntry { name: "Auto_0009".to_owned(), is_dir: true, raw_mtime: "Jan 07 14:23".to_owned() },
            FixtureEntry { name: "Auto_0010".to_owned(), is_dir: true, raw_mtime: "Jan 07 15:00".to_owned() },
        ],
    );
    let (ftp_host, ftp_port, _ftp_handle) = spawn_mock_ftp(ftp_fixture).await;
    assert_eq!(tcp_host, ftp_host);

    let mut store = GatewayStore::open_in_memory().unwrap();
    let config = slm_core::DeviceConfig::new(
        "u1",
        &tcp_host,
        tcp_port,
        Some(ftp_port),
        true,
        true,
        Some("USER".to_owned()),
        Some("0000".to_owned()),
        None,
        true,
    )
    .unwrap();
    store.upsert_device(&config).unwrap();
    store.ensure_status_row("u1").unwrap();
    let mut status = store.read_status("u1").unwrap().unwrap();
    status.measurement_state = StoredMeasurementState::Start;
    store.write_status(&status).unwrap();

    let now = "2026-01-08T00:00:00Z".parse().unwrap();
    let outcome = synchronize_start_time(&mut store, &client(), &config, -5.0, now).await.unwrap();

    let expected: DateTime<Utc> = "2026-01-07T20:00:00Z".parse().unwrap();
    assert_eq!(outcome, slm_merge::SyncOutcome::Synchronized(expected));

    let status = store.read_status("u1").unwrap().unwrap();
    assert_eq!(status.measurement_start_time, Some(expected));
    assert!(status.start_time_sync_attempted);
}
