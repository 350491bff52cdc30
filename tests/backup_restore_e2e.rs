//! End-to-End Backup/Restore Scenarios
//!
//! Drives the real router over a loopback listener with the real
//! transport client:
//! - First backup, unchanged re-run, content changed twice (version
//!   rotation observed on the server's disk).
//! - Queue-for-restore round trip through the keepalive channel, with
//!   acknowledgment clearing the queue.
//! - Byte-exact round trip for non-ASCII and backslash paths.
//! - Chunked restore with monotonic progress.

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use stormcloud::agent::restore::{RestoreWorker, SINGLE_SHOT_LIMIT};
use stormcloud::agent::{run_cycle, CycleContext, CycleSummary, DrivePromptAnswer, UiBridge};
use stormcloud::hash_index::{sha256_file, HashIndex};
use stormcloud::history::{
    HistoryStore, InitiationSource, OperationStatus, OperationType,
};
use stormcloud::protocol::request::DeviceSurvey;
use stormcloud::protocol::ClientPath;
use stormcloud::server::{BackupServer, ServerConfig, StorageLayout};
use stormcloud::settings::Settings;
use stormcloud::transport::{ErrorKind, RetryPolicy, TransportClient};
use tempfile::TempDir;

struct TestServer {
    base_url: String,
    storage: StorageLayout,
    _dir: TempDir,
}

fn start_server() -> TestServer {
    let dir = TempDir::new().unwrap();
    let storage_root = dir.path().join("storage");

    let config: ServerConfig = serde_json::from_value(serde_json::json!({
        "storage_root": storage_root,
        "db_path": dir.path().join("catalog.db"),
        "api_keys": [{"api_key": "key-1", "customer_id": 1}]
    }))
    .unwrap();
    let max_versions = config.max_versions;
    let router = BackupServer::new(config).unwrap().router();

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let listener = runtime
        .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
        .unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        runtime.block_on(async move {
            axum::serve(listener, router).await.unwrap();
        });
    });

    TestServer {
        base_url: format!("http://{}", addr),
        storage: StorageLayout::new(storage_root, max_versions),
        _dir: dir,
    }
}

struct TestAgent {
    transport: TransportClient,
    hash_index: HashIndex,
    history: HistoryStore,
    settings: Settings,
    data_root: PathBuf,
    _dir: TempDir,
}

fn register_agent(server: &TestServer) -> TestAgent {
    let dir = TempDir::new().unwrap();
    let data_root = dir.path().join("root");
    fs::create_dir_all(&data_root).unwrap();

    let transport =
        TransportClient::with_retry(&server.base_url, RetryPolicy::none()).unwrap();
    let registration = transport
        .register_device(
            "key-1",
            DeviceSurvey {
                device_name: "test-device".into(),
                ip_address: "127.0.0.1".into(),
                device_type: "workstation".into(),
                operating_system: "linux".into(),
                device_status: 0,
            },
        )
        .unwrap();
    assert!(!registration.secret_key.is_empty());

    let mut settings = Settings::new("key-1", registration.agent_id);
    settings.backup_paths.push(data_root.clone());

    TestAgent {
        transport,
        hash_index: HashIndex::open(&dir.path().join("schash.db")).unwrap(),
        history: HistoryStore::open(&dir.path().join("history.db")).unwrap(),
        settings,
        data_root,
        _dir: dir,
    }
}

#[derive(Default)]
struct ProgressCapture {
    percents: Mutex<Vec<u8>>,
}

impl UiBridge for ProgressCapture {
    fn on_progress(&self, _file: &str, percent: u8) {
        self.percents.lock().unwrap().push(percent);
    }
    fn on_cycle_complete(&self, _summary: &CycleSummary) {}
    fn on_drive_detected(&self, _volume: &std::path::Path) -> DrivePromptAnswer {
        DrivePromptAnswer::Decline
    }
    fn notify(&self, _title: &str, _message: &str) {}
}

/// Run one realtime cycle with full history bookkeeping; returns the
/// operation id.
fn run_one_cycle(agent: &TestAgent, ui: &dyn UiBridge) -> String {
    let operation_id = agent
        .history
        .start_operation(OperationType::Backup, InitiationSource::Realtime, None)
        .unwrap();

    let ctx = CycleContext {
        settings: &agent.settings,
        hash_index: &agent.hash_index,
        history: &agent.history,
        transport: &agent.transport,
        ui,
        ignore_hash_index: false,
    };
    let outcome = run_cycle(&ctx, &operation_id);

    let status = if outcome.success() {
        OperationStatus::Success
    } else {
        OperationStatus::Failed
    };
    agent
        .history
        .complete_operation(&operation_id, status, None)
        .unwrap();
    operation_id
}

fn server_path_for(server: &TestServer, local: &std::path::Path) -> PathBuf {
    // First registered device in a fresh catalog gets id 1.
    server
        .storage
        .server_path(1, 1, &ClientPath::new(local.display().to_string()))
}

#[test]
fn test_first_backup_then_unchanged_then_changed_twice() {
    let server = start_server();
    let agent = register_agent(&server);
    let ui = ProgressCapture::default();

    let local = agent.data_root.join("a.txt");
    fs::write(&local, b"hello").unwrap();

    // E1: first backup.
    let op1 = run_one_cycle(&agent, &ui);
    let op = agent.history.get_operation(&op1).unwrap();
    assert_eq!(op.status, OperationStatus::Success);
    assert_eq!(op.source, InitiationSource::Realtime);
    assert_eq!(op.files.len(), 1);
    assert_eq!(op.files[0].status, OperationStatus::Success);

    let stored = server_path_for(&server, &local);
    assert_eq!(fs::read(&stored).unwrap(), b"hello");

    // Hash-index consistency: lookup digest == sha256 of contents.
    let entry = agent
        .hash_index
        .lookup(&local.display().to_string())
        .unwrap()
        .unwrap();
    assert_eq!(entry.digest, sha256_file(&local).unwrap());

    // E2: unchanged re-run records nothing.
    let op2 = run_one_cycle(&agent, &ui);
    let op = agent.history.get_operation(&op2).unwrap();
    assert_eq!(op.status, OperationStatus::Success);
    assert!(op.files.is_empty());
    assert_eq!(fs::read(&stored).unwrap(), b"hello");

    // E3: change twice; versions rotate on the server.
    fs::write(&local, b"world").unwrap();
    run_one_cycle(&agent, &ui);
    fs::write(&local, b"!").unwrap();
    run_one_cycle(&agent, &ui);

    assert_eq!(fs::read(&stored).unwrap(), b"!");
    assert_eq!(
        fs::read(server.storage.version_path(&stored, 2)).unwrap(),
        b"world"
    );
    assert_eq!(
        fs::read(server.storage.version_path(&stored, 3)).unwrap(),
        b"hello"
    );

    // Progress reports never decrease within this small cycle set.
    let percents = ui.percents.lock().unwrap();
    assert!(percents.iter().all(|p| *p == 100));
}

#[test]
fn test_queue_restore_round_trip_with_acknowledgment() {
    let server = start_server();
    let agent = register_agent(&server);
    let ui = ProgressCapture::default();

    let local = agent.data_root.join("a.txt");
    fs::write(&local, b"precious bytes").unwrap();
    run_one_cycle(&agent, &ui);

    let posix = ClientPath::new(local.display().to_string()).as_posix();
    let api_key = &agent.settings.api_key;
    let agent_id = &agent.settings.agent_id;

    // Management side queues the file for restore.
    let http = reqwest::blocking::Client::new();
    let response = http
        .post(format!("{}/api/queue-file-for-restore", server.base_url))
        .json(&serde_json::json!({
            "request_type": "queue_file_for_restore",
            "api_key": api_key,
            "agent_id": agent_id,
            "file_path": posix,
        }))
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    // Queueing an unknown file is a 400.
    let response = http
        .post(format!("{}/api/queue-file-for-restore", server.base_url))
        .json(&serde_json::json!({
            "request_type": "queue_file_for_restore",
            "api_key": api_key,
            "agent_id": agent_id,
            "file_path": "/never/backed/up.txt",
        }))
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    // The next keepalive carries the queue entry.
    let keepalive = agent.transport.keepalive(api_key, agent_id).unwrap();
    assert_eq!(keepalive.restore_queue.len(), 1);
    assert_eq!(keepalive.restore_queue[0].path, posix);

    // The local copy was lost; restore brings it back byte-identical.
    fs::remove_file(&local).unwrap();
    let worker = RestoreWorker {
        transport: &agent.transport,
        api_key,
        agent_id,
        ui: &ui,
    };
    worker.restore_entry(&keepalive.restore_queue[0]).unwrap();
    assert_eq!(fs::read(&local).unwrap(), b"precious bytes");

    // History records a restore operation for the file.
    let operation_id = agent
        .history
        .start_operation(OperationType::Restore, InitiationSource::User, None)
        .unwrap();
    agent
        .history
        .add_file_record(&operation_id, &posix, OperationStatus::Success, None)
        .unwrap();
    agent
        .history
        .complete_operation(&operation_id, OperationStatus::Success, None)
        .unwrap();
    assert_eq!(
        agent.history.list_history(OperationType::Restore, 0, 10).unwrap().len(),
        1
    );

    // Acknowledgment empties the queue; until then it would persist.
    agent
        .transport
        .mark_file_restored(api_key, agent_id, &posix)
        .unwrap();
    let keepalive = agent.transport.keepalive(api_key, agent_id).unwrap();
    assert!(keepalive.restore_queue.is_empty());
}

#[test]
fn test_non_ascii_backslash_path_round_trip() {
    let server = start_server();
    let agent = register_agent(&server);

    let local = agent.data_root.join("файл résumé.txt");
    let body = "grüße, мир\n".repeat(100);
    fs::write(&local, &body).unwrap();

    // Upload under a Windows-style client path; the raw bytes must
    // survive the base64 round trip and the server must normalize the
    // backslashes for layout.
    let client_path = ClientPath::new("C:\\Users\\юзер\\Documents\\файл résumé.txt");
    agent
        .transport
        .upload_small(
            &agent.settings.api_key,
            &agent.settings.agent_id,
            &client_path,
            &local,
        )
        .unwrap();

    let stored = server
        .storage
        .server_path(1, 1, &client_path);
    assert!(stored.ends_with("C:/Users/юзер/Documents/файл résumé.txt"));
    assert_eq!(fs::read(&stored).unwrap(), body.as_bytes());

    let restored = agent
        .transport
        .restore(
            &agent.settings.api_key,
            &agent.settings.agent_id,
            &client_path,
            None,
        )
        .unwrap();
    assert_eq!(restored, body.as_bytes());
}

#[test]
fn test_chunked_restore_with_monotonic_progress() {
    let server = start_server();
    let agent = register_agent(&server);
    let ui = ProgressCapture::default();

    // Just past the single-shot limit: two ranged chunks.
    let size = SINGLE_SHOT_LIMIT as usize + 4096;
    let body: Vec<u8> = (0..size).map(|i| (i % 241) as u8).collect();
    let local = agent.data_root.join("big.bin");
    fs::write(&local, &body).unwrap();

    run_one_cycle(&agent, &ui);

    fs::remove_file(&local).unwrap();
    ui.percents.lock().unwrap().clear();
    let posix = ClientPath::new(local.display().to_string()).as_posix();
    let worker = RestoreWorker {
        transport: &agent.transport,
        api_key: &agent.settings.api_key,
        agent_id: &agent.settings.agent_id,
        ui: &ui,
    };
    worker
        .restore_entry(&stormcloud::protocol::response::RestoreQueueEntry {
            path: posix,
            version_id: None,
        })
        .unwrap();

    assert_eq!(fs::read(&local).unwrap(), body);
    // No resume debris is left behind.
    assert!(!local.with_extension("bin.temp").exists());
    assert!(!PathBuf::from(format!("{}.temp.progress", local.display())).exists());

    let percents = ui.percents.lock().unwrap();
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*percents.last().unwrap(), 100);
}

#[test]
fn test_restore_by_version_id() {
    let server = start_server();
    let agent = register_agent(&server);
    let ui = ProgressCapture::default();

    let local = agent.data_root.join("a.txt");
    fs::write(&local, b"old content").unwrap();
    run_one_cycle(&agent, &ui);
    fs::write(&local, b"new content").unwrap();
    run_one_cycle(&agent, &ui);

    let api_key = &agent.settings.api_key;
    let agent_id = &agent.settings.agent_id;
    let records = agent.transport.file_metadata(api_key, agent_id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].versions.len(), 2);

    let client_path = ClientPath::new(local.display().to_string());
    let newest = &records[0].versions[0].version_id;
    let prior = &records[0].versions[1].version_id;

    let bytes = agent
        .transport
        .restore(api_key, agent_id, &client_path, Some(newest))
        .unwrap();
    assert_eq!(bytes, b"new content");

    let bytes = agent
        .transport
        .restore(api_key, agent_id, &client_path, Some(prior))
        .unwrap();
    assert_eq!(bytes, b"old content");
}

#[test]
fn test_auth_failures_are_not_retried_and_surface_as_auth() {
    let server = start_server();
    let agent = register_agent(&server);

    let err = agent
        .transport
        .keepalive("wrong-key", &agent.settings.agent_id)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Auth);

    let err = agent
        .transport
        .keepalive(&agent.settings.api_key, "unknown-agent")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Auth);
}

#[test]
fn test_sanitized_fields_rejected() {
    let server = start_server();
    register_agent(&server);

    let http = reqwest::blocking::Client::new();
    let response = http
        .post(format!("{}/api/validate-api-key", server.base_url))
        .json(&serde_json::json!({
            "request_type": "validate_api_key",
            "api_key": "key-1'; DROP TABLE api_keys; --",
        }))
        .send()
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}
