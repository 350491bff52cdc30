//! Keepalive worker
//!
//! Background thread that pings the server every `keepalive_freq_seconds`
//! and drains the restore queue the response carries. The orchestrator
//! owns the handle and restarts the worker if it ever exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::history::{HistoryStore, InitiationSource, OperationStatus, OperationType};
use crate::observability::Logger;
use crate::transport::TransportClient;

use super::bridge::UiBridge;
use super::restore::RestoreWorker;

/// Worker parameters, captured at spawn time. The orchestrator respawns
/// the worker when settings change the frequency or credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub freq_seconds: u64,
    pub api_key: String,
    pub agent_id: String,
}

/// Spawn the keepalive loop. The thread exits when `shutdown` is set.
pub fn spawn(
    config: KeepaliveConfig,
    transport: Arc<TransportClient>,
    history: Arc<HistoryStore>,
    ui: Arc<dyn UiBridge>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        Logger::info(
            "keepalive_worker_started",
            &[("freq_seconds", &config.freq_seconds.to_string())],
        );

        while !shutdown.load(Ordering::SeqCst) {
            ping_once(&config, &transport, &history, ui.as_ref());
            sleep_interruptibly(Duration::from_secs(config.freq_seconds), &shutdown);
        }
    })
}

fn ping_once(
    config: &KeepaliveConfig,
    transport: &TransportClient,
    history: &HistoryStore,
    ui: &dyn UiBridge,
) {
    let response = match transport.keepalive(&config.api_key, &config.agent_id) {
        Ok(response) => response,
        Err(e) => {
            Logger::warn("keepalive_failed", &[("error", &e.to_string())]);
            return;
        }
    };

    if response.restore_queue.is_empty() {
        return;
    }

    let operation_id = match history.start_operation(
        OperationType::Restore,
        InitiationSource::User,
        None,
    ) {
        Ok(id) => id,
        Err(e) => {
            Logger::error("history_start_failed", &[("error", &e.to_string())]);
            return;
        }
    };

    let worker = RestoreWorker {
        transport,
        api_key: &config.api_key,
        agent_id: &config.agent_id,
        ui,
    };

    let mut restored = 0u32;
    let mut failed = 0u32;

    for entry in &response.restore_queue {
        match worker.restore_entry(entry) {
            Ok(()) => {
                restored += 1;
                let _ = history.add_file_record(
                    &operation_id,
                    &entry.path,
                    OperationStatus::Success,
                    None,
                );
                // Acknowledge so the server clears the queue entry; if
                // this call fails the entry returns on the next keepalive
                // and the restore re-runs, which is harmless.
                if let Err(e) =
                    transport.mark_file_restored(&config.api_key, &config.agent_id, &entry.path)
                {
                    Logger::warn(
                        "restore_ack_failed",
                        &[("path", &entry.path), ("error", &e.to_string())],
                    );
                }
            }
            Err(e) => {
                failed += 1;
                let _ = history.add_file_record(
                    &operation_id,
                    &entry.path,
                    OperationStatus::Failed,
                    Some(&e.to_string()),
                );
                Logger::warn(
                    "restore_failed",
                    &[("path", &entry.path), ("error", &e.to_string())],
                );
            }
        }
    }

    let final_status = if failed == 0 {
        OperationStatus::Success
    } else {
        OperationStatus::Failed
    };
    let _ = history.complete_operation(&operation_id, final_status, None);

    if restored > 0 {
        ui.notify(
            "Stormcloud restore complete",
            &format!("Finished restoring {} files!", restored),
        );
    }
}

/// Sleep in one-second slices so shutdown is honored promptly.
pub fn sleep_interruptibly(total: Duration, shutdown: &AtomicBool) {
    let mut remaining = total;
    while remaining > Duration::ZERO && !shutdown.load(Ordering::SeqCst) {
        let slice = remaining.min(Duration::from_secs(1));
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}
