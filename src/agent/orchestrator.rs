//! Agent orchestrator
//!
//! The main loop. Every tick: reload settings, make sure the keepalive
//! worker is alive (restarting it when its parameters change or its
//! thread died), dispatch a backup cycle per the mode, snapshot the
//! manifest, and clear any cycle stuck past the timeout.
//!
//! The orchestrator owns its worker threads: it holds their handles,
//! restarts them on unexpected exit, and stops them at shutdown.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};

use crate::hash_index::HashIndex;
use crate::history::{HistoryStore, InitiationSource, OperationStatus, OperationType};
use crate::observability::Logger;
use crate::settings::{BackupMode, Settings};
use crate::transport::TransportClient;

use super::bridge::{CycleSummary, UiBridge};
use super::cycle::{run_cycle, CycleContext};
use super::drive_monitor::{self, SystemVolumes, VolumeLister};
use super::keepalive::{self, sleep_interruptibly, KeepaliveConfig};
use super::manifest;
use super::scheduler::{is_clock_jump, next_due};
use super::state::{BackupState, DEFAULT_CYCLE_TIMEOUT};

/// Main-loop tick interval.
pub const TICK_INTERVAL: Duration = Duration::from_secs(90);

/// Everything the agent needs, passed explicitly at startup.
pub struct AgentContext {
    pub settings_path: PathBuf,
    pub install_dir: PathBuf,
    pub hash_index: Arc<HashIndex>,
    pub history: Arc<HistoryStore>,
    pub transport: Arc<TransportClient>,
    pub ui: Arc<dyn UiBridge>,
    pub shutdown: Arc<AtomicBool>,
    pub ignore_hash_index: bool,
}

struct Worker {
    handle: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn stop_and_join(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

/// The agent main loop.
pub struct Orchestrator {
    ctx: AgentContext,
    state: Arc<BackupState>,
    tick_interval: Duration,
    cycle_timeout: Duration,
    last_check: NaiveDateTime,
    keepalive: Option<(KeepaliveConfig, Worker)>,
    drive_monitor: Option<Worker>,
}

impl Orchestrator {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            state: Arc::new(BackupState::new()),
            tick_interval: TICK_INTERVAL,
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT,
            last_check: Local::now().naive_local(),
            keepalive: None,
            drive_monitor: None,
        }
    }

    pub fn backup_state(&self) -> Arc<BackupState> {
        Arc::clone(&self.state)
    }

    /// Reposition the schedule cursor. Ticks evaluate the window
    /// (last_check, now]; tests drive this with a simulated clock.
    pub fn set_last_check(&mut self, last_check: NaiveDateTime) {
        self.last_check = last_check;
    }

    /// Run until the shutdown flag is set.
    pub fn run(&mut self) {
        self.start_drive_monitor(Arc::new(SystemVolumes));
        Logger::info(
            "agent_started",
            &[("settings", &self.ctx.settings_path.display().to_string())],
        );

        while !self.ctx.shutdown.load(Ordering::SeqCst) {
            self.tick(Local::now().naive_local());
            sleep_interruptibly(self.tick_interval, &self.ctx.shutdown);
        }

        self.stop_workers();
        Logger::info("agent_stopped", &[]);
    }

    /// One orchestrator tick at the given clock reading.
    pub fn tick(&mut self, now: NaiveDateTime) {
        if is_clock_jump(self.last_check, now) {
            // Missed triggers collapse into the next evaluation; a backward
            // jump fires nothing until the clock re-crosses an entry.
            Logger::warn(
                "clock_jump_detected",
                &[
                    ("last_check", &self.last_check.to_string()),
                    ("now", &now.to_string()),
                ],
            );
        }

        let settings = match Settings::load(&self.ctx.settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                // A transient parse failure skips the tick; external edits
                // take effect once the file is whole again.
                Logger::warn("settings_reload_failed", &[("error", &e.to_string())]);
                self.last_check = now;
                return;
            }
        };

        self.ensure_keepalive(&settings);

        match settings.backup_mode {
            BackupMode::Realtime => {
                if !self.state.in_progress() {
                    self.run_backup(&settings, "realtime", InitiationSource::Realtime);
                }
            }
            BackupMode::Scheduled => {
                let due = next_due(
                    &settings.backup_schedule,
                    self.last_check,
                    now,
                    self.state.in_progress(),
                );
                if let Some(due) = due {
                    Logger::info(
                        "schedule_triggered",
                        &[
                            ("source", due.source.as_str()),
                            ("fired_at", &due.fired_at.to_string()),
                        ],
                    );
                    self.run_backup(&settings, due.source.as_str(), InitiationSource::Scheduled);
                }
            }
        }

        if self.state.check_timeout(self.cycle_timeout) {
            Logger::error(
                "cycle_timeout",
                &[("timeout_secs", &self.cycle_timeout.as_secs().to_string())],
            );
        }

        // The cursor always advances: triggers that passed during a cycle
        // or a skipped tick are consumed, never replayed.
        self.last_check = now;
    }

    fn run_backup(&self, settings: &Settings, source_label: &str, source: InitiationSource) {
        if !self.state.start(source_label) {
            Logger::warn("cycle_overlap_skipped", &[("source", source_label)]);
            return;
        }

        let operation_id = match self.ctx.history.start_operation(
            OperationType::Backup,
            source,
            None,
        ) {
            Ok(id) => id,
            Err(e) => {
                Logger::error("history_start_failed", &[("error", &e.to_string())]);
                self.state.complete(false);
                return;
            }
        };

        let cycle_ctx = CycleContext {
            settings,
            hash_index: &self.ctx.hash_index,
            history: &self.ctx.history,
            transport: &self.ctx.transport,
            ui: self.ctx.ui.as_ref(),
            ignore_hash_index: self.ctx.ignore_hash_index,
        };
        let outcome = run_cycle(&cycle_ctx, &operation_id);

        let final_status = if outcome.success() {
            OperationStatus::Success
        } else {
            OperationStatus::Failed
        };
        if let Err(e) = self
            .ctx
            .history
            .complete_operation(&operation_id, final_status, None)
        {
            Logger::error("history_complete_failed", &[("error", &e.to_string())]);
        }
        self.state.complete(outcome.success());

        // Manifest snapshot after every cycle, success or failure.
        manifest::snapshot(
            &self.ctx.transport,
            &settings.api_key,
            &settings.agent_id,
            &self.ctx.install_dir,
        );

        self.ctx.ui.on_cycle_complete(&CycleSummary {
            source: source_label.to_string(),
            success: outcome.success(),
            files_attempted: outcome.attempted,
            files_failed: outcome.failed,
        });
    }

    /// Keep the keepalive worker running with the current settings;
    /// restart it when the parameters change or the thread exited.
    fn ensure_keepalive(&mut self, settings: &Settings) {
        let desired = KeepaliveConfig {
            freq_seconds: settings.keepalive_freq_seconds,
            api_key: settings.api_key.clone(),
            agent_id: settings.agent_id.clone(),
        };

        let needs_spawn = match &self.keepalive {
            Some((config, worker)) => *config != desired || worker.handle.is_finished(),
            None => true,
        };
        if !needs_spawn {
            return;
        }

        if let Some((_, worker)) = self.keepalive.take() {
            worker.stop_and_join();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = keepalive::spawn(
            desired.clone(),
            Arc::clone(&self.ctx.transport),
            Arc::clone(&self.ctx.history),
            Arc::clone(&self.ctx.ui),
            Arc::clone(&stop),
        );
        self.keepalive = Some((desired, Worker { handle, stop }));
    }

    fn start_drive_monitor(&mut self, lister: Arc<dyn VolumeLister>) {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = drive_monitor::spawn(
            self.ctx.settings_path.clone(),
            lister,
            Arc::clone(&self.ctx.ui),
            Arc::clone(&stop),
        );
        self.drive_monitor = Some(Worker { handle, stop });
    }

    /// Stop and join all owned workers.
    pub fn stop_workers(&mut self) {
        if let Some((_, worker)) = self.keepalive.take() {
            worker.stop_and_join();
        }
        if let Some(worker) = self.drive_monitor.take() {
            worker.stop_and_join();
        }
    }
}
