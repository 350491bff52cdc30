//! One backup cycle
//!
//! Walks the configured roots, consults the hash index per file, uploads
//! what changed, and records the outcome of every attempted file in
//! history. Unchanged files leave no trace. A cycle with nothing to do is
//! a success.

use std::fs;
use std::path::{Path, PathBuf};

use crate::hash_index::{FileDisposition, FileState, HashIndex};
use crate::history::{HistoryStore, OperationStatus};
use crate::observability::Logger;
use crate::protocol::ClientPath;
use crate::settings::Settings;
use crate::transport::TransportClient;

use super::bridge::UiBridge;

/// Tally of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub attempted: u32,
    pub failed: u32,
}

impl CycleOutcome {
    /// A cycle succeeds iff no attempted file failed. Zero attempts count
    /// as success.
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Everything a cycle needs, passed explicitly.
pub struct CycleContext<'a> {
    pub settings: &'a Settings,
    pub hash_index: &'a HashIndex,
    pub history: &'a HistoryStore,
    pub transport: &'a TransportClient,
    pub ui: &'a dyn UiBridge,
    /// Upload everything regardless of the index (`--ignore-hash-db`).
    pub ignore_hash_index: bool,
}

/// Run one cycle under an already-started history operation.
pub fn run_cycle(ctx: &CycleContext<'_>, operation_id: &str) -> CycleOutcome {
    let mut outcome = CycleOutcome::default();

    let walk = discover_files(ctx.settings);
    for (root, error) in &walk.root_errors {
        outcome.attempted += 1;
        outcome.failed += 1;
        record(ctx, operation_id, root, OperationStatus::Failed, Some(error));
    }

    let total = walk.files.len();
    for (i, file) in walk.files.iter().enumerate() {
        process_file(ctx, operation_id, file, &mut outcome);
        let percent = (((i + 1) * 100) / total.max(1)) as u8;
        ctx.ui
            .on_progress(&posix_display(file), percent);
    }

    outcome
}

fn process_file(
    ctx: &CycleContext<'_>,
    operation_id: &str,
    file: &Path,
    outcome: &mut CycleOutcome,
) {
    let state = if ctx.ignore_hash_index {
        match FileState::observe(file) {
            Ok(state) => state,
            Err(e) => {
                outcome.attempted += 1;
                outcome.failed += 1;
                record(ctx, operation_id, file, OperationStatus::Failed, Some(&e.to_string()));
                return;
            }
        }
    } else {
        match ctx.hash_index.evaluate(file) {
            Ok((FileDisposition::Unchanged, _)) => return,
            Ok((FileDisposition::Upload, state)) => state,
            Err(e) => {
                outcome.attempted += 1;
                outcome.failed += 1;
                record(ctx, operation_id, file, OperationStatus::Failed, Some(&e.to_string()));
                return;
            }
        }
    };

    outcome.attempted += 1;
    let client_path = ClientPath::new(posix_display(file));

    match ctx.transport.ship_file(
        &ctx.settings.api_key,
        &ctx.settings.agent_id,
        &client_path,
        file,
    ) {
        Ok(()) => {
            record(ctx, operation_id, file, OperationStatus::Success, None);
            // Index update happens only after the server acknowledged the
            // upload; a failure above leaves the old entry so the file is
            // retried next cycle.
            if let Err(e) = ctx.hash_index.record(
                &file.display().to_string(),
                &state.digest,
                state.size,
                state.mtime_ns,
            ) {
                Logger::error(
                    "hash_index_update_failed",
                    &[("file", &posix_display(file)), ("error", &e.to_string())],
                );
            }
        }
        Err(e) => {
            outcome.failed += 1;
            record(ctx, operation_id, file, OperationStatus::Failed, Some(&e.to_string()));
        }
    }
}

fn record(
    ctx: &CycleContext<'_>,
    operation_id: &str,
    file: &Path,
    status: OperationStatus,
    error: Option<&str>,
) {
    if let Err(e) = ctx
        .history
        .add_file_record(operation_id, &posix_display(file), status, error)
    {
        Logger::error(
            "history_record_failed",
            &[("file", &posix_display(file)), ("error", &e.to_string())],
        );
    }
}

fn posix_display(path: &Path) -> String {
    ClientPath::new(path.display().to_string()).as_posix()
}

/// Result of walking the configured roots.
#[derive(Debug, Default)]
pub struct WalkResult {
    pub files: Vec<PathBuf>,
    /// Roots that could not be read, with the error text.
    pub root_errors: Vec<(PathBuf, String)>,
}

/// Discover regular files: `backup_paths` to depth 1, recursive roots
/// depth-first, in configured order.
pub fn discover_files(settings: &Settings) -> WalkResult {
    let mut result = WalkResult::default();

    for root in &settings.backup_paths {
        scan_root(root, false, &mut result);
    }
    for root in &settings.recursive_backup_paths {
        scan_root(root, true, &mut result);
    }

    result
}

fn scan_root(root: &Path, recursive: bool, result: &mut WalkResult) {
    if root.is_file() {
        result.files.push(root.to_path_buf());
        return;
    }
    if !root.is_dir() {
        result
            .root_errors
            .push((root.to_path_buf(), "path does not exist".to_string()));
        return;
    }

    if recursive {
        walk_recursive(root, result);
    } else {
        match list_files(root) {
            Ok(mut files) => result.files.append(&mut files),
            Err(e) => result.root_errors.push((root.to_path_buf(), e.to_string())),
        }
    }
}

fn walk_recursive(root: &Path, result: &mut WalkResult) {
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                result.root_errors.push((dir, e.to_string()));
                continue;
            }
        };

        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        dirs.sort();

        result.files.append(&mut files);
        // Reverse so the stack pops directories in sorted order.
        stack.extend(dirs.into_iter().rev());
    }
}

fn list_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}
