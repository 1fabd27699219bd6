//! Checkpoint persistence and the run-level lock

use crate::error::{PipelineError, PipelineResult};
use crate::models::{Checkpoint, CHECKPOINT_VERSION};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Loads and atomically saves the checkpoint of one run folder
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint, `Ok(None)` if the run has none yet
    pub fn load(&self) -> PipelineResult<Option<Checkpoint>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: Checkpoint = serde_json::from_str(&content).map_err(|e| {
            PipelineError::Checkpoint(format!("{} is corrupt: {}", self.path.display(), e))
        })?;

        if checkpoint.version > CHECKPOINT_VERSION {
            return Err(PipelineError::Checkpoint(format!(
                "{} has schema version {}, this build supports up to {}",
                self.path.display(),
                checkpoint.version,
                CHECKPOINT_VERSION
            )));
        }

        Ok(Some(checkpoint))
    }

    /// Load the checkpoint or create and persist a fresh one
    pub fn load_or_init(&self) -> PipelineResult<Checkpoint> {
        if let Some(checkpoint) = self.load()? {
            tracing::debug!(
                run_id = %checkpoint.run_id,
                phase = %checkpoint.phase,
                revision = checkpoint.revision,
                "Loaded checkpoint"
            );
            return Ok(checkpoint);
        }

        let mut checkpoint = Checkpoint::new();
        self.save(&mut checkpoint)?;
        tracing::info!(run_id = %checkpoint.run_id, path = %self.path.display(), "Created checkpoint");
        Ok(checkpoint)
    }

    /// Persist the checkpoint (temp file + fsync + rename)
    pub fn save(&self, checkpoint: &mut Checkpoint) -> PipelineResult<()> {
        checkpoint.revision += 1;
        checkpoint.updated_at = Utc::now();

        let json = serde_json::to_vec_pretty(checkpoint)?;
        tagger_common::fs::write_atomic(&self.path, &json)?;

        tracing::debug!(
            phase = %checkpoint.phase,
            revision = checkpoint.revision,
            "Checkpoint saved"
        );
        Ok(())
    }
}

/// Exclusive lock on a run folder, released on drop
///
/// Held by every entry point for its whole lifetime so two invocations can
/// never race on the same checkpoint. A lock left behind by a process that
/// no longer exists (crash, kill -9) is taken over.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: impl Into<PathBuf>) -> PipelineResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        match Self::create(&path) {
            Err(PipelineError::Locked { holder, .. })
                if holder_pid(&holder).is_some_and(|pid| !process_alive(pid)) =>
            {
                tracing::warn!(
                    path = %path.display(),
                    holder = %holder,
                    "Run lock holder is no longer running, taking over stale lock"
                );
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                // Another instance may win the race for the freed lock
                Self::create(&path)
            }
            other => other,
        }
    }

    fn create(path: &Path) -> PipelineResult<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "pid={}", std::process::id())?;
                writeln!(file, "acquired_at={}", Utc::now().to_rfc3339())?;
                file.sync_all()?;
                tracing::debug!(path = %path.display(), "Run lock acquired");
                Ok(Self {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path)
                    .map(|s| s.lines().collect::<Vec<_>>().join(", "))
                    .unwrap_or_else(|_| "unknown".to_string());
                Err(PipelineError::Locked {
                    path: path.to_path_buf(),
                    holder,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `pid=N` entry of a lock file's holder description
fn holder_pid(holder: &str) -> Option<u32> {
    holder
        .split(", ")
        .find_map(|entry| entry.strip_prefix("pid="))
        .and_then(|pid| pid.trim().parse().ok())
}

fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "Failed to release run lock: {}", e);
        }
    }
}
