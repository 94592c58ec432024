//! In-memory engine used by the unit tests

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use async_trait::async_trait;
use tokio::sync::{oneshot, Semaphore};

use crate::config::OptionsConfig;
use crate::engine::{log_channel, EngineError, FileCheck, LogReceiver, LogSender, TranscodeEngine};
use crate::job::ProcessingStats;

/// Blocks a `process` call until the test releases it
pub struct Gate {
    started: Mutex<Option<oneshot::Sender<()>>>,
    release: Semaphore,
}

pub struct GateHandle {
    started: Option<oneshot::Receiver<()>>,
    gate: std::sync::Arc<Gate>,
}

impl GateHandle {
    /// Wait until `process` reached the gate; returns at once afterwards
    pub async fn wait_started(&mut self) {
        if let Some(started) = self.started.take() {
            let _ = started.await;
        }
    }

    pub fn release(&self) {
        self.gate.release.add_permits(1);
    }
}

pub struct ScriptedEngine {
    logs: LogSender,
    checks: Mutex<HashMap<String, Result<FileCheck, String>>>,
    outcomes: Mutex<HashMap<String, Result<ProcessingStats, String>>>,
    gates: Mutex<HashMap<String, std::sync::Arc<Gate>>>,
    failing_deletes: Mutex<HashSet<String>>,
    fail_cancel: Mutex<bool>,
    pub processed: Mutex<Vec<String>>,
    pub seen_options: Mutex<Vec<OptionsConfig>>,
    pub deleted: Mutex<Vec<String>>,
    pub cancels: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> (Self, LogReceiver) {
        let (logs, rx) = log_channel();
        let engine = ScriptedEngine {
            logs,
            checks: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            failing_deletes: Mutex::new(HashSet::new()),
            fail_cancel: Mutex::new(false),
            processed: Mutex::new(Vec::new()),
            seen_options: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        };
        (engine, rx)
    }

    pub fn set_check(&self, path: &str, result: Result<FileCheck, EngineError>) {
        self.checks
            .lock()
            .unwrap()
            .insert(path.to_string(), result.map_err(|e| e.to_string()));
    }

    pub fn succeed(&self, path: &str, stats: ProcessingStats) {
        self.outcomes.lock().unwrap().insert(path.to_string(), Ok(stats));
    }

    pub fn fail(&self, path: &str, message: &str) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(path.to_string(), Err(message.to_string()));
    }

    /// Hold `process(path)` until the returned handle is released
    pub fn gate(&self, path: &str) -> GateHandle {
        let (tx, rx) = oneshot::channel();
        let gate = std::sync::Arc::new(Gate {
            started: Mutex::new(Some(tx)),
            release: Semaphore::new(0),
        });
        self.gates.lock().unwrap().insert(path.to_string(), gate.clone());
        GateHandle { started: Some(rx), gate }
    }

    /// Push a line onto the log stream as if a job had printed it
    pub fn emit(&self, path: &str, message: &str) {
        self.logs.emit(path, message);
    }

    pub fn fail_delete(&self, path: &str) {
        self.failing_deletes.lock().unwrap().insert(path.to_string());
    }

    pub fn fail_cancel(&self) {
        *self.fail_cancel.lock().unwrap() = true;
    }

    pub fn processed_paths(&self) -> Vec<String> {
        self.processed.lock().unwrap().clone()
    }

    pub fn deleted_paths(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

/// Stats for a successful fake encode
pub fn stats(original_size: u64, new_size: u64, output_path: &str) -> ProcessingStats {
    ProcessingStats {
        duration_secs: 0.5,
        original_size,
        new_size,
        output_path: output_path.to_string(),
    }
}

#[async_trait]
impl TranscodeEngine for ScriptedEngine {
    async fn check_status(&self, path: &str) -> Result<FileCheck, EngineError> {
        match self.checks.lock().unwrap().get(path) {
            Some(Ok(check)) => Ok(*check),
            Some(Err(message)) => Err(EngineError::Failed(message.clone())),
            None => Ok(FileCheck::NotProcessed),
        }
    }

    async fn process(&self, path: &str, options: &OptionsConfig) -> Result<ProcessingStats, EngineError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.processed.lock().unwrap().push(path.to_string());
        self.seen_options.lock().unwrap().push(options.clone());
        self.logs.emit(path, format!("encoding {}", path));

        let gate = self.gates.lock().unwrap().get(path).cloned();
        if let Some(gate) = gate {
            if let Some(started) = gate.started.lock().unwrap().take() {
                let _ = started.send(());
            }
            let _permit = gate.release.acquire().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let outcome = self.outcomes.lock().unwrap().get(path).cloned();
        match outcome {
            Some(Ok(stats)) => Ok(stats),
            Some(Err(message)) => Err(EngineError::Failed(message)),
            None => Ok(stats(100, 50, &format!("{}.out.mp4", path))),
        }
    }

    async fn cancel(&self) -> Result<(), EngineError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if *self.fail_cancel.lock().unwrap() {
            return Err(EngineError::Failed("kill: no such process".to_string()));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), EngineError> {
        if self.failing_deletes.lock().unwrap().contains(path) {
            return Err(EngineError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied"),
            ));
        }
        self.deleted.lock().unwrap().push(path.to_string());
        Ok(())
    }
}
