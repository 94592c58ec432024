use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::OptionsConfig;
use crate::job::ProcessingStats;

/// Errors surfaced by a transcoding engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Failed(String),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {message}")]
    Catalog {
        path: String,
        line: usize,
        message: String,
    },
    #[error("invalid input path: {0}")]
    InvalidPath(String),
    #[error("unknown {kind}: {name}")]
    Unknown { kind: &'static str, name: String },
}

impl EngineError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::Io { path: path.into(), source }
    }
}

/// Result of asking whether a file was already processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCheck {
    NotProcessed,
    /// Output of an earlier run, never dispatched again
    Processed,
    /// Carries a processed tag; reprocessing needs the user's go-ahead
    NeedsConfirmation,
}

/// One log line emitted by the engine for a given input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub path: String,
    pub message: String,
}

impl LogEvent {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        LogEvent { path: path.into(), message: message.into() }
    }
}

/// Sending half of the engine's log stream
#[derive(Debug, Clone)]
pub struct LogSender {
    tx: mpsc::UnboundedSender<LogEvent>,
}

impl LogSender {
    /// Emit a line; dropped silently once nobody listens anymore
    pub fn emit(&self, path: &str, message: impl Into<String>) {
        let _ = self.tx.send(LogEvent::new(path, message));
    }
}

pub type LogReceiver = mpsc::UnboundedReceiver<LogEvent>;

/// Create the push stream connecting an engine to a log router
pub fn log_channel() -> (LogSender, LogReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LogSender { tx }, rx)
}

/// External collaborator that performs the actual transcoding
///
/// Implementations stream progress through the [`LogSender`] they were
/// built with. `cancel` is advisory: it affects at most the call to
/// `process` currently in flight.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    async fn check_status(&self, path: &str) -> Result<FileCheck, EngineError>;

    async fn process(&self, path: &str, options: &OptionsConfig) -> Result<ProcessingStats, EngineError>;

    async fn cancel(&self) -> Result<(), EngineError>;

    async fn delete(&self, path: &str) -> Result<(), EngineError>;
}
