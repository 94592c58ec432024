pub mod abort;
pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod engine;
pub mod ffmpeg;
pub mod ffprobe;
pub mod job;
pub mod logs;
pub mod orchestrator;
pub mod registry;
pub mod scan;
pub mod status;

#[cfg(test)]
mod test_support;

pub use catalog::{Catalog, VideoFilter, VideoModifier};
pub use cleanup::{ArtifactKind, CleanupRules, DeletionCandidate, DeletionEffect, DeletionSet};
pub use config::{AppConfig, Codec, HwAccel, OptionsConfig, OptionsUpdate, Preset};
pub use engine::{log_channel, EngineError, FileCheck, LogEvent, LogReceiver, LogSender, TranscodeEngine};
pub use ffmpeg::FfmpegEngine;
pub use job::{FileJob, JobStatus, ProcessingStats};
pub use logs::LogRouter;
pub use orchestrator::{DeletionOutcome, Orchestrator, OrchestratorError, RunSummary};
pub use registry::FileRegistry;
pub use status::{AlwaysAnswer, ConfirmPolicy, StatusChecker};
