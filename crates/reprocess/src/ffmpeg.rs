use std::fs::{FileTimes, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::catalog::{Catalog, ModifierCode};
use crate::config::{AppConfig, HwAccel, OptionsConfig};
use crate::engine::{EngineError, FileCheck, LogSender, TranscodeEngine};
use crate::ffprobe::{self, REPROCESSED_TAG, TAGGED_ORIGINAL_VALUE, LEGACY_COMMENT};
use crate::job::ProcessingStats;

/// Engine running the system ffmpeg, one child process at a time
pub struct FfmpegEngine {
    ffmpeg_bin: PathBuf,
    ffprobe_bin: PathBuf,
    catalog_dir: PathBuf,
    work_dir: PathBuf,
    logs: LogSender,
    current_pid: Mutex<Option<u32>>,
}

impl FfmpegEngine {
    pub fn new(config: &AppConfig, logs: LogSender) -> Self {
        FfmpegEngine {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            catalog_dir: config.catalog_dir.clone(),
            work_dir: std::env::temp_dir(),
            logs,
            current_pid: Mutex::new(None),
        }
    }

    /// Directory for intermediate outputs and stabilization transforms
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    fn set_pid(&self, pid: Option<u32>) {
        *self.current_pid.lock().unwrap_or_else(PoisonError::into_inner) = pid;
    }

    fn take_pid(&self) -> Option<u32> {
        self.current_pid.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Spawn ffmpeg, forward every stderr line to the log stream and wait
    async fn run_streamed(&self, path: &str, args: &[String]) -> Result<ExitStatus, EngineError> {
        let spawn_error = |source| EngineError::Spawn {
            program: self.ffmpeg_bin.display().to_string(),
            source,
        };

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;
        self.set_pid(child.id());

        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                self.logs.emit(path, line);
            }
        }

        let status = child.wait().await.map_err(spawn_error);
        self.set_pid(None);
        status
    }

    async fn stabilize_pass(&self, path: &str, trf: &Path) -> Result<(), EngineError> {
        self.logs.emit(path, "Starting Stabilization Pass 1/2...");
        let args = stabilize_detect_args(path, trf);
        self.logs.emit(path, format!("Command Pass 1: {} {}", self.ffmpeg_bin.display(), args.join(" ")));

        let status = self.run_streamed(path, &args).await?;
        if !status.success() {
            return Err(EngineError::Failed(format!("Stabilization Pass 1 failed. Status: {}", status)));
        }
        self.logs.emit(path, "Stabilization Pass 1 Complete. Starting Pass 2...");
        Ok(())
    }

    async fn encode(&self, path: &str, plan: &EncodePlan) -> Result<(), EngineError> {
        if let Some(trf) = &plan.trf {
            self.stabilize_pass(path, trf).await?;
        }

        self.logs.emit(path, format!("Command: {} {}", self.ffmpeg_bin.display(), plan.args.join(" ")));
        let status = self.run_streamed(path, &plan.args).await?;
        if !status.success() {
            return Err(EngineError::Failed(format!("FFmpeg failed or was aborted. Status: {}", status)));
        }

        move_file(&plan.temp_output, &plan.final_output)
            .map_err(|e| EngineError::io(plan.final_output.display().to_string(), e))?;
        if let Err(e) = copy_file_times(Path::new(path), &plan.final_output) {
            debug!("Could not copy timestamps to {}: {}", plan.final_output.display(), e);
        }
        Ok(())
    }

    /// Mark the original so later checks ask before reprocessing it
    ///
    /// Failures are reported on the log stream only.
    async fn tag_original(&self, path: &str) {
        self.logs.emit(path, "Tagging original file...");
        let input = Path::new(path);
        let tagged = tagged_temp_path(input);

        let args = tag_original_args(path, &tagged);
        let output = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await;

        let message = match output {
            Ok(output) if output.status.success() => match move_file(&tagged, input) {
                Ok(()) => "Original file successfully tagged.".to_string(),
                Err(e) => format!("Failed to replace original file with tagged version: {}", e),
            },
            Ok(output) => format!("Failed to tag original file: {}", String::from_utf8_lossy(&output.stderr)),
            Err(e) => format!("Failed to tag original file: {}", e),
        };
        if tagged.exists() {
            let _ = std::fs::remove_file(&tagged);
        }
        self.logs.emit(path, message);
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    async fn check_status(&self, path: &str) -> Result<FileCheck, EngineError> {
        let data = ffprobe::probe_file(&self.ffprobe_bin, Path::new(path)).await?;
        Ok(ffprobe::classify(&data.format))
    }

    async fn process(&self, path: &str, options: &OptionsConfig) -> Result<ProcessingStats, EngineError> {
        let start = Instant::now();
        let input = Path::new(path);
        let original_size = std::fs::metadata(input)
            .map_err(|e| EngineError::io(path, e))?
            .len();

        let catalog = Catalog::load(&self.catalog_dir)?;
        for (name, _) in &options.modifiers {
            if catalog.modifier(name).is_none() {
                warn!("Unknown modifier {} ignored", name);
            }
        }
        let plan = EncodePlan::new(input, &self.work_dir, options, &catalog)?;

        let result = self.encode(path, &plan).await;
        plan.remove_intermediates();
        result?;

        let new_size = std::fs::metadata(&plan.final_output)
            .map_err(|e| EngineError::io(plan.final_output.display().to_string(), e))?
            .len();

        if options.tag_original {
            self.tag_original(path).await;
        }

        info!("Encoded {} -> {}", path, plan.final_output.display());
        Ok(ProcessingStats {
            duration_secs: start.elapsed().as_secs_f64(),
            original_size,
            new_size,
            output_path: plan.final_output.to_string_lossy().to_string(),
        })
    }

    async fn cancel(&self) -> Result<(), EngineError> {
        let Some(pid) = self.take_pid() else {
            debug!("Cancel requested with no ffmpeg running");
            return Ok(());
        };

        let (program, args) = if cfg!(windows) {
            ("taskkill", vec!["/PID".to_string(), pid.to_string(), "/F".to_string()])
        } else {
            ("kill", vec![pid.to_string()])
        };
        info!("Sending {} to ffmpeg pid {}", program, pid);

        let output = Command::new(program)
            .args(&args)
            .output()
            .await
            .map_err(|source| EngineError::Spawn { program: program.to_string(), source })?;
        if !output.status.success() {
            return Err(EngineError::Failed(format!(
                "{} {} failed: {}",
                program,
                pid,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), EngineError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| EngineError::io(path, e))
    }
}

/// Paths and arguments for one encode
#[derive(Debug, Clone, PartialEq)]
pub struct EncodePlan {
    pub args: Vec<String>,
    pub temp_output: PathBuf,
    pub final_output: PathBuf,
    /// Stabilization transform file, when stabilizing
    pub trf: Option<PathBuf>,
}

impl EncodePlan {
    pub fn new(
        input: &Path,
        work_dir: &Path,
        options: &OptionsConfig,
        catalog: &Catalog,
    ) -> Result<Self, EngineError> {
        let invalid = || EngineError::InvalidPath(input.display().to_string());
        let parent = input.parent().ok_or_else(invalid)?;
        let stem = input.file_stem().ok_or_else(invalid)?.to_string_lossy();

        let final_output = parent.join(output_file_name(&stem, options));
        let temp_output = work_dir.join(format!("{}_{}_workinprogress.mp4", stem, uuid::Uuid::new_v4()));
        let trf = options
            .stabilize
            .then(|| work_dir.join(format!("{}_{}.trf", stem, uuid::Uuid::new_v4())));

        let args = encode_args(&input.to_string_lossy(), &temp_output, options, catalog, trf.as_deref())?;
        Ok(EncodePlan { args, temp_output, final_output, trf })
    }

    fn remove_intermediates(&self) {
        for path in std::iter::once(&self.temp_output).chain(self.trf.as_ref()) {
            if path.exists() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// `<stem>[_stabilized][_filters][_modifier names]_q<quality>_<codec>.mp4`
pub fn output_file_name(stem: &str, options: &OptionsConfig) -> String {
    let mut name = stem.to_string();
    if options.stabilize {
        name.push_str("_stabilized");
    }
    if !options.filters.is_empty() {
        name.push('_');
        name.push_str(&options.filters.join("_"));
    }
    if !options.modifiers.is_empty() {
        let names: Vec<&str> = options.modifiers.iter().map(|(n, _)| n.as_str()).collect();
        name.push('_');
        name.push_str(&names.join("_"));
    }
    format!("{}_q{}_{}.mp4", name, options.quality, options.codec)
}

/// Single-quote a path for use inside a filter graph
fn quote_filter_path(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', "'\\''"))
}

pub fn stabilize_detect_args(input: &str, trf: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string(),
        "-vf".to_string(),
        format!("vidstabdetect=stepsize=32:shakiness=10:accuracy=15:result={}", quote_filter_path(trf)),
        "-f".to_string(),
        "null".to_string(),
        "-".to_string(),
    ]
}

/// Arguments of the main encode pass
pub fn encode_args(
    input: &str,
    output: &Path,
    options: &OptionsConfig,
    catalog: &Catalog,
    trf: Option<&Path>,
) -> Result<Vec<String>, EngineError> {
    let mut args = vec!["-y".to_string()];
    if options.hwaccel != HwAccel::None {
        args.push("-hwaccel".to_string());
        args.push(options.hwaccel.to_string());
    }
    args.extend([
        "-i".to_string(),
        input.to_string(),
        "-map_metadata".to_string(),
        "0".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-codec:v".to_string(),
        options.codec.to_string(),
        "-qmin".to_string(),
        "20".to_string(),
    ]);

    let mut chain = Vec::new();
    if let Some(trf) = trf {
        chain.push(format!("vidstabtransform=input={}:zoom=0:smoothing=10", quote_filter_path(trf)));
    }
    chain.extend(catalog.filter_chain(&options.filters));

    for (name, value) in &options.modifiers {
        let Some(modifier) = catalog.modifier(name) else {
            continue;
        };
        match modifier.expand(value)? {
            ModifierCode::Filter(filter) => chain.push(filter),
            ModifierCode::Args(extra) => args.extend(extra),
        }
    }

    if !chain.is_empty() {
        args.push("-vf".to_string());
        args.push(chain.join(","));
    }

    args.extend([
        "-qmax".to_string(),
        options.quality.to_string(),
        "-preset".to_string(),
        options.preset.to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-metadata".to_string(),
        format!("{}={}", REPROCESSED_TAG, options.flags_description()),
        "-metadata".to_string(),
        format!("comment={}", LEGACY_COMMENT),
        output.to_string_lossy().to_string(),
    ]);
    Ok(args)
}

pub fn tag_original_args(input: &str, tagged: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-map_metadata".to_string(),
        "0".to_string(),
        "-metadata".to_string(),
        format!("{}={}", REPROCESSED_TAG, TAGGED_ORIGINAL_VALUE),
        tagged.to_string_lossy().to_string(),
    ]
}

fn tagged_temp_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    input.with_file_name(format!("{}_tagged_temp.mp4", stem))
}

/// Rename, falling back to copy and remove across filesystems
pub fn move_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    if std::fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    std::fs::copy(source, destination)?;
    std::fs::remove_file(source)
}

fn copy_file_times(source: &Path, destination: &Path) -> std::io::Result<()> {
    let metadata = std::fs::metadata(source)?;
    let times = FileTimes::new()
        .set_accessed(metadata.accessed()?)
        .set_modified(metadata.modified()?);
    OpenOptions::new().write(true).open(destination)?.set_times(times)
}
