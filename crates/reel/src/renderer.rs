//! Renderer module for executing the scene renderer under a timeout.
//!
//! Each call writes the candidate to a fresh scratch file, runs the renderer
//! against it with its own media directory, and classifies the result.
//! Artifacts written:
//! - `<scenes_dir>/scene_<id>.py` (the candidate)
//! - `<scenes_dir>/scene_<id>.log` (stdout followed by stderr)
//! - `<output_dir>/scene_<id>/videos/scene_<id>/<quality>/*.mp4` (the video)

use reel_core::diagnostic::extract_diagnostic;
use reel_core::{AttemptOutcome, Config, Quality, ScratchId};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::SceneRenderer;

/// Interval between heartbeat log messages while the renderer runs.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Timeout for capturing stdout/stderr after the process exits or is killed.
const IO_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum bytes captured from each output stream.
const MAX_OUTPUT_BYTES: usize = 50 * 1024 * 1024;

const ARTIFACT_EXTENSION: &str = "mp4";

/// Read from an async reader with a maximum byte limit.
///
/// Returns the buffer truncated at `max_bytes`. Logs a warning if truncated.
async fn read_bounded<R: tokio::io::AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            warn!(max_bytes, "renderer output exceeded limit, truncating");
            // Drain so the child never blocks on a full pipe.
            while reader.read(&mut chunk).await? > 0 {}
            break;
        }

        let to_take = n.min(remaining);
        buf.extend_from_slice(&chunk[..to_take]);
    }

    Ok(buf)
}

/// Wait for a capture task, giving up after [`IO_CAPTURE_TIMEOUT`].
async fn collect_output(
    task: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    stream: &'static str,
    scratch_id: &ScratchId,
) -> Vec<u8> {
    let Some(task) = task else {
        return Vec::new();
    };
    match timeout(IO_CAPTURE_TIMEOUT, task).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(Ok(Err(err))) => {
            warn!(scratch_id = %scratch_id, stream, error = %err, "output capture failed");
            Vec::new()
        }
        Ok(Err(err)) => {
            warn!(scratch_id = %scratch_id, stream, error = %err, "output task panicked");
            Vec::new()
        }
        Err(_) => {
            warn!(scratch_id = %scratch_id, stream, "output capture timed out");
            Vec::new()
        }
    }
}

/// Kill the renderer and everything it spawned, then reap it.
///
/// The renderer leads its own process group, so its encoder and LaTeX
/// workers die with it and release the output pipes.
async fn terminate(child: &mut Child, scratch_id: &ScratchId) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                warn!(scratch_id = %scratch_id, error = %err, "failed to kill renderer process group");
            }
        }
    }
    if let Err(err) = child.kill().await {
        warn!(scratch_id = %scratch_id, error = %err, "failed to kill renderer");
    }
}

/// How the process wait loop terminated.
enum ProcessOutcome {
    Completed(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("renderer not found: {0}")]
    RendererNotFound(PathBuf),
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Why a render attempt produced no video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderDiagnostic {
    /// The renderer ran past its time limit and was killed.
    Timeout { after: Duration },
    /// The renderer exited non-zero; `text` is the extracted error.
    ProcessFailure { exit_code: i32, text: String },
    /// The renderer exited zero but no video was found.
    ArtifactMissing { stdout: String },
}

impl RenderDiagnostic {
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            Self::Timeout { .. } => AttemptOutcome::Timeout,
            Self::ProcessFailure { .. } => AttemptOutcome::ProcessFailure,
            Self::ArtifactMissing { .. } => AttemptOutcome::ArtifactMissing,
        }
    }

    /// Text handed to the model in a repair request.
    pub fn prompt_text(&self) -> String {
        match self {
            Self::Timeout { after } => format!(
                "Rendering timed out after {after:?}. The scene is too long or too \
                 expensive to render; shorten it and avoid heavy per-frame computation."
            ),
            Self::ProcessFailure { text, .. } => text.clone(),
            Self::ArtifactMissing { stdout } => format!(
                "Rendering completed but the output video was not found.\nRenderer output: {stdout}"
            ),
        }
    }
}

impl fmt::Display for RenderDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { after } => write!(f, "renderer timed out after {after:?}"),
            Self::ProcessFailure { exit_code, text } => {
                write!(f, "renderer exited with code {exit_code}:\n{text}")
            }
            Self::ArtifactMissing { .. } => write!(f, "renderer produced no video"),
        }
    }
}

/// Result of one render attempt.
#[derive(Debug, Clone)]
pub enum RenderOutcome {
    Rendered {
        scratch_id: ScratchId,
        artifact: PathBuf,
        scene_file: PathBuf,
    },
    Failed {
        scratch_id: ScratchId,
        diagnostic: RenderDiagnostic,
        scene_file: PathBuf,
    },
}

impl RenderOutcome {
    pub fn scratch_id(&self) -> &ScratchId {
        match self {
            Self::Rendered { scratch_id, .. } | Self::Failed { scratch_id, .. } => scratch_id,
        }
    }

    pub fn scene_file(&self) -> &Path {
        match self {
            Self::Rendered { scene_file, .. } | Self::Failed { scene_file, .. } => scene_file,
        }
    }
}

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Renderer executable (looked up on PATH when bare).
    pub renderer_bin: PathBuf,
    /// Scene class rendered from the scratch file.
    pub scene_class: String,
    pub quality: Quality,
    /// Wall-clock limit per invocation (zero = no limit).
    pub timeout: Duration,
    /// Where scratch files and logs are written.
    pub scenes_dir: PathBuf,
    /// Parent of the per-invocation media directories.
    pub output_dir: PathBuf,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RendererConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            renderer_bin: config.renderer_bin.clone(),
            scene_class: config.scene_class.clone(),
            quality: config.quality,
            timeout: Duration::from_secs(u64::from(config.render_timeout_sec)),
            scenes_dir: config.scenes_dir.clone(),
            output_dir: config.output_dir.clone(),
        }
    }
}

/// Runs the scene renderer on candidate source.
#[derive(Debug)]
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Media directory for one invocation: `<output_dir>/scene_<id>`.
    pub fn media_dir(&self, scratch_id: &ScratchId) -> PathBuf {
        self.config.output_dir.join(scratch_id.stem())
    }

    /// Render `candidate` under a fresh scratch id.
    ///
    /// Failures of the candidate (timeout, non-zero exit, missing video) are
    /// reported as [`RenderOutcome::Failed`]; `Err` is reserved for problems
    /// with the environment and for cancellation.
    pub async fn render(&self, candidate: &str, cancel_token: CancellationToken) -> Result<RenderOutcome> {
        let scratch_id = ScratchId::new();
        let stem = scratch_id.stem();

        std::fs::create_dir_all(&self.config.scenes_dir)?;
        let scene_file = self.config.scenes_dir.join(format!("{stem}.py"));
        let log_path = self.config.scenes_dir.join(format!("{stem}.log"));
        std::fs::write(&scene_file, candidate)?;

        let media_dir = self.media_dir(&scratch_id);
        std::fs::create_dir_all(&media_dir)?;

        let mut cmd = Command::new(&self.config.renderer_bin);
        cmd.arg(self.config.quality.flag())
            .arg(&scene_file)
            .arg(&self.config.scene_class)
            .arg("--media_dir")
            .arg(&media_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(
            scratch_id = %scratch_id,
            renderer = %self.config.renderer_bin.display(),
            quality = self.config.quality.as_str(),
            scene_file = %scene_file.display(),
            "spawning renderer"
        );

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RenderError::RendererNotFound(self.config.renderer_bin.clone())
            } else {
                RenderError::Io(e)
            }
        })?;

        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(read_bounded(stdout, MAX_OUTPUT_BYTES)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_bounded(stderr, MAX_OUTPUT_BYTES)));

        let started = Instant::now();
        let limit = self.config.timeout;

        let outcome = loop {
            let elapsed = started.elapsed();

            if !limit.is_zero() && elapsed >= limit {
                warn!(
                    scratch_id = %scratch_id,
                    timeout_ms = limit.as_millis(),
                    "renderer timed out; killing"
                );
                terminate(&mut child, &scratch_id).await;
                break ProcessOutcome::TimedOut;
            }

            let remaining = if limit.is_zero() {
                Duration::MAX
            } else {
                limit.saturating_sub(elapsed)
            };
            let sleep_duration = HEARTBEAT_INTERVAL.min(remaining);

            tokio::select! {
                result = child.wait() => {
                    match result {
                        Ok(status) => break ProcessOutcome::Completed(status),
                        Err(e) => return Err(RenderError::Io(e)),
                    }
                }
                () = cancel_token.cancelled() => {
                    info!(scratch_id = %scratch_id, "cancellation requested; killing renderer");
                    terminate(&mut child, &scratch_id).await;
                    break ProcessOutcome::Cancelled;
                }
                () = tokio::time::sleep(sleep_duration) => {
                    info!(
                        scratch_id = %scratch_id,
                        elapsed_sec = started.elapsed().as_secs(),
                        timeout_sec = limit.as_secs(),
                        "renderer still running"
                    );
                }
            }
        };

        let (stdout, stderr) = tokio::join!(
            collect_output(stdout_task, "stdout", &scratch_id),
            collect_output(stderr_task, "stderr", &scratch_id),
        );
        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);

        if let Err(err) = std::fs::write(&log_path, format!("{stdout}\n\n--- STDERR ---\n{stderr}")) {
            warn!(scratch_id = %scratch_id, error = %err, "failed to write renderer log");
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let diagnostic = match outcome {
            ProcessOutcome::Cancelled => return Err(RenderError::Cancelled),
            ProcessOutcome::TimedOut => RenderDiagnostic::Timeout { after: limit },
            ProcessOutcome::Completed(status) if !status.success() => {
                RenderDiagnostic::ProcessFailure {
                    exit_code: status.code().unwrap_or(-1),
                    text: extract_diagnostic(&stderr, &stdout),
                }
            }
            ProcessOutcome::Completed(_) => match find_artifact(&media_dir, &scratch_id)? {
                Some(artifact) => {
                    info!(
                        scratch_id = %scratch_id,
                        duration_ms,
                        artifact = %artifact.display(),
                        "render succeeded"
                    );
                    return Ok(RenderOutcome::Rendered {
                        scratch_id,
                        artifact,
                        scene_file,
                    });
                }
                None => RenderDiagnostic::ArtifactMissing {
                    stdout: stdout.into_owned(),
                },
            },
        };

        info!(
            scratch_id = %scratch_id,
            duration_ms,
            outcome = diagnostic.outcome().as_str(),
            "render failed"
        );

        Ok(RenderOutcome::Failed {
            scratch_id,
            diagnostic,
            scene_file,
        })
    }
}

/// First video under `<media_dir>/videos/scene_<id>/<quality>/`, in path order.
fn find_artifact(media_dir: &Path, scratch_id: &ScratchId) -> std::io::Result<Option<PathBuf>> {
    let videos = media_dir.join("videos").join(scratch_id.stem());
    if !videos.is_dir() {
        return Ok(None);
    }

    let mut quality_dirs: Vec<PathBuf> = std::fs::read_dir(&videos)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    quality_dirs.sort();

    for dir in quality_dirs {
        let mut videos: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file() && path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION)
            })
            .collect();
        videos.sort();
        if let Some(first) = videos.into_iter().next() {
            return Ok(Some(first));
        }
    }

    Ok(None)
}

impl SceneRenderer for Renderer {
    async fn render(&mut self, candidate: &str, cancel_token: CancellationToken) -> Result<RenderOutcome> {
        Renderer::render(self, candidate, cancel_token).await
    }
}
