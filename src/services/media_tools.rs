//! External media tools: fast-start remux (ffmpeg) and stream probing
//! (ffprobe).
//!
//! Both tools sit behind small traits so the pipeline can be driven by
//! deterministic fakes in tests. The real implementations spawn the binary,
//! wait for it to exit and capture its output; a child that is still running
//! when its future is dropped (client hung up) is killed.

use crate::models::geometry::GeometryClass;
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Instant,
};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Longest stderr excerpt kept in an error.
const STDERR_EXCERPT_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum MediaToolError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with {status}: {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("remux output `{}` is missing or empty", .0.display())]
    EmptyOutput(PathBuf),
    #[error("probe reported no streams")]
    NoStreams,
    #[error("unreadable probe report: {0}")]
    ProbeParse(String),
}

/// Rewrites a container so its index precedes the sample data.
#[async_trait]
pub trait Remuxer: Send + Sync {
    /// Write a fast-start copy of `input` to `output`. Samples are copied
    /// verbatim; nothing is re-encoded.
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), MediaToolError>;
}

/// Reports stream metadata for a media file.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Return the raw JSON report for the first video stream of `input`.
    async fn probe(&self, input: &Path) -> Result<Vec<u8>, MediaToolError>;
}

/// `ffmpeg -c copy -movflags faststart`.
#[derive(Debug, Clone)]
pub struct FfmpegRemuxer {
    program: String,
}

impl FfmpegRemuxer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, input: &Path, output: &Path) -> Result<(), MediaToolError> {
        run_tool(
            &self.program,
            [
                OsStr::new("-y"),
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-i"),
                input.as_os_str(),
                OsStr::new("-c"),
                OsStr::new("copy"),
                OsStr::new("-movflags"),
                OsStr::new("faststart"),
                OsStr::new("-f"),
                OsStr::new("mp4"),
                output.as_os_str(),
            ],
        )
        .await?;
        Ok(())
    }
}

/// `ffprobe -print_format json -show_streams -select_streams v:0`.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    program: String,
}

impl FfprobeProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl Probe for FfprobeProbe {
    async fn probe(&self, input: &Path) -> Result<Vec<u8>, MediaToolError> {
        run_tool(
            &self.program,
            [
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-print_format"),
                OsStr::new("json"),
                OsStr::new("-show_streams"),
                OsStr::new("-select_streams"),
                OsStr::new("v:0"),
                input.as_os_str(),
            ],
        )
        .await
    }
}

/// Run `program` to completion and return its stdout.
async fn run_tool<'a, I>(program: &str, args: I) -> Result<Vec<u8>, MediaToolError>
where
    I: IntoIterator<Item = &'a OsStr>,
{
    let start = Instant::now();
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| MediaToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = excerpt(&output.stderr);
        warn!(
            program,
            status = %output.status,
            stderr = %stderr,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "media tool failed"
        );
        return Err(MediaToolError::Exit {
            program: program.to_string(),
            status: output.status,
            stderr,
        });
    }

    debug!(
        program,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "media tool finished"
    );
    Ok(output.stdout)
}

fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().nth(STDERR_EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// The part of an ffprobe JSON report the classifier reads.
#[derive(Debug, Deserialize)]
pub struct ProbeReport {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
pub struct ProbeStream {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ProbeReport {
    pub fn parse(raw: &[u8]) -> Result<Self, MediaToolError> {
        serde_json::from_slice(raw).map_err(|err| MediaToolError::ProbeParse(err.to_string()))
    }

    /// Classify the first reported stream.
    pub fn geometry(&self) -> Result<GeometryClass, MediaToolError> {
        let stream = self.streams.first().ok_or(MediaToolError::NoStreams)?;
        let (width, height) = match (stream.width, stream.height) {
            (Some(width), Some(height)) => (width, height),
            _ => {
                return Err(MediaToolError::ProbeParse(
                    "first stream has no width/height".into(),
                ));
            }
        };

        GeometryClass::from_dimensions(width, height).ok_or_else(|| {
            MediaToolError::ProbeParse(format!("degenerate dimensions {width}x{height}"))
        })
    }
}

/// Probe `path` and bucket its first stream.
pub async fn classify(probe: &dyn Probe, path: &Path) -> Result<GeometryClass, MediaToolError> {
    let raw = probe.probe(path).await?;
    ProbeReport::parse(&raw)?.geometry()
}
