//! FFmpeg sink
//!
//! Raw frames are piped to an ffmpeg process over stdin and encoded to
//! H.264 in `<camera>.mp4`. The container does not carry the capture
//! timecode, so each frame's timecode is appended to a
//! `<camera>-timecodes.jsonl` sidecar as it is written.

use super::sink::{file_stem, MediaSink, SinkError, SinkFactory};
use crate::config::RecorderConfig;
use crate::frame::{CameraIdentity, TaggedFrame};
use crate::timecode::FrameTimecode;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, Command, Stdio};
use std::thread::JoinHandle;

/// Encoder diagnostics kept for the error reported by a failed finish
const STDERR_TAIL_BYTES: usize = 16 * 1024;

/// Check whether an ffmpeg binary is on the PATH
pub fn ffmpeg_available() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Size in bytes of one raw frame, for the pixel formats the sink knows
pub fn frame_size(pixel_format: &str, width: u32, height: u32) -> Option<usize> {
    let (width, height) = (width as usize, height as usize);
    let pixels = width * height;
    match pixel_format {
        "bgra" | "rgba" | "argb" | "abgr" | "bgr0" | "rgb0" | "0rgb" | "0bgr" => Some(pixels * 4),
        "rgb24" | "bgr24" => Some(pixels * 3),
        "yuyv422" | "uyvy422" | "gray16le" => Some(pixels * 2),
        "gray" => Some(pixels),
        // full-size luma plus two quarter-size chroma planes
        "yuv420p" | "nv12" | "nv21" => Some(pixels + 2 * width.div_ceil(2) * height.div_ceil(2)),
        _ => None,
    }
}

/// One line of the timecode sidecar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarEntry {
    /// Index of the frame in the video stream
    pub frame_index: u64,
    pub sequence: u64,
    pub timecode: FrameTimecode,
    pub wall_clock_ms: i64,
}

/// Opens one ffmpeg encoder per camera
#[derive(Debug, Clone)]
pub struct FfmpegSinkFactory {
    /// Encoder binary, looked up on the PATH unless absolute
    pub program: PathBuf,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
}

impl From<&RecorderConfig> for FfmpegSinkFactory {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            fps: config.fps,
            width: config.width,
            height: config.height,
            pixel_format: config.pixel_format.clone(),
        }
    }
}

impl FfmpegSinkFactory {
    /// Command-line arguments encoding stdin rawvideo to `output`.
    ///
    /// Progress output is disabled; only errors reach stderr.
    pub fn encoder_args(&self, output: &Path) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-nostats",
            "-loglevel",
            "error",
            "-y",
            "-f",
            "rawvideo",
            "-pixel_format",
            self.pixel_format.as_str(),
            "-video_size",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(format!("{}x{}", self.width, self.height));
        args.push("-framerate".to_string());
        args.push(self.fps.to_string());
        args.extend(
            ["-i", "-", "-c:v", "libx264", "-preset", "veryfast", "-pix_fmt", "yuv420p", "-crf", "18", "-g"]
                .iter()
                .map(|s| s.to_string()),
        );
        // GOP of two seconds
        args.push((self.fps * 2).to_string());
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
        args.push(output.to_string_lossy().to_string());
        args
    }
}

impl SinkFactory for FfmpegSinkFactory {
    fn open(&self, camera: &CameraIdentity, session_dir: &Path) -> Result<Box<dyn MediaSink>, SinkError> {
        if !session_dir.is_dir() {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("session directory missing: {:?}", session_dir),
            )));
        }

        let stem = file_stem(camera);
        let output = session_dir.join(format!("{stem}.mp4"));
        let sidecar_path = session_dir.join(format!("{stem}-timecodes.jsonl"));
        let sidecar = BufWriter::new(File::create(&sidecar_path)?);

        let frame_size = frame_size(&self.pixel_format, self.width, self.height);
        if frame_size.is_none() {
            tracing::warn!(
                "{}: unknown pixel format {:?}, frame sizes will not be checked",
                camera,
                self.pixel_format
            );
        }

        let mut process = Command::new(&self.program)
            .args(self.encoder_args(&output))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SinkError::Encoder(format!("Failed to start FFmpeg: {}", e)))?;
        let stderr = process.stderr.take().map(|pipe| drain_stderr(camera.clone(), pipe));

        tracing::info!(
            "Started FFmpeg encoder for {}: {}x{} @ {}fps, pixel_format={}, output: {:?}",
            camera,
            self.width,
            self.height,
            self.fps,
            self.pixel_format,
            output
        );

        Ok(Box::new(FfmpegSink {
            camera: camera.clone(),
            process: Some(process),
            stderr,
            output,
            sidecar_path,
            sidecar: Some(sidecar),
            frame_size,
            frames: 0,
        }))
    }
}

/// Read the encoder's stderr until it closes so the pipe never fills,
/// keeping the last few KiB for error reporting.
fn drain_stderr(camera: CameraIdentity, mut pipe: ChildStderr) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut tail = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > STDERR_TAIL_BYTES {
                        let excess = tail.len() - STDERR_TAIL_BYTES;
                        tail.drain(..excess);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("{}: encoder stderr closed: {}", camera, e);
                    break;
                }
            }
        }
        String::from_utf8_lossy(&tail).into_owned()
    })
}

pub struct FfmpegSink {
    camera: CameraIdentity,
    process: Option<Child>,
    stderr: Option<JoinHandle<String>>,
    output: PathBuf,
    sidecar_path: PathBuf,
    sidecar: Option<BufWriter<File>>,

    /// Expected payload length, if the pixel format is known
    frame_size: Option<usize>,
    frames: u64,
}

impl MediaSink for FfmpegSink {
    fn write_frame(&mut self, frame: &TaggedFrame) -> Result<(), SinkError> {
        if let Some(expected) = self.frame_size {
            if frame.payload.len() != expected {
                return Err(SinkError::Encoder(format!(
                    "frame {} is {} bytes, expected {}",
                    frame.sequence,
                    frame.payload.len(),
                    expected
                )));
            }
        }

        let stdin = self
            .process
            .as_mut()
            .and_then(|p| p.stdin.as_mut())
            .ok_or_else(|| SinkError::Encoder("encoder already finished".to_string()))?;
        stdin.write_all(&frame.payload)?;

        if let Some(sidecar) = self.sidecar.as_mut() {
            let entry = SidecarEntry {
                frame_index: self.frames,
                sequence: frame.sequence,
                timecode: frame.capture_timecode,
                wall_clock_ms: frame.wall_clock_ms(),
            };
            serde_json::to_writer(&mut *sidecar, &entry)?;
            sidecar.write_all(b"\n")?;
        }
        self.frames += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<Vec<PathBuf>, SinkError> {
        if let Some(mut process) = self.process.take() {
            // Close stdin to signal EOF
            drop(process.stdin.take());
            let status = process.wait()?;
            let diagnostics = self
                .stderr
                .take()
                .and_then(|thread| thread.join().ok())
                .unwrap_or_default();

            if let Some(mut sidecar) = self.sidecar.take() {
                sidecar.flush()?;
            }

            if !status.success() {
                return Err(SinkError::Encoder(format!(
                    "FFmpeg exited with status {}: {}",
                    status,
                    diagnostics.trim()
                )));
            }

            tracing::info!(
                "FFmpeg encoder for {} finished: {} frames, output: {:?}",
                self.camera,
                self.frames,
                self.output
            );
        }

        Ok(vec![self.output.clone(), self.sidecar_path.clone()])
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}
