//! Streaming rendered frames into an external video encoder.
//!
//! Frames are raw `rgb24`, top row first, written back to back on the
//! encoder's stdin. The encoder is told the size and rate up front, so every
//! frame of one capture must have the same dimensions.

use std::ffi::OsString;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use tracing::{debug, info, warn};

use crate::backend::Viewport;
use crate::error::CaptureSinkError;

/// Encoder binary used when none is configured.
pub const DEFAULT_ENCODER: &str = "ffmpeg";

/// Destination for captured frames.
pub trait FrameSink {
    /// Appends one packed RGB frame.
    fn write_frame(&mut self, rgb: &[u8]) -> Result<(), CaptureSinkError>;

    /// Flushes and closes the stream. Further writes are an error.
    fn finish(&mut self) -> Result<(), CaptureSinkError>;

    /// Number of frames accepted so far.
    fn frames_written(&self) -> u64;
}

pub type BoxedFrameSink = Box<dyn FrameSink>;

/// Capture target as configured on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub output: PathBuf,
    pub fps: u32,
    pub encoder: Option<PathBuf>,
}

impl CaptureConfig {
    pub fn encoder_program(&self) -> OsString {
        self.encoder
            .as_ref()
            .map(|path| path.as_os_str().to_os_string())
            .unwrap_or_else(|| OsString::from(DEFAULT_ENCODER))
    }
}

/// Arguments handed to the encoder for a raw rgb24 stream on stdin.
pub fn encoder_args(viewport: Viewport, fps: u32, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-y",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgb24",
        "-s",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(format!("{}x{}", viewport.width, viewport.height).into());
    args.push("-framerate".into());
    args.push(fps.max(1).to_string().into());
    for arg in ["-i", "-", "-c:v", "libx264", "-pix_fmt", "yuv420p"] {
        args.push(arg.into());
    }
    args.push(output.as_os_str().to_os_string());
    args
}

/// Writes fixed-size frames to any byte stream.
#[derive(Debug)]
pub struct RawFrameWriter<W: Write> {
    writer: Option<BufWriter<W>>,
    frame_len: usize,
    frames: u64,
}

impl<W: Write> RawFrameWriter<W> {
    pub fn new(writer: W, viewport: Viewport) -> Self {
        Self {
            writer: Some(BufWriter::new(writer)),
            frame_len: viewport.rgb_frame_len(),
            frames: 0,
        }
    }

    /// Flushes and hands back the inner writer.
    pub fn close(&mut self) -> Result<Option<W>, CaptureSinkError> {
        match self.writer.take() {
            Some(writer) => writer
                .into_inner()
                .map(Some)
                .map_err(|err| CaptureSinkError::Finish(err.into_error())),
            None => Ok(None),
        }
    }
}

impl<W: Write> FrameSink for RawFrameWriter<W> {
    fn write_frame(&mut self, rgb: &[u8]) -> Result<(), CaptureSinkError> {
        if rgb.len() != self.frame_len {
            return Err(CaptureSinkError::FrameSize {
                frame: self.frames,
                expected: self.frame_len,
                actual: rgb.len(),
            });
        }
        let writer = self.writer.as_mut().ok_or(CaptureSinkError::MissingPipe)?;
        writer
            .write_all(rgb)
            .map_err(|source| CaptureSinkError::Write {
                frame: self.frames,
                source,
            })?;
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CaptureSinkError> {
        self.close().map(drop)
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}

/// Pipes frames into an encoder child process.
pub struct EncoderSink {
    child: Option<Child>,
    stream: RawFrameWriter<ChildStdin>,
    output: PathBuf,
}

impl EncoderSink {
    /// Starts the encoder for frames of `viewport` at `config.fps`.
    pub fn spawn(config: &CaptureConfig, viewport: Viewport) -> Result<Self, CaptureSinkError> {
        if viewport.is_empty() {
            return Err(CaptureSinkError::Unsupported(format!(
                "cannot capture a {}x{} surface",
                viewport.width, viewport.height
            )));
        }

        let program = config.encoder_program();
        let args = encoder_args(viewport, config.fps, &config.output);
        debug!(program = ?program, ?args, "spawning encoder");

        let mut child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| CaptureSinkError::Spawn {
                program: program.to_string_lossy().into_owned(),
                source,
            })?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(CaptureSinkError::MissingPipe);
        };

        info!(
            output = %config.output.display(),
            width = viewport.width,
            height = viewport.height,
            fps = config.fps,
            "capturing to encoder"
        );

        Ok(Self {
            child: Some(child),
            stream: RawFrameWriter::new(stdin, viewport),
            output: config.output.clone(),
        })
    }
}

impl FrameSink for EncoderSink {
    fn write_frame(&mut self, rgb: &[u8]) -> Result<(), CaptureSinkError> {
        self.stream.write_frame(rgb)
    }

    fn finish(&mut self) -> Result<(), CaptureSinkError> {
        // Closing stdin is what tells the encoder the stream has ended.
        let flushed = self.stream.close().map(drop);
        let Some(mut child) = self.child.take() else {
            return flushed;
        };
        let status = child.wait().map_err(CaptureSinkError::Finish)?;
        flushed?;
        if !status.success() {
            return Err(CaptureSinkError::EncoderFailed {
                status: status.to_string(),
            });
        }
        info!(
            output = %self.output.display(),
            frames = self.stream.frames_written(),
            "capture finished"
        );
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.stream.frames_written()
    }
}

impl Drop for EncoderSink {
    fn drop(&mut self) {
        if self.child.is_some() {
            if let Err(err) = self.finish() {
                warn!(error = %err, "encoder did not shut down cleanly");
            }
        }
    }
}

/// Source pixel layout for [`pack_rgb`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrder {
    Rgba,
    Bgra,
}

/// Strips row padding from a 4-byte-per-pixel readback and packs it as RGB.
pub fn pack_rgb(
    padded: &[u8],
    viewport: Viewport,
    padded_bytes_per_row: usize,
    order: PixelOrder,
    out: &mut Vec<u8>,
) {
    out.clear();
    out.reserve(viewport.rgb_frame_len());
    let row_bytes = viewport.width as usize * 4;
    for row in padded
        .chunks(padded_bytes_per_row)
        .take(viewport.height as usize)
    {
        for pixel in row[..row_bytes.min(row.len())].chunks_exact(4) {
            match order {
                PixelOrder::Rgba => out.extend_from_slice(&[pixel[0], pixel[1], pixel[2]]),
                PixelOrder::Bgra => out.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]),
            }
        }
    }
}
