use std::fmt;
use std::io;
use std::path::PathBuf;

/// Pipeline stage a shader diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => f.write_str("vertex"),
            ShaderStage::Fragment => f.write_str("fragment"),
        }
    }
}

/// The fragment source file could not be opened or read as text.
#[derive(Debug, thiserror::Error)]
#[error("failed to read fragment shader at {}", path.display())]
pub struct SourceReadError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Compile and link failures, carrying the diagnostics verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShaderError {
    #[error("{stage} shader failed to compile:\n{log}")]
    Compile { stage: ShaderStage, log: String },
    #[error("shader program failed to link:\n{log}")]
    Link { log: String },
}

impl ShaderError {
    /// Stage that produced the diagnostic; `None` for link failures.
    pub fn stage(&self) -> Option<ShaderStage> {
        match self {
            ShaderError::Compile { stage, .. } => Some(*stage),
            ShaderError::Link { .. } => None,
        }
    }
}

/// Anything that can stop a program from being (re)built from disk.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Source(#[from] SourceReadError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
}

/// Display, context or GPU initialisation failure.
#[derive(Debug, thiserror::Error)]
pub enum WindowInitError {
    #[error("failed to create event loop: {0}")]
    EventLoop(String),
    #[error("failed to create window: {0}")]
    Window(String),
    #[error("failed to initialise GPU: {0}")]
    Gpu(String),
}

/// The encoder process could not be started or rejected the stream.
#[derive(Debug, thiserror::Error)]
pub enum CaptureSinkError {
    #[error("failed to start encoder `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("encoder stdin was not available")]
    MissingPipe,
    #[error("failed to write frame {frame} to encoder")]
    Write {
        frame: u64,
        #[source]
        source: io::Error,
    },
    #[error("frame {frame} has {actual} bytes, expected {expected} (viewport changed while capturing?)")]
    FrameSize {
        frame: u64,
        expected: usize,
        actual: usize,
    },
    #[error("encoder exited with {status}")]
    EncoderFailed { status: String },
    #[error("failed to finish encoder stream")]
    Finish(#[source] io::Error),
    #[error("surface cannot be captured: {0}")]
    Unsupported(String),
}

/// Per-frame backend failures.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("surface was lost or is outdated")]
    Reconfigure,
    #[error("timed out acquiring the next surface texture")]
    Timeout,
    #[error("GPU is out of memory")]
    OutOfMemory,
    #[error("frame readback failed: {0}")]
    Readback(String),
}

/// Errors that end the render loop after startup.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Capture(#[from] CaptureSinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_error_names_failing_stage() {
        let err = ShaderError::Compile {
            stage: ShaderStage::Fragment,
            log: "0:3: unexpected token".into(),
        };
        let message = err.to_string();
        assert!(message.starts_with("fragment shader failed to compile"));
        assert!(message.contains("0:3: unexpected token"));
        assert_eq!(err.stage(), Some(ShaderStage::Fragment));
    }

    #[test]
    fn link_error_has_no_stage() {
        let err = ShaderError::Link {
            log: "interface mismatch".into(),
        };
        assert_eq!(err.stage(), None);
        assert!(err.to_string().contains("interface mismatch"));
    }
}
