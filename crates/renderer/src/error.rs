use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Shader stage a compilation diagnostic belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
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

/// Errors surfaced by the effects pipeline.
///
/// `NoGpuContext`, `ShaderCompilation` and `ProgramLink` are fatal at startup.
/// `SpecMismatch` marks a caller bug (buffers or values that disagree with
/// the declared program contract). The rest are ordinary runtime failures.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no usable GPU context: {0}")]
    NoGpuContext(String),
    #[error("{stage} shader failed to compile:\n{log}")]
    ShaderCompilation { stage: ShaderStage, log: String },
    #[error("program failed to link:\n{log}")]
    ProgramLink { log: String },
    #[error("program contract mismatch: {0}")]
    SpecMismatch(String),
    #[error("unknown parameter key `{0}`")]
    UnknownParameter(String),
    #[error("invalid value for parameter `{key}`: {reason}")]
    InvalidParameter { key: String, reason: String },
    #[error("invalid mesh request: {0}")]
    InvalidMesh(String),
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("frame readback failed: {0}")]
    Readback(String),
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed parameter file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Lifecycle(String),
}

impl RenderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error came from the presentation surface and can be
    /// recovered by reconfiguring it.
    pub fn as_surface_error(&self) -> Option<&wgpu::SurfaceError> {
        match self {
            Self::Surface(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T, E = RenderError> = std::result::Result<T, E>;
