// src/error.rs
//! Error taxonomy for the whole crate.
//!
//! - **Resource-load errors** (`FileError`, `ResourceError`): missing or corrupt data. Logged once,
//!   surfaced as `Err`, never fatal to the frame loop.
//! - **Shader-compile errors** (`ShaderCompileError`): carry the failing stage, the message and the
//!   fully expanded source.
//! - **Frame-sequencing errors** (`FrameError`): Begin/End out of order, device loss, fence stalls.
//! - **Command recording errors** (`CommandListError`): caller mistakes while recording a frame.
//! - **Device errors** (`DeviceError`): whatever the native backend reports.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::texture::TextureFormat;

/// Crate-wide error type.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Shader(#[from] ShaderCompileError),

    /// The engine cannot run without its baseline shaders.
    #[error("built-in shader {name} failed to compile: {source}")]
    BuiltinShader {
        name: &'static str,
        #[source]
        source: ShaderCompileError,
    },

    #[error(transparent)]
    CommandList(#[from] CommandListError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Window or event-loop creation failed.
    #[error("platform error: {0}")]
    Platform(String),

    #[error("{0}")]
    Custom(String),

    #[error("{message}: {source}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    #[inline]
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }

    #[inline]
    pub fn format(args: fmt::Arguments) -> Self {
        Self::Custom(fmt::format(args))
    }

    /// Wraps `self` with a context message.
    #[inline]
    pub fn context<C: Into<String>>(self, context: C) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    #[inline]
    pub fn msg(msg: &'static str) -> Self {
        Self::Custom(msg.into())
    }

    #[inline]
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    #[inline]
    pub fn is_shader(&self) -> bool {
        matches!(self, Error::Shader(_) | Error::BuiltinShader { .. })
    }

    /// Strips `WithContext` layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;

// ─────────────────────────────────────────────────────────────────────────────
// File loader
// ─────────────────────────────────────────────────────────────────────────────

/// Failures of the virtual file system. `NotFound` and `Decode` are kept apart so callers can
/// tell a typo from a corrupt asset.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("file not found: {path}")]
    NotFound { path: String },

    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Resources
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("resource not found: {path}")]
    NotFound { path: String },

    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("invalid texture size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("pixel data has {actual} bytes, expected {expected}")]
    DataLength { expected: usize, actual: usize },

    #[error("texture format {format:?} is not supported here")]
    UnsupportedFormat { format: TextureFormat },

    #[error("render texture belongs to a screen that has since been resized")]
    Stale,

    #[error("texture has no backing file to reload from")]
    NotReloadable,

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("device rejected the resource: {0}")]
    Device(#[from] DeviceError),
}

impl From<FileError> for ResourceError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::NotFound { path } => ResourceError::NotFound { path },
            FileError::Decode { path, reason } => ResourceError::Decode { path, reason },
            FileError::Io { path, source } => ResourceError::Decode {
                path: path.display().to_string(),
                reason: source.to_string(),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shader compiler
// ─────────────────────────────────────────────────────────────────────────────

/// Pipeline stage at which a shader compile failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderErrorKind {
    ParseError,
    TranspileError,
    NativeCompileError,
    ReflectionError,
}

impl fmt::Display for ShaderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShaderErrorKind::ParseError => "parse",
            ShaderErrorKind::TranspileError => "transpile",
            ShaderErrorKind::NativeCompileError => "native compile",
            ShaderErrorKind::ReflectionError => "reflection",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone)]
#[error("{kind} error in shader '{name}': {message}")]
pub struct ShaderCompileError {
    pub kind: ShaderErrorKind,
    pub name: String,
    pub message: String,
    /// Source text as the compiler saw it.
    pub expanded_source: String,
}

impl ShaderCompileError {
    pub fn new(
        kind: ShaderErrorKind,
        name: impl Into<String>,
        message: impl Into<String>,
        expanded_source: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            message: message.into(),
            expanded_source: expanded_source.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command list
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandListError {
    #[error("command list was already submitted")]
    Submitted,

    #[error("no render target is bound")]
    NoRenderTarget,

    #[error("texture is stale (screen was resized)")]
    StaleTexture,

    #[error("copy between {src:?} and {dst:?} is not allowed")]
    FormatMismatch {
        src: TextureFormat,
        dst: TextureFormat,
    },

    #[error("copy between {src:?} and {dst:?} sized textures is not allowed")]
    SizeMismatch { src: (u32, u32), dst: (u32, u32) },

    #[error("material has no {0} shader")]
    MissingShader(&'static str),

    #[error("texture is both sampled and the render target")]
    TargetIsSource,
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame driver
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("graphics is not initialized")]
    NotInitialized,

    #[error("a frame is already open")]
    FrameAlreadyOpen,

    #[error("no frame is open")]
    NoOpenFrame,

    #[error("the window was asked to close")]
    CloseRequested,

    #[error("graphics device was lost")]
    DeviceLost,

    #[error("GPU did not finish frame within {0} ms")]
    FenceTimeout(u64),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error(transparent)]
    CommandList(#[from] CommandListError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("handle does not refer to a live device object")]
    InvalidHandle,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("native shader compiler: {0}")]
    ShaderCompile(String),

    #[error("device lost")]
    Lost,

    #[error("wait timed out")]
    Timeout,

    #[error("{0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_wraps_and_root_unwraps() {
        let err = Error::from(FrameError::NoOpenFrame).context("ending frame");
        assert_eq!(err.to_string(), "ending frame: no frame is open");
        assert!(matches!(err.root(), Error::Frame(FrameError::NoOpenFrame)));
    }

    #[test]
    fn file_errors_keep_not_found_and_decode_apart() {
        let nf: ResourceError = FileError::NotFound { path: "a.png".into() }.into();
        let dec: ResourceError = FileError::Decode {
            path: "b.png".into(),
            reason: "bad header".into(),
        }
        .into();
        assert!(matches!(nf, ResourceError::NotFound { .. }));
        assert!(matches!(dec, ResourceError::Decode { .. }));
    }

    #[test]
    fn shader_error_display_names_stage() {
        let err = ShaderCompileError::new(ShaderErrorKind::ParseError, "s", "expected ';'", "fn");
        assert_eq!(err.to_string(), "parse error in shader 's': expected ';'");
        assert!(Error::from(err).is_shader());
    }
}
