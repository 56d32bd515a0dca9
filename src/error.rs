use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a forecast cycle.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("acquisition failed: {0}")]
    Acquisition(String),
    #[error("sample row {row} is missing required field `{field}`")]
    MissingField { row: usize, field: &'static str },
    #[error("sample row {row} has invalid `{field}`: {reason}")]
    InvalidField {
        row: usize,
        field: &'static str,
        reason: String,
    },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Renderer failures. Never fatal: the affected artifact is skipped.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("png encoding failed: {0}")]
    Encoding(#[from] png::EncodingError),
    #[error("nothing to draw: {0}")]
    Empty(&'static str),
    #[error("bundled font could not be parsed")]
    Font,
}

/// A per-storm artifact that could not be produced from the available data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataGap {
    /// No member trajectory could be built.
    NoTracks,
    /// No sample carries a usable `(latitude, longitude, wind)` triple.
    NoWindSamples,
    /// The strike raster has no cell above zero.
    NoStrikeSignal,
    /// The renderer failed for the named artifact.
    RenderFailed(&'static str),
}

impl fmt::Display for DataGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataGap::NoTracks => f.write_str("no member trajectories"),
            DataGap::NoWindSamples => f.write_str("no valid wind samples"),
            DataGap::NoStrikeSignal => f.write_str("no strike probability signal"),
            DataGap::RenderFailed(artifact) => write!(f, "rendering failed for {artifact}"),
        }
    }
}
