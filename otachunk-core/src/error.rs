use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::digest::Digest;

pub type Result<T, E = OtaError> = std::result::Result<T, E>;

/// Encode/decode pipeline stage, attached to errors surfaced by the orchestrators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Open,
    Split,
    Chain,
    DigestList,
    Manifest,
    Marker,
    Scan,
    Reconstruct,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Open => "open image",
            Step::Split => "split",
            Step::Chain => "digest chain",
            Step::DigestList => "digest list",
            Step::Manifest => "manifest update",
            Step::Marker => "ok marker",
            Step::Scan => "scan chunk set",
            Step::Reconstruct => "reconstruct",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OtaError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("empty input, nothing to chunk")]
    EmptyInput,

    #[error("source not found: {0:?}")]
    SourceNotFound(PathBuf),

    /// Writing or renaming one chunk file failed; later chunks were not touched.
    #[error("chunk {index} write failed ({path:?}): {source}")]
    ChunkWrite {
        index: u32,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed manifest at line {line}: {reason}")]
    MalformedManifest { line: usize, reason: String },

    #[error("no chunks named {base_name}.NNNN.<md5> in {dir:?}")]
    NoChunksFound { dir: PathBuf, base_name: String },

    /// Provisional `<base>.NNNN` files left behind by an interrupted encode.
    #[error("partial chunk set in {dir:?}: {provisional} chunk(s) were never renamed, re-split required")]
    PartialChunkSet { dir: PathBuf, provisional: usize },

    #[error("chunk index {index} appears more than once")]
    DuplicateChunkIndex { index: u32 },

    #[error("chunk {index} is missing from the set")]
    MissingChunk { index: u32 },

    #[error("chain verification failed at chunk {index}: expected {expected}, found {found}")]
    ChainVerificationFailed { index: u32, expected: Digest, found: Digest },

    #[error("digest list {path:?} disagrees with chunk set: {reason}")]
    DigestListMismatch { path: PathBuf, reason: String },

    #[error("invalid digest {0:?}: expected 32 hex characters")]
    InvalidDigest(String),

    #[error("io error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{step} failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: Box<OtaError>,
    },
}

impl OtaError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        OtaError::Io { path: path.into(), source }
    }

    /// Innermost error, skipping `Step` wrappers.
    pub fn root(&self) -> &OtaError {
        match self {
            OtaError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Step that failed, if this error came out of an orchestrator.
    pub fn step(&self) -> Option<Step> {
        match self {
            OtaError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Attach the current pipeline step to an error.
pub(crate) trait StepContext<T> {
    fn at(self, step: Step) -> Result<T>;
}

impl<T> StepContext<T> for Result<T> {
    fn at(self, step: Step) -> Result<T> {
        self.map_err(|e| match e {
            already @ OtaError::Step { .. } => already,
            other => OtaError::Step { step, source: Box::new(other) },
        })
    }
}
