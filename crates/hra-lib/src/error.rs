use thiserror::Error;

/// Result type for engine operations.
pub type HraResult<T> = Result<T, HraError>;

/// Coarse classification of [`HraError`] for callers that map faults onto
/// their own surface (HTTP status, exit code, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input arrays. Not recoverable by retrying.
    InputShape,
    /// Caller-supplied analysis parameters are invalid.
    Configuration,
    /// An edit referenced something that does not exist.
    Edit,
}

/// Errors raised by the analysis engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HraError {
    /// Time and voltage arrays differ in length
    #[error("time/voltage length mismatch: {time} time samples, {voltage} voltage samples")]
    LengthMismatch { time: usize, voltage: usize },

    /// Time track is not strictly increasing
    #[error("time track is not strictly increasing at sample {index}")]
    TimeNotIncreasing { index: usize },

    /// Signal and annotation arrays differ in length
    #[error("signal/annotation length mismatch: {signal} values, {annotations} annotations")]
    AnnotationMismatch { signal: usize, annotations: usize },

    /// Runs need at least two samples
    #[error("cannot compute runs from a sequence of {len} sample(s)")]
    SequenceTooShort { len: usize },

    /// Every clean segment is shorter than two samples
    #[error("no segment of at least two normal samples; runs cannot be computed")]
    NoRunnableSegment,

    /// Spectral band edges are not strictly increasing / unique
    #[error("band cuts must be strictly increasing without duplicates: {0:?}")]
    InvalidBandCuts(Vec<f64>),

    /// Beat index outside the beat arrays
    #[error("beat index {index} out of range ({len} beats)")]
    BeatIndexOutOfRange { index: usize, len: usize },

    /// Click lies outside the recorded trace
    #[error("time {time} s lies outside the trace")]
    ClickOutsideTrace { time: f64 },

    /// Unknown integer annotation code
    #[error("unknown annotation code {0}")]
    UnknownAnnotation(u8),
}

impl HraError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HraError::LengthMismatch { .. }
            | HraError::TimeNotIncreasing { .. }
            | HraError::AnnotationMismatch { .. }
            | HraError::SequenceTooShort { .. }
            | HraError::NoRunnableSegment
            | HraError::UnknownAnnotation(_) => ErrorKind::InputShape,
            HraError::InvalidBandCuts(_) => ErrorKind::Configuration,
            HraError::BeatIndexOutOfRange { .. } | HraError::ClickOutsideTrace { .. } => {
                ErrorKind::Edit
            }
        }
    }
}
