//! Beat detection and heart rate asymmetry analysis of single-lead ECG.
//!
//! A [`Session`] owns one trace: it detects and classifies beats, derives the
//! RR series, and keeps Poincaré, runs and spectral results current across
//! manual edits.

pub mod annotation;
pub mod config;
pub mod detectors;
pub mod error;
pub mod io;
pub mod metrics;
pub mod rr;
pub mod session;
pub mod signal;

pub use annotation::BeatAnnotation;
pub use config::{AnalysisConfig, EditConfig, SpectralConfig};
pub use detectors::*;
pub use error::{ErrorKind, HraError, HraResult};
pub use metrics::*;
pub use rr::{propagate_rr_annotations, RRSeries, RrFilter};
pub use session::{
    EditOutcome, Orientation, OrientationResults, Session, SessionSnapshot, SessionStore,
};
pub use signal::*;
