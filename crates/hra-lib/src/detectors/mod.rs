pub mod classify;
pub mod qrs;

pub use classify::{
    detect_artifacts, AmplitudeRange, ArtifactConfig, BeatClassifier, EctopyRule, NoEctopy,
};
pub use qrs::{detect_beat_indices, detect_beats, CoarseDetectorConfig, QrsConfig};
