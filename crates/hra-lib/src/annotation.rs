use crate::error::HraError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-beat (and per-RR) classification.
///
/// Serialized as its integer code so exported files and snapshots stay
/// interchangeable with other HRA tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BeatAnnotation {
    #[default]
    Normal,
    Ventricular,
    Supraventricular,
    Artifact,
    /// Removed from analysis by a filter.
    Excluded,
}

impl BeatAnnotation {
    pub const fn code(self) -> u8 {
        match self {
            BeatAnnotation::Normal => 0,
            BeatAnnotation::Ventricular => 1,
            BeatAnnotation::Supraventricular => 2,
            BeatAnnotation::Artifact => 3,
            BeatAnnotation::Excluded => 16,
        }
    }

    pub fn is_normal(self) -> bool {
        self == BeatAnnotation::Normal
    }

    /// Ectopic beats invalidate the interval that follows them as well.
    pub fn is_ectopic(self) -> bool {
        matches!(
            self,
            BeatAnnotation::Ventricular | BeatAnnotation::Supraventricular
        )
    }
}

impl TryFrom<u8> for BeatAnnotation {
    type Error = HraError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(BeatAnnotation::Normal),
            1 => Ok(BeatAnnotation::Ventricular),
            2 => Ok(BeatAnnotation::Supraventricular),
            3 => Ok(BeatAnnotation::Artifact),
            16 => Ok(BeatAnnotation::Excluded),
            other => Err(HraError::UnknownAnnotation(other)),
        }
    }
}

impl From<BeatAnnotation> for u8 {
    fn from(annotation: BeatAnnotation) -> Self {
        annotation.code()
    }
}

impl fmt::Display for BeatAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BeatAnnotation::Normal => "normal",
            BeatAnnotation::Ventricular => "ventricular",
            BeatAnnotation::Supraventricular => "supraventricular",
            BeatAnnotation::Artifact => "artifact",
            BeatAnnotation::Excluded => "excluded",
        };
        f.write_str(name)
    }
}

/// Convert raw integer codes (e.g. from an RR file) into annotations.
pub fn annotations_from_codes(codes: &[u8]) -> Result<Vec<BeatAnnotation>, HraError> {
    codes.iter().map(|&c| BeatAnnotation::try_from(c)).collect()
}

pub fn annotation_codes(annotations: &[BeatAnnotation]) -> Vec<u8> {
    annotations.iter().map(|a| a.code()).collect()
}
