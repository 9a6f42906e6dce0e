use crate::annotation::BeatAnnotation;
use crate::error::{HraError, HraResult};
use crate::signal::Beats;
use serde::{Deserialize, Serialize};

/// RR intervals with one annotation per interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RRSeries {
    pub rr: Vec<f64>,
    pub annotations: Vec<BeatAnnotation>,
}

impl RRSeries {
    pub fn new(rr: Vec<f64>, annotations: Vec<BeatAnnotation>) -> HraResult<Self> {
        if rr.len() != annotations.len() {
            return Err(HraError::AnnotationMismatch {
                signal: rr.len(),
                annotations: annotations.len(),
            });
        }
        Ok(Self { rr, annotations })
    }

    /// Unannotated series, every interval Normal.
    pub fn from_values(rr: Vec<f64>) -> Self {
        let annotations = vec![BeatAnnotation::Normal; rr.len()];
        Self { rr, annotations }
    }

    /// Derive intervals from beat positions and per-beat annotations.
    pub fn from_beats(beats: &Beats, annotations: &[BeatAnnotation]) -> Self {
        let rr: Vec<f64> = beats.positions.windows(2).map(|w| w[1] - w[0]).collect();
        let annotations = if annotations.len() > 1 {
            propagate_rr_annotations(annotations)
        } else {
            Vec::new()
        };
        Self { rr, annotations }
    }

    pub fn len(&self) -> usize {
        self.rr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rr.is_empty()
    }

    /// Cumulative time of every interval end, starting from the first beat.
    pub fn time_track(&self) -> Vec<f64> {
        self.rr
            .iter()
            .scan(0.0, |acc, &x| {
                *acc += x;
                Some(*acc)
            })
            .collect()
    }

    /// Intervals whose annotation is Normal.
    pub fn normal_values(&self) -> Vec<f64> {
        self.rr
            .iter()
            .zip(&self.annotations)
            .filter(|(_, a)| a.is_normal())
            .map(|(&x, _)| x)
            .collect()
    }
}

/// RR annotations from beat annotations.
///
/// Interval `i` takes the annotation of beat `i + 1`. An ectopic beat also
/// marks the interval that follows it, unless it is the last beat. Ventricular
/// propagation runs before supraventricular.
pub fn propagate_rr_annotations(beat_annotations: &[BeatAnnotation]) -> Vec<BeatAnnotation> {
    if beat_annotations.len() < 2 {
        return Vec::new();
    }
    let mut rr_ann = beat_annotations[1..].to_vec();
    let last = rr_ann.len() - 1;
    for code in [BeatAnnotation::Ventricular, BeatAnnotation::Supraventricular] {
        let marked: Vec<usize> = rr_ann
            .iter()
            .enumerate()
            .filter(|&(i, &a)| a == code && i < last)
            .map(|(i, _)| i)
            .collect();
        for i in marked {
            rr_ann[i + 1] = code;
        }
    }
    rr_ann
}

/// Marks intervals as [`BeatAnnotation::Excluded`] before analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RrFilter {
    /// Annotations removed from analysis.
    pub annotation_filter: Vec<BeatAnnotation>,
    /// Accepted value range; intervals outside are excluded.
    pub square_filter: Option<(f64, f64)>,
}

impl Default for RrFilter {
    fn default() -> Self {
        Self {
            annotation_filter: vec![
                BeatAnnotation::Ventricular,
                BeatAnnotation::Supraventricular,
                BeatAnnotation::Artifact,
            ],
            square_filter: None,
        }
    }
}

impl RrFilter {
    /// A filter that leaves every interval untouched.
    pub fn none() -> Self {
        Self {
            annotation_filter: Vec::new(),
            square_filter: None,
        }
    }

    pub fn with_annotations(annotations: &[BeatAnnotation]) -> Self {
        Self {
            annotation_filter: annotations.to_vec(),
            square_filter: None,
        }
    }

    pub fn apply(&self, series: &RRSeries) -> RRSeries {
        let annotations = series
            .rr
            .iter()
            .zip(&series.annotations)
            .map(|(&x, &a)| {
                let out_of_range = self
                    .square_filter
                    .map(|(lo, hi)| x < lo || x > hi)
                    .unwrap_or(false);
                if out_of_range || self.annotation_filter.contains(&a) {
                    BeatAnnotation::Excluded
                } else {
                    a
                }
            })
            .collect();
        RRSeries {
            rr: series.rr.clone(),
            annotations,
        }
    }
}
