//! Monotonic runs of the RR series.
//!
//! A deceleration run is a maximal stretch of lengthening intervals, an
//! acceleration run of shortening ones. Runs never cross an annotated
//! (non-normal) interval.

use crate::annotation::BeatAnnotation;
use crate::error::{HraError, HraResult};
use crate::rr::RRSeries;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDirection {
    /// RR increasing.
    Decelerating,
    /// RR decreasing.
    Accelerating,
    /// RR unchanged.
    Neutral,
}

impl RunDirection {
    fn of_step(prev: f64, next: f64) -> Self {
        if next > prev {
            RunDirection::Decelerating
        } else if next < prev {
            RunDirection::Accelerating
        } else {
            RunDirection::Neutral
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub direction: RunDirection,
    pub length: usize,
}

/// Run-length histograms: entry `k - 1` counts runs of length `k`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runs {
    pub decelerating: Vec<usize>,
    pub accelerating: Vec<usize>,
    pub neutral: Vec<usize>,
}

impl Runs {
    pub fn from_runs(runs: &[Run]) -> Self {
        Self {
            decelerating: histogram(runs, RunDirection::Decelerating),
            accelerating: histogram(runs, RunDirection::Accelerating),
            neutral: histogram(runs, RunDirection::Neutral),
        }
    }
}

pub fn runs(series: &RRSeries) -> HraResult<Runs> {
    runs_from_values(&series.rr, &series.annotations)
}

pub fn runs_from_values(values: &[f64], annotations: &[BeatAnnotation]) -> HraResult<Runs> {
    Ok(Runs::from_runs(&split_into_runs(values, annotations)?))
}

/// All runs, in order, across every clean segment.
pub fn split_into_runs(values: &[f64], annotations: &[BeatAnnotation]) -> HraResult<Vec<Run>> {
    if values.len() != annotations.len() {
        return Err(HraError::AnnotationMismatch {
            signal: values.len(),
            annotations: annotations.len(),
        });
    }
    if values.len() < 2 {
        return Err(HraError::SequenceTooShort { len: values.len() });
    }

    let segments: Vec<&[f64]> = clean_segments(values, annotations)
        .into_iter()
        .filter(|s| s.len() >= 2)
        .collect();
    if segments.is_empty() {
        return Err(HraError::NoRunnableSegment);
    }
    Ok(segments.into_iter().flat_map(segment_runs).collect())
}

/// Maximal stretches of normal samples; annotated samples are dropped.
fn clean_segments<'a>(values: &'a [f64], annotations: &[BeatAnnotation]) -> Vec<&'a [f64]> {
    let mut segments = Vec::new();
    let mut start = 0;
    for (i, ann) in annotations.iter().enumerate() {
        if !ann.is_normal() {
            if start < i {
                segments.push(&values[start..i]);
            }
            start = i + 1;
        }
    }
    if start < values.len() {
        segments.push(&values[start..]);
    }
    segments
}

/// The first sample is the reference; each later sample extends or starts a run.
fn segment_runs(segment: &[f64]) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for w in segment.windows(2) {
        let direction = RunDirection::of_step(w[0], w[1]);
        match runs.last_mut() {
            Some(run) if run.direction == direction => run.length += 1,
            _ => runs.push(Run {
                direction,
                length: 1,
            }),
        }
    }
    runs
}

fn histogram(runs: &[Run], direction: RunDirection) -> Vec<usize> {
    let lengths = runs
        .iter()
        .filter(|r| r.direction == direction)
        .map(|r| r.length);
    let longest = lengths.clone().max().unwrap_or(0);
    let mut hist = vec![0; longest];
    for len in lengths {
        hist[len - 1] += 1;
    }
    hist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::annotations_from_codes;

    fn runs_of(values: &[f64], codes: &[u8]) -> HraResult<Runs> {
        runs_from_values(values, &annotations_from_codes(codes).unwrap())
    }

    #[test]
    fn single_deceleration_run() {
        let r = runs_of(&[0.0, 2.0, 3.0, 4.0, 5.0], &[0; 5]).unwrap();
        assert_eq!(r.decelerating, vec![0, 0, 0, 1]);
        assert!(r.accelerating.is_empty());
        assert!(r.neutral.is_empty());
    }

    #[test]
    fn deceleration_then_acceleration() {
        let r = runs_of(&[0.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0, 2.0, 1.0], &[0; 9]).unwrap();
        assert_eq!(r.decelerating, vec![0, 0, 0, 1]);
        assert_eq!(r.accelerating, vec![0, 0, 0, 1]);
    }

    #[test]
    fn alternating_series() {
        let r = runs_of(&[4.0, 3.0, 2.0, 3.0, 2.0, 3.0, 2.0, 3.0, 2.0], &[0; 9]).unwrap();
        assert_eq!(r.decelerating, vec![3]);
        assert_eq!(r.accelerating, vec![3, 1]);
        assert!(r.neutral.is_empty());
    }

    #[test]
    fn neutral_runs_are_counted() {
        let r = runs_of(&[1.0, 2.0, 3.0, 3.0, 3.0, 2.0, 1.0], &[0; 7]).unwrap();
        assert_eq!(r.decelerating, vec![0, 1]);
        assert_eq!(r.accelerating, vec![0, 1]);
        assert_eq!(r.neutral, vec![0, 1]);
    }

    #[test]
    fn annotation_splits_segments() {
        let r = runs_of(&[1.0, 2.0, 3.0, 4.0, 3.0, 2.0, 1.0], &[0, 0, 0, 1, 0, 0, 0]).unwrap();
        assert_eq!(r.decelerating, vec![0, 1]);
        assert_eq!(r.accelerating, vec![0, 1]);
        assert!(r.neutral.is_empty());
    }

    #[test]
    fn several_annotations() {
        let values = [
            10.0, 9.0, 8.0, 7.0, 6.0, 6.0, 6.0, 6.0, 5.0, 4.0, 3.0, 4.0, 5.0, 6.0,
        ];
        let mut codes = [0u8; 14];
        codes[4] = 1;
        codes[13] = 1;
        let r = runs_of(&values, &codes).unwrap();
        assert_eq!(r.decelerating, vec![0, 1]);
        assert_eq!(r.accelerating, vec![0, 0, 2]);
        assert_eq!(r.neutral, vec![0, 1]);
    }

    #[test]
    fn no_runnable_segment_is_an_error() {
        assert_eq!(
            runs_of(&[3.0, 2.0], &[0, 3]),
            Err(HraError::NoRunnableSegment)
        );
        assert_eq!(
            runs_of(&[3.0], &[0]),
            Err(HraError::SequenceTooShort { len: 1 })
        );
        assert!(matches!(
            runs_of(&[3.0, 2.0, 1.0], &[0, 0]),
            Err(HraError::AnnotationMismatch { .. })
        ));
    }
}
