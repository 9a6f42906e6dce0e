use crate::annotation::BeatAnnotation;
use crate::signal::{Beats, Trace};
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strategy that flags ectopic beats of one kind.
pub trait EctopyRule: fmt::Debug + Send + Sync {
    /// Indices (into `beats`) of the beats this rule matches.
    fn detect(&self, trace: &Trace, beats: &Beats) -> Vec<usize>;
}

/// Matches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEctopy;

impl EctopyRule for NoEctopy {
    fn detect(&self, _trace: &Trace, _beats: &Beats) -> Vec<usize> {
        Vec::new()
    }
}

/// Matches beats whose R-wave voltage lies in `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeRange {
    pub min: f64,
    pub max: f64,
}

impl EctopyRule for AmplitudeRange {
    fn detect(&self, _trace: &Trace, beats: &Beats) -> Vec<usize> {
        beats
            .values
            .iter()
            .enumerate()
            .filter(|(_, &v)| v >= self.min && v <= self.max)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Physiologically plausible RR range (seconds, exclusive bounds).
    pub accept_band: (f64, f64),
    /// Samples dropped next to each R wave before measuring noise.
    pub half_template: usize,
    /// Upper bound on intervals sampled for the noise floor.
    pub noise_sample_size: usize,
    pub floor_percentile: f64,
    pub floor_scale: f64,
    /// Noise multiple that flags an interval already outside the relaxed band.
    pub relaxed_noise_factor: f64,
    /// Noise multiple that flags any interval.
    pub noise_factor: f64,
    pub seed: u64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            accept_band: (0.3, 1.75),
            half_template: 50,
            noise_sample_size: 100,
            floor_percentile: 75.0,
            floor_scale: 1.3,
            relaxed_noise_factor: 2.0,
            noise_factor: 4.0,
            seed: 777,
        }
    }
}

impl ArtifactConfig {
    pub fn relaxed_band(&self) -> (f64, f64) {
        (self.accept_band.0 * 2.0, self.accept_band.1 * 0.75)
    }
}

/// Assigns an annotation to every detected beat.
#[derive(Debug)]
pub struct BeatClassifier {
    pub supraventricular: Box<dyn EctopyRule>,
    pub ventricular: Box<dyn EctopyRule>,
    pub artifact: ArtifactConfig,
}

impl Default for BeatClassifier {
    fn default() -> Self {
        Self::new(ArtifactConfig::default())
    }
}

impl BeatClassifier {
    pub fn new(artifact: ArtifactConfig) -> Self {
        Self {
            supraventricular: Box::new(NoEctopy),
            ventricular: Box::new(NoEctopy),
            artifact,
        }
    }

    /// Supraventricular first, ventricular overrides, artifacts override both.
    pub fn classify(&self, trace: &Trace, beats: &Beats) -> Vec<BeatAnnotation> {
        let mut annotations = vec![BeatAnnotation::Normal; beats.len()];
        for (rule, code) in [
            (&self.supraventricular, BeatAnnotation::Supraventricular),
            (&self.ventricular, BeatAnnotation::Ventricular),
        ] {
            for idx in rule.detect(trace, beats) {
                if let Some(slot) = annotations.get_mut(idx) {
                    *slot = code;
                }
            }
        }
        let artifacts = detect_artifacts(trace, beats, &self.artifact);
        for idx in &artifacts {
            annotations[*idx] = BeatAnnotation::Artifact;
        }
        debug!(
            "classified {} beats, {} artifacts",
            beats.len(),
            artifacts.len()
        );
        annotations
    }
}

/// Indices of beats whose preceding interval is implausible or noisy.
pub fn detect_artifacts(trace: &Trace, beats: &Beats, cfg: &ArtifactConfig) -> Vec<usize> {
    let n = beats.len();
    if n < 2 {
        return Vec::new();
    }
    let indices: Vec<usize> = beats
        .positions
        .iter()
        .map(|&t| trace.sample_index(t))
        .collect();
    let rr = preceding_intervals(&beats.positions);
    let noise = interval_noise(trace.voltage(), &indices, cfg.half_template);
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let floor = noise_floor(&rr, &noise, cfg, &mut rng);
    debug!("artifact noise floor: {:?}", floor);

    let (acc_lo, acc_hi) = cfg.accept_band;
    let (rel_lo, rel_hi) = cfg.relaxed_band();
    (1..n)
        .filter(|&i| {
            let interval = rr[i];
            let outside_accept = interval < acc_lo || interval > acc_hi;
            let outside_relaxed = interval < rel_lo || interval > rel_hi;
            let noisy = |factor: f64| match (noise[i], floor) {
                (Some(level), Some(floor)) => level > factor * floor,
                _ => false,
            };
            outside_accept
                || (outside_relaxed && noisy(cfg.relaxed_noise_factor))
                || noisy(cfg.noise_factor)
        })
        .collect()
}

/// `out[i]` is the interval ending at beat `i`; `out[0]` is NaN.
fn preceding_intervals(positions: &[f64]) -> Vec<f64> {
    std::iter::once(f64::NAN)
        .chain(positions.windows(2).map(|w| w[1] - w[0]))
        .collect()
}

/// Population standard deviation of the voltage between consecutive beats,
/// trimmed by `half` samples on each side. `out[0]` and empty segments are `None`.
pub fn interval_noise(voltage: &[f64], beat_indices: &[usize], half: usize) -> Vec<Option<f64>> {
    std::iter::once(None)
        .chain(beat_indices.windows(2).map(|w| {
            let start = w[0] + half;
            let end = w[1].saturating_sub(half).min(voltage.len());
            (start < end).then(|| population_std(&voltage[start..end]))
        }))
        .collect()
}

/// Reference noise level from a random sample of plausible intervals.
///
/// `None` when fewer than six beats exist or no sampled interval qualifies.
pub fn noise_floor(
    rr: &[f64],
    noise: &[Option<f64>],
    cfg: &ArtifactConfig,
    rng: &mut StdRng,
) -> Option<f64> {
    let n = rr.len();
    if n < 6 {
        return None;
    }
    let (lo, hi) = cfg.relaxed_band();
    let take = cfg.noise_sample_size.min(n - 2);
    let levels: Vec<f64> = rand::seq::index::sample(rng, n - 2, take)
        .into_iter()
        .map(|i| i + 2)
        .filter(|&i| rr[i] > lo && rr[i] < hi)
        .filter_map(|i| noise[i])
        .collect();
    if levels.is_empty() {
        return None;
    }
    Some(percentile(&levels, cfg.floor_percentile) * cfg.floor_scale)
}

fn population_std(data: &[f64]) -> f64 {
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    (data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt()
}

/// Percentile with linear interpolation between closest ranks.
fn percentile(values: &[f64], pct: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const FS: f64 = 250.0;

    /// Low-level 37 Hz hum with an optional 45 Hz burst of the given amplitude.
    fn noisy_trace(samples: usize, burst: Option<(usize, usize, f64)>) -> Trace {
        let voltage = (0..samples)
            .map(|i| {
                let t = i as f64 / FS;
                let mut v = 0.01 * (2.0 * PI * 37.0 * t).sin();
                if let Some((start, end, amplitude)) = burst {
                    if i >= start && i < end {
                        v += amplitude * (2.0 * PI * 45.0 * t).sin();
                    }
                }
                v
            })
            .collect();
        Trace::from_uniform(FS, voltage).unwrap()
    }

    fn beats_at(trace: &Trace, indices: &[usize]) -> Beats {
        Beats::from_indices(trace, indices)
    }

    #[test]
    fn percentile_interpolates() {
        assert!((percentile(&[4.0, 1.0, 3.0, 2.0], 75.0) - 3.25).abs() < 1e-12);
        assert_eq!(percentile(&[7.0], 75.0), 7.0);
    }

    #[test]
    fn clean_regular_rhythm_is_all_normal() {
        let trace = noisy_trace(20 * 200 + 200, None);
        let indices: Vec<usize> = (0..20).map(|k| 100 + 200 * k).collect();
        let beats = beats_at(&trace, &indices);
        let annotations = BeatClassifier::default().classify(&trace, &beats);
        assert!(annotations.iter().all(|a| a.is_normal()));
    }

    #[test]
    fn short_interval_and_noise_burst_are_artifacts() {
        // beats every 0.8 s, an extra beat 0.2 s after beat 5, noise between beats 12 and 13
        let mut indices: Vec<usize> = (0..20).map(|k| 100 + 200 * k).collect();
        indices.insert(6, 100 + 200 * 5 + 50);
        let noisy_from = indices[13];
        let noisy_to = indices[14];
        let trace = noisy_trace(20 * 200 + 200, Some((noisy_from, noisy_to, 0.5)));
        let beats = beats_at(&trace, &indices);

        let annotations = BeatClassifier::default().classify(&trace, &beats);
        let artifacts: Vec<usize> = annotations
            .iter()
            .enumerate()
            .filter(|(_, a)| **a == BeatAnnotation::Artifact)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(artifacts, vec![6, 14]);
    }

    /// Beats every 0.8 s except a 1.4 s pause before beat 10: inside the
    /// accept band, outside the relaxed one.
    fn paused_rhythm() -> Vec<usize> {
        (0..20)
            .map(|k| if k < 10 { 100 + 200 * k } else { 250 + 200 * k })
            .collect()
    }

    #[test]
    fn long_interval_with_moderate_noise_is_artifact() {
        let indices = paused_rhythm();
        // std ~0.026 against a floor of ~0.009: above 2x, below 4x
        let trace = noisy_trace(4300, Some((indices[9], indices[10], 0.035)));
        let beats = beats_at(&trace, &indices);
        let artifacts = detect_artifacts(&trace, &beats, &ArtifactConfig::default());
        assert_eq!(artifacts, vec![10]);
    }

    #[test]
    fn long_interval_with_clean_signal_is_kept() {
        let indices = paused_rhythm();
        let trace = noisy_trace(4300, None);
        let beats = beats_at(&trace, &indices);
        assert!(detect_artifacts(&trace, &beats, &ArtifactConfig::default()).is_empty());
    }

    #[test]
    fn interval_on_band_edge_is_accepted() {
        let trace = noisy_trace(1000, None);
        let beats = Beats {
            positions: vec![0.5, 1.0, 1.5, 2.0],
            values: vec![1.0; 4],
        };
        let cfg = ArtifactConfig {
            accept_band: (0.5, 1.75),
            ..ArtifactConfig::default()
        };
        assert!(detect_artifacts(&trace, &beats, &cfg).is_empty());

        let cfg = ArtifactConfig {
            accept_band: (0.3, 0.5),
            ..ArtifactConfig::default()
        };
        assert!(detect_artifacts(&trace, &beats, &cfg).is_empty());
    }

    #[test]
    fn few_beats_use_rr_band_only() {
        let trace = noisy_trace(2000, Some((500, 700, 0.5)));
        let beats = beats_at(&trace, &[100, 300, 500, 700, 1200]);
        let artifacts = detect_artifacts(&trace, &beats, &ArtifactConfig::default());
        // 500 samples = 2.0 s is outside the accept band; noise is ignored without a floor
        assert_eq!(artifacts, vec![4]);
    }

    #[test]
    fn artifacts_override_ectopy_rules() {
        let trace = noisy_trace(1200, None);
        let beats = Beats {
            positions: vec![0.4, 1.2, 1.3, 2.1],
            values: vec![1.0, 2.5, 1.1, 0.4],
        };
        let classifier = BeatClassifier {
            supraventricular: Box::new(AmplitudeRange { min: 0.0, max: 0.5 }),
            ventricular: Box::new(AmplitudeRange { min: 2.0, max: 3.0 }),
            artifact: ArtifactConfig::default(),
        };
        let annotations = classifier.classify(&trace, &beats);
        assert_eq!(
            annotations,
            vec![
                BeatAnnotation::Normal,
                BeatAnnotation::Ventricular,
                BeatAnnotation::Artifact,
                BeatAnnotation::Supraventricular,
            ]
        );
    }

    #[test]
    fn noise_ignores_empty_segments() {
        let voltage = vec![1.0, 3.0, 1.0, 3.0, 1.0, 3.0];
        let noise = interval_noise(&voltage, &[0, 2, 6], 1);
        assert_eq!(noise[0], None);
        assert_eq!(noise[1], None);
        assert_eq!(noise[2], Some(1.0));
    }
}
