use crate::signal::{Beats, Trace};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use realfft::num_complex::Complex;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

/// Parameters of the envelope detector that proposes beat candidates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoarseDetectorConfig {
    /// Lower cutoff for the single-pole high-pass filter (Hz).
    pub lowcut_hz: f64,
    /// Upper cutoff for the single-pole low-pass filter (Hz).
    pub highcut_hz: f64,
    /// Moving window integration length (seconds).
    pub integration_window_s: f64,
    /// Refractory period between two candidates (seconds).
    pub min_rr_s: f64,
    /// Scale between noise and signal envelopes for the adaptive threshold.
    pub threshold_scale: f64,
    /// How far back to search (seconds) for the bandpassed maximum.
    pub search_back_s: f64,
}

impl Default for CoarseDetectorConfig {
    fn default() -> Self {
        Self {
            lowcut_hz: 5.0,
            highcut_hz: 15.0,
            integration_window_s: 0.150,
            min_rr_s: 0.120,
            threshold_scale: 0.6,
            search_back_s: 0.150,
        }
    }
}

/// Configuration of the full QRS detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QrsConfig {
    pub coarse: CoarseDetectorConfig,
    /// Half width (samples) of the refinement window around each candidate.
    pub refine_distance: usize,
    /// Candidates closer than this (samples) collapse into one.
    pub min_separation: usize,
    /// Number of candidates drawn when building the template.
    pub template_sample_size: usize,
    /// Pairwise correlation a sampled beat needs to enter the template.
    pub template_pair_correlation: f64,
    /// Correlation level that marks a template match.
    pub match_threshold: f64,
    /// Samples added on each side of a match region before the peak search.
    pub peak_extension: usize,
    /// Accepted peak-to-peak ratio of a match against the template.
    pub amplitude_ratio: (f64, f64),
    pub seed: u64,
}

impl Default for QrsConfig {
    fn default() -> Self {
        Self {
            coarse: CoarseDetectorConfig::default(),
            refine_distance: 100,
            min_separation: 20,
            template_sample_size: 8,
            template_pair_correlation: 0.8,
            match_threshold: 0.75,
            peak_extension: 10,
            amplitude_ratio: (0.5, 2.0),
            seed: 777,
        }
    }
}

/// Detect R waves and return their times and voltages.
pub fn detect_beats(trace: &Trace, cfg: &QrsConfig) -> Beats {
    let indices = detect_beat_indices(trace, cfg);
    Beats::from_indices(trace, &indices)
}

/// Detect R waves and return their sample indices (strictly increasing).
///
/// Degenerate input (flat, too short, too few similar beats) yields an
/// empty vector rather than an error.
pub fn detect_beat_indices(trace: &Trace, cfg: &QrsConfig) -> Vec<usize> {
    let fs = trace.sampling_rate();
    let voltage = trace.voltage();
    if voltage.len() < 3 || fs <= 0.0 {
        return Vec::new();
    }

    let coarse = coarse_candidates(voltage, fs, &cfg.coarse);
    let refined = refine_to_local_max(voltage, &coarse, cfg.refine_distance);
    let candidates = merge_close_peaks(&refined, cfg.min_separation);
    debug!(
        "qrs: {} coarse candidates, {} after refine/merge",
        coarse.len(),
        candidates.len()
    );

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let Some(template) = build_template(voltage, &candidates, fs, cfg, &mut rng) else {
        warn!("qrs: no consistent beat template; returning no beats");
        return Vec::new();
    };

    let correlation = match normalized_correlation(voltage, &template) {
        Some(c) => c,
        None => {
            warn!("qrs: template correlation failed");
            return Vec::new();
        }
    };
    let peaks = template_matches(voltage, &correlation, &template, cfg);
    debug!("qrs: {} beats accepted from template matching", peaks.len());
    peaks
}

/// Window length used for the beat template: `floor(fs/4 + 1)`, made odd.
pub fn template_length(fs: f64) -> usize {
    let len = (fs / 4.0 + 1.0).floor().max(1.0) as usize;
    if len % 2 == 0 {
        len + 1
    } else {
        len
    }
}

fn coarse_candidates(voltage: &[f64], fs: f64, cfg: &CoarseDetectorConfig) -> Vec<usize> {
    let bandpassed = bandpass(voltage, fs, cfg.lowcut_hz, cfg.highcut_hz);
    let slope: Vec<f64> = std::iter::once(0.0)
        .chain(bandpassed.windows(2).map(|w| (w[1] - w[0]).powi(2)))
        .collect();
    let win = ((cfg.integration_window_s * fs).round() as usize).max(1);
    let envelope = moving_average(&slope, win);

    let peaks = adaptive_peaks(&bandpassed, &envelope, fs, cfg);
    if peaks.len() < 2 {
        debug!("qrs: adaptive threshold found {} candidates, using fallback", peaks.len());
        return fallback_candidates(voltage, fs, cfg.min_rr_s);
    }
    peaks
}

fn bandpass(data: &[f64], fs: f64, low: f64, high: f64) -> Vec<f64> {
    let hp = if low > 0.0 {
        highpass(data, fs, low)
    } else {
        data.to_vec()
    };
    if high <= 0.0 || high >= fs * 0.5 {
        hp
    } else {
        lowpass(&hp, fs, high)
    }
}

fn rc_constant(cutoff: f64) -> f64 {
    1.0 / (2.0 * std::f64::consts::PI * cutoff.max(0.01))
}

fn highpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    let dt = 1.0 / fs;
    let rc = rc_constant(cutoff);
    let alpha = rc / (rc + dt);
    let Some(&first) = data.first() else {
        return Vec::new();
    };
    let mut prev_x = first;
    let mut prev_y = first;
    data.iter()
        .map(|&x| {
            prev_y = alpha * (prev_y + x - prev_x);
            prev_x = x;
            prev_y
        })
        .collect()
}

fn lowpass(data: &[f64], fs: f64, cutoff: f64) -> Vec<f64> {
    let dt = 1.0 / fs;
    let alpha = dt / (rc_constant(cutoff) + dt);
    let Some(&first) = data.first() else {
        return Vec::new();
    };
    let mut y = first;
    data.iter()
        .map(|&x| {
            y += alpha * (x - y);
            y
        })
        .collect()
}

/// Trailing moving average; the first `win - 1` outputs see a partial window.
fn moving_average(data: &[f64], win: usize) -> Vec<f64> {
    if win <= 1 {
        return data.to_vec();
    }
    let mut acc = 0.0;
    data.iter()
        .enumerate()
        .map(|(i, &x)| {
            acc += x;
            if i >= win {
                acc -= data[i - win];
            }
            acc / win as f64
        })
        .collect()
}

fn adaptive_peaks(
    bandpassed: &[f64],
    envelope: &[f64],
    fs: f64,
    cfg: &CoarseDetectorConfig,
) -> Vec<usize> {
    if bandpassed.is_empty() || envelope.is_empty() {
        return Vec::new();
    }
    let refractory = ((cfg.min_rr_s * fs).round() as usize).max(1);
    let search = ((cfg.search_back_s * fs).round() as usize).max(1);

    let init = envelope.len().min((fs as usize).max(1));
    let avg = envelope[..init].iter().sum::<f64>() / init as f64;
    let mut signal_level = avg;
    let mut noise_level = avg * 0.5;
    let threshold_of =
        |signal: f64, noise: f64| noise + cfg.threshold_scale * (signal - noise).max(0.0);
    let mut threshold = threshold_of(signal_level, noise_level);
    let mut last_trigger: Option<usize> = None;
    let mut peaks = Vec::new();

    for (i, &sample) in envelope.iter().enumerate() {
        let refractory_ok = last_trigger.map_or(true, |last| i - last >= refractory);
        if sample >= threshold && refractory_ok {
            let start = i.saturating_sub(search);
            let end = i.min(bandpassed.len() - 1);
            peaks.push(argmax(&bandpassed[start..=end]) + start);
            last_trigger = Some(i);
            signal_level = 0.125 * sample + 0.875 * signal_level;
        } else {
            noise_level = 0.125 * sample + 0.875 * noise_level;
        }
        threshold = threshold_of(signal_level, noise_level);
    }

    peaks.sort_unstable();
    peaks.dedup();
    peaks
}

/// Local maxima above a 150 ms moving baseline, spaced by the refractory period.
fn fallback_candidates(voltage: &[f64], fs: f64, min_rr_s: f64) -> Vec<usize> {
    let min_gap = ((min_rr_s * fs) as usize).max(1);
    let win = ((0.150 * fs) as usize).max(1);
    let baseline = moving_average(voltage, win);
    let detrended: Vec<f64> = voltage.iter().zip(&baseline).map(|(v, b)| v - b).collect();

    let mut peaks: Vec<usize> = Vec::new();
    for i in 1..detrended.len().saturating_sub(1) {
        let y = detrended[i];
        let is_peak = y > 0.0 && y > detrended[i - 1] && y > detrended[i + 1];
        let spaced = peaks.last().map_or(true, |&last| i - last >= min_gap);
        if is_peak && spaced {
            peaks.push(i);
        }
    }
    peaks
}

/// Index of the first maximum.
fn argmax(data: &[f64]) -> usize {
    let mut best = 0;
    for (i, &x) in data.iter().enumerate() {
        if x > data[best] {
            best = i;
        }
    }
    best
}

fn peak_to_peak(data: &[f64]) -> f64 {
    let (lo, hi) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| {
            (lo.min(x), hi.max(x))
        });
    if lo.is_finite() && hi.is_finite() {
        hi - lo
    } else {
        0.0
    }
}

/// Move every candidate to the voltage maximum in `[c - distance, c + distance)`.
pub fn refine_to_local_max(voltage: &[f64], candidates: &[usize], distance: usize) -> Vec<usize> {
    if voltage.is_empty() {
        return Vec::new();
    }
    candidates
        .iter()
        .filter(|&&c| c < voltage.len())
        .map(|&c| {
            let start = c.saturating_sub(distance);
            let end = (c + distance).min(voltage.len()).max(start + 1);
            start + argmax(&voltage[start..end])
        })
        .collect()
}

/// Collapse runs of candidates closer than `min_separation` into their median.
///
/// Input is sorted first. An even-length run resolves to the floor of the
/// mean of its two middle values.
pub fn merge_close_peaks(candidates: &[usize], min_separation: usize) -> Vec<usize> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable();

    let mut merged = Vec::new();
    let mut run_start = 0;
    for i in 1..=sorted.len() {
        let run_ends = i == sorted.len() || sorted[i] - sorted[i - 1] >= min_separation;
        if run_ends && i > run_start {
            merged.push(run_median(&sorted[run_start..i]));
            run_start = i;
        }
    }
    merged.dedup();
    merged
}

fn run_median(run: &[usize]) -> usize {
    let mid = run.len() / 2;
    if run.len() % 2 == 1 {
        run[mid]
    } else {
        (run[mid - 1] + run[mid]) / 2
    }
}

fn build_template(
    voltage: &[f64],
    candidates: &[usize],
    fs: f64,
    cfg: &QrsConfig,
    rng: &mut StdRng,
) -> Option<Vec<f64>> {
    let len = template_length(fs);
    let half = len / 2;
    let window = |c: usize| beat_window(voltage, c, half);

    let pool: Vec<usize> = candidates
        .iter()
        .skip(2)
        .copied()
        .filter(|&c| c >= half && c + half < voltage.len())
        .collect();
    if pool.len() < 3 {
        debug!("qrs: template pool holds {} beats", pool.len());
        return None;
    }

    let take = cfg.template_sample_size.min(pool.len());
    let sampled: Vec<usize> = pool.choose_multiple(rng, take).copied().collect();

    let mut keep = vec![false; sampled.len()];
    for a in 0..sampled.len() {
        for b in (a + 1)..sampled.len() {
            let r = pearson(window(sampled[a]), window(sampled[b]));
            if r > cfg.template_pair_correlation {
                keep[a] = true;
                keep[b] = true;
            }
        }
    }

    let kept: Vec<usize> = sampled
        .iter()
        .zip(&keep)
        .filter(|(_, &k)| k)
        .map(|(&c, _)| c)
        .collect();
    if kept.is_empty() {
        return None;
    }

    let mut template = vec![0.0; len];
    for &c in &kept {
        for (acc, &v) in template.iter_mut().zip(window(c)) {
            *acc += v;
        }
    }
    let count = kept.len() as f64;
    template.iter_mut().for_each(|v| *v /= count);
    debug!("qrs: template of {} samples from {} beats", len, kept.len());
    Some(template)
}

fn beat_window(voltage: &[f64], centre: usize, half: usize) -> &[f64] {
    &voltage[centre - half..=centre + half]
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a[..n].iter().zip(&b[..n]) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    let denom = (var_a * var_b).sqrt();
    if denom > 0.0 && denom.is_finite() {
        cov / denom
    } else {
        0.0
    }
}

/// Pearson correlation of `template` against every window of `voltage`.
///
/// Entry `i` correlates the window starting at sample `i`; the trace is
/// zero-extended by one template length so every offset has a full window.
/// Flat windows score 0. Returns `None` only if the FFT fails.
pub fn normalized_correlation(voltage: &[f64], template: &[f64]) -> Option<Vec<f64>> {
    let n = voltage.len();
    let len = template.len();
    if n == 0 || len == 0 {
        return Some(Vec::new());
    }

    // Correlation is invariant to a common offset; centring limits cancellation.
    let mut extended = voltage.to_vec();
    extended.resize(n + len, 0.0);
    let offset = extended.iter().sum::<f64>() / extended.len() as f64;
    extended.iter_mut().for_each(|v| *v -= offset);

    let t_mean = template.iter().sum::<f64>() / len as f64;
    let centred: Vec<f64> = template.iter().map(|t| t - t_mean).collect();
    let t_norm = centred.iter().map(|t| t * t).sum::<f64>();
    if t_norm <= 0.0 {
        return Some(vec![0.0; n]);
    }

    let cross = cross_correlate(&extended, &centred, n)?;

    let mut sum = vec![0.0; extended.len() + 1];
    let mut sum_sq = vec![0.0; extended.len() + 1];
    for (i, &x) in extended.iter().enumerate() {
        sum[i + 1] = sum[i] + x;
        sum_sq[i + 1] = sum_sq[i] + x * x;
    }
    let energy = sum_sq[extended.len()] / extended.len() as f64;
    let flat = 1e-12 * energy * len as f64;

    let out = (0..n)
        .map(|i| {
            let s = sum[i + len] - sum[i];
            let s2 = sum_sq[i + len] - sum_sq[i];
            let var = s2 - s * s / len as f64;
            if var <= flat {
                return 0.0;
            }
            let r = cross[i] / (var * t_norm).sqrt();
            if r.is_finite() {
                r.clamp(-1.0, 1.0)
            } else {
                0.0
            }
        })
        .collect();
    Some(out)
}

/// `out[i] = sum_k signal[i + k] * kernel[k]` for `i < count`.
fn cross_correlate(signal: &[f64], kernel: &[f64], count: usize) -> Option<Vec<f64>> {
    let size = (signal.len() + kernel.len()).next_power_of_two();
    let mut planner = RealFftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);

    let mut a = forward.make_input_vec();
    a[..signal.len()].copy_from_slice(signal);
    let mut b = forward.make_input_vec();
    for (slot, &k) in b.iter_mut().zip(kernel.iter().rev()) {
        *slot = k;
    }

    let mut spec_a = forward.make_output_vec();
    let mut spec_b = forward.make_output_vec();
    forward.process(&mut a, &mut spec_a).ok()?;
    forward.process(&mut b, &mut spec_b).ok()?;
    for (x, y) in spec_a.iter_mut().zip(&spec_b) {
        *x *= *y;
    }
    if let Some(first) = spec_a.first_mut() {
        *first = Complex::new(first.re, 0.0);
    }
    if let Some(last) = spec_a.last_mut() {
        *last = Complex::new(last.re, 0.0);
    }

    let mut conv = inverse.make_output_vec();
    inverse.process(&mut spec_a, &mut conv).ok()?;
    let scale = 1.0 / size as f64;
    let lag = kernel.len() - 1;
    Some((0..count).map(|i| conv[i + lag] * scale).collect())
}

fn template_matches(
    voltage: &[f64],
    correlation: &[f64],
    template: &[f64],
    cfg: &QrsConfig,
) -> Vec<usize> {
    let n = voltage.len();
    let half = template.len() / 2;
    let template_ptp = peak_to_peak(template);
    let (lo_ratio, hi_ratio) = cfg.amplitude_ratio;

    let mut peaks = Vec::new();
    for (start, end) in threshold_regions(correlation, cfg.match_threshold) {
        let centre_start = start + half;
        if centre_start >= n {
            continue;
        }
        let lo = centre_start.saturating_sub(cfg.peak_extension);
        let hi = (end + half + cfg.peak_extension).min(n - 1);
        let window = &voltage[lo..=hi];
        let ptp = peak_to_peak(window);
        if ptp >= lo_ratio * template_ptp && ptp <= hi_ratio * template_ptp {
            peaks.push(lo + argmax(window));
        }
    }
    peaks.sort_unstable();
    peaks.dedup();
    peaks
}

/// Inclusive `(start, end)` index pairs of runs where `data >= threshold`.
fn threshold_regions(data: &[f64], threshold: f64) -> Vec<(usize, usize)> {
    let mut regions = Vec::new();
    let mut open: Option<usize> = None;
    for (i, &x) in data.iter().enumerate() {
        match (x >= threshold, open) {
            (true, None) => open = Some(i),
            (false, Some(start)) => {
                regions.push((start, i - 1));
                open = None;
            }
            _ => {}
        }
    }
    if let Some(start) = open {
        regions.push((start, data.len() - 1));
    }
    regions
}
