use crate::error::{HraError, HraResult};
use crate::rr::RRSeries;
use log::warn;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Normal samples of a series with their time stamps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilteredSeries {
    pub values: Vec<f64>,
    pub time: Vec<f64>,
}

impl FilteredSeries {
    /// Time track is the running sum of every interval, including the
    /// annotated ones; annotated samples are dropped afterwards.
    pub fn from_rr(series: &RRSeries) -> Self {
        let time = series.time_track();
        let (values, time): (Vec<f64>, Vec<f64>) = series
            .rr
            .iter()
            .zip(time)
            .zip(&series.annotations)
            .filter(|(_, a)| a.is_normal())
            .map(|((&v, t), _)| (v, t))
            .unzip();
        Self { values, time }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LombScargleSpectrum {
    pub frequency: Vec<f64>,
    pub periodogram: Vec<f64>,
}

impl LombScargleSpectrum {
    pub fn from_rr(series: &RRSeries) -> Self {
        Self::from_filtered(&FilteredSeries::from_rr(series))
    }

    pub fn from_filtered(filtered: &FilteredSeries) -> Self {
        let n = filtered.len();
        let Some(&t_last) = filtered.time.last() else {
            return Self::default();
        };
        let frequency = linspace(0.01, 2.0 * PI, n);
        let scale = 4.0 / n as f64 * t_last / (2.0 * PI) / 2.0;
        let periodogram = lombscargle(&filtered.time, &filtered.values, &frequency)
            .into_iter()
            .map(|p| p * scale)
            .collect();
        Self {
            frequency,
            periodogram,
        }
    }

    /// Spacing of the frequency axis, 0 for fewer than two bins.
    pub fn default_df(&self) -> f64 {
        match self.frequency.as_slice() {
            [first, second, ..] => second - first,
            _ => 0.0,
        }
    }

    /// Integrated power between consecutive `cuts`, scaled by `df`.
    ///
    /// Stops at the first band whose lower edge lies above every frequency.
    pub fn get_bands(&self, cuts: &[f64], df: Option<f64>) -> HraResult<Vec<f64>> {
        validate_cuts(cuts)?;
        let df = df.unwrap_or_else(|| self.default_df());
        let mut bands = Vec::with_capacity(cuts.len().saturating_sub(1));
        for edge in cuts.windows(2) {
            let (low, high) = (edge[0], edge[1]);
            if !self.frequency.iter().any(|&f| f >= low) {
                break;
            }
            let power: f64 = self
                .frequency
                .iter()
                .zip(&self.periodogram)
                .filter(|(&f, _)| f >= low && f < high)
                .map(|(_, &p)| p)
                .sum();
            bands.push(power * df);
        }
        Ok(bands)
    }
}

/// Band edges must be strictly increasing (hence unique).
pub fn validate_cuts(cuts: &[f64]) -> HraResult<()> {
    if cuts.windows(2).all(|w| w[0] < w[1]) {
        Ok(())
    } else {
        Err(HraError::InvalidBandCuts(cuts.to_vec()))
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Classic Lomb-Scargle periodogram at angular frequencies `freqs`
/// (no centring, no normalisation).
pub fn lombscargle(t: &[f64], y: &[f64], freqs: &[f64]) -> Vec<f64> {
    freqs
        .iter()
        .map(|&w| {
            let (mut xc, mut xs, mut cc, mut ss, mut cs) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for (&tj, &yj) in t.iter().zip(y) {
                let (s, c) = (w * tj).sin_cos();
                xc += yj * c;
                xs += yj * s;
                cc += c * c;
                ss += s * s;
                cs += c * s;
            }
            let tau = (2.0 * cs).atan2(cc - ss) / (2.0 * w);
            let (s_tau, c_tau) = (w * tau).sin_cos();
            let c2 = c_tau * c_tau;
            let s2 = s_tau * s_tau;
            let cs_tau = 2.0 * c_tau * s_tau;
            let cos_term = quotient(
                (c_tau * xc + s_tau * xs).powi(2),
                c2 * cc + cs_tau * cs + s2 * ss,
            );
            let sin_term = quotient(
                (c_tau * xs - s_tau * xc).powi(2),
                c2 * ss - cs_tau * cs + s2 * cc,
            );
            0.5 * (cos_term + sin_term)
        })
        .collect()
}

fn quotient(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Spectrum of the series resampled on a uniform grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FftSpectrum {
    pub resampling_rate: f64,
    pub magnitude: Vec<f64>,
    pub phase: Vec<f64>,
    pub frequency: Vec<f64>,
}

impl FftSpectrum {
    pub fn from_rr(series: &RRSeries, resampling_rate: f64) -> Self {
        Self::from_filtered(&FilteredSeries::from_rr(series), resampling_rate)
    }

    pub fn from_filtered(filtered: &FilteredSeries, resampling_rate: f64) -> Self {
        let empty = Self {
            resampling_rate,
            ..Self::default()
        };
        if filtered.len() < 2 || resampling_rate <= 0.0 {
            return empty;
        }
        let (values, grid) = resample(&filtered.values, &filtered.time, resampling_rate);
        let Some(&grid_last) = grid.last() else {
            return empty;
        };
        if grid.len() < 2 || grid_last == 0.0 {
            return empty;
        }

        let mut planner = RealFftPlanner::<f64>::new();
        let r2c = planner.plan_fft_forward(values.len());
        let mut input = values;
        let mut half = r2c.make_output_vec();
        if let Err(err) = r2c.process(&mut input, &mut half) {
            warn!("fft spectrum failed: {err}");
            return empty;
        }

        // Bins above n/2 are conjugates of the lower half.
        let n = grid.len();
        let full = (0..n).map(|k| {
            if k < half.len() {
                half[k]
            } else {
                half[n - k].conj()
            }
        });
        let (magnitude, phase): (Vec<f64>, Vec<f64>) = full.map(|x| (x.norm(), x.arg())).unzip();
        let frequency = (0..n)
            .map(|k| (k * (k + 1) / 2) as f64 / grid_last)
            .collect();

        Self {
            resampling_rate,
            magnitude,
            phase,
            frequency,
        }
    }
}

/// Linear interpolation onto `t_min, t_min + 1/rate, ...` strictly below `t_max`.
fn resample(values: &[f64], time: &[f64], rate: f64) -> (Vec<f64>, Vec<f64>) {
    if time.len() < 2 || values.len() != time.len() {
        return (Vec::new(), Vec::new());
    }
    let (t_min, t_max) = (time[0], time[time.len() - 1]);
    let step = 1.0 / rate;
    let count = ((t_max - t_min) / step).ceil().max(0.0) as usize;
    let grid: Vec<f64> = (0..count)
        .map(|k| t_min + k as f64 * step)
        .take_while(|&t| t < t_max)
        .collect();

    let mut j = 0;
    let resampled = grid
        .iter()
        .map(|&t| {
            while j + 2 < time.len() && time[j + 1] <= t {
                j += 1;
            }
            let (t0, t1) = (time[j], time[j + 1]);
            let (v0, v1) = (values[j], values[j + 1]);
            if t1 == t0 {
                v0
            } else {
                v0 + (v1 - v0) * (t - t0) / (t1 - t0)
            }
        })
        .collect();
    (resampled, grid)
}
