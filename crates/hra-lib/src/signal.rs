use crate::error::{HraError, HraResult};
use serde::{Deserialize, Serialize};

/// Time-stamped single-lead ECG trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Sample times in seconds, strictly increasing
    time: Vec<f64>,
    /// Voltage in device units
    voltage: Vec<f64>,
}

impl Trace {
    pub fn new(time: Vec<f64>, voltage: Vec<f64>) -> HraResult<Self> {
        if time.len() != voltage.len() {
            return Err(HraError::LengthMismatch {
                time: time.len(),
                voltage: voltage.len(),
            });
        }
        if let Some(pos) = time.windows(2).position(|w| w[1] <= w[0]) {
            return Err(HraError::TimeNotIncreasing { index: pos + 1 });
        }
        Ok(Self { time, voltage })
    }

    /// Build a trace from uniformly sampled data starting at t = 0.
    pub fn from_uniform(fs: f64, voltage: Vec<f64>) -> HraResult<Self> {
        let dt = 1.0 / fs;
        let time = (0..voltage.len()).map(|i| i as f64 * dt).collect();
        Self::new(time, voltage)
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// First difference of the time track; 0 for traces shorter than 2.
    pub fn sampling_period(&self) -> f64 {
        if self.time.len() < 2 {
            0.0
        } else {
            self.time[1] - self.time[0]
        }
    }

    pub fn sampling_rate(&self) -> f64 {
        let dt = self.sampling_period();
        if dt > 0.0 {
            1.0 / dt
        } else {
            0.0
        }
    }

    pub fn duration(&self) -> f64 {
        match (self.time.first(), self.time.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Index of the first sample at or after `t`, if any.
    pub fn sample_at_or_after(&self, t: f64) -> Option<usize> {
        let idx = self.time.partition_point(|&x| x < t);
        (idx < self.time.len()).then_some(idx)
    }

    /// Index of the sample a beat at time `t` sits on (clamped to the trace).
    pub fn sample_index(&self, t: f64) -> usize {
        self.time
            .partition_point(|&x| x < t)
            .min(self.time.len().saturating_sub(1))
    }

    /// Reflect the voltage around its mean (polarity flip).
    pub fn invert(&mut self) {
        if self.voltage.is_empty() {
            return;
        }
        let mean = self.voltage.iter().sum::<f64>() / self.voltage.len() as f64;
        for v in &mut self.voltage {
            *v = 2.0 * mean - *v;
        }
    }
}

/// Detected R waves: times (seconds) and voltages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Beats {
    pub positions: Vec<f64>,
    pub values: Vec<f64>,
}

impl Beats {
    pub fn from_indices(trace: &Trace, indices: &[usize]) -> Self {
        Self {
            positions: indices.iter().map(|&i| trace.time()[i]).collect(),
            values: indices.iter().map(|&i| trace.voltage()[i]).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
