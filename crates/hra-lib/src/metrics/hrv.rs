use crate::rr::RRSeries;
use serde::{Deserialize, Serialize};

/// Time-domain summary over normal-to-normal intervals (seconds).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HRVTime {
    pub n: usize,
    pub avnn: f64,
    pub sdnn: f64,
    pub rmssd: f64,
    pub pnn50: f64,
}

/// Successive differences are only taken where both intervals are normal,
/// so an excluded interval never contributes a jump.
pub fn hrv_time(rr: &RRSeries) -> HRVTime {
    let nn = rr.normal_values();
    let n = nn.len();
    let avnn = if n > 0 {
        nn.iter().sum::<f64>() / n as f64
    } else {
        0.0
    };
    let sdnn = if n > 1 {
        (nn.iter().map(|x| (x - avnn).powi(2)).sum::<f64>() / (n as f64 - 1.0)).sqrt()
    } else {
        0.0
    };

    let diffs: Vec<f64> = rr
        .rr
        .windows(2)
        .zip(rr.annotations.windows(2))
        .filter(|(_, a)| a[0].is_normal() && a[1].is_normal())
        .map(|(w, _)| w[1] - w[0])
        .collect();
    let (rmssd, pnn50) = if diffs.is_empty() {
        (0.0, 0.0)
    } else {
        let count = diffs.len() as f64;
        let rmssd = (diffs.iter().map(|d| d * d).sum::<f64>() / count).sqrt();
        let over = diffs.iter().filter(|d| d.abs() > 0.050).count();
        (rmssd, over as f64 / count)
    };

    HRVTime {
        n,
        avnn,
        sdnn,
        rmssd,
        pnn50,
    }
}
