//! Poincaré plot and heart rate asymmetry descriptors.
//!
//! Pairs touching an excluded interval are removed following Piskorski &
//! Guzik, "Filtering Poincaré plots" (CMST 11(1), 2005). Variances use the
//! population denominator; the asymmetry descriptors are normalised by the
//! total number of pairs.

use crate::annotation::BeatAnnotation;
use crate::rr::RRSeries;
use serde::{Deserialize, Serialize};
use std::f64::consts::SQRT_2;

/// `(RR[i], RR[i+1])` pairs with their positions in the unfiltered series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoincarePlot {
    pub xi: Vec<f64>,
    pub xii: Vec<f64>,
    pub xi_indices: Vec<usize>,
    pub xii_indices: Vec<usize>,
}

impl PoincarePlot {
    pub fn len(&self) -> usize {
        self.xi.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xi.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShortTermAsymmetry {
    pub sd1d: f64,
    pub sd1a: f64,
    pub sd1i: f64,
    pub c1d: f64,
    pub c1a: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LongTermAsymmetry {
    pub sd2d: f64,
    pub sd2a: f64,
    pub sd2i: f64,
    pub c2d: f64,
    pub c2a: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TotalAsymmetry {
    pub sdnnd: f64,
    pub sdnna: f64,
    pub cd: f64,
    pub ca: f64,
}

/// Descriptors of one plot; a `None` group could not be computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PoincareDescriptors {
    pub sd1: Option<f64>,
    pub sd2: Option<f64>,
    pub sdnn: Option<f64>,
    pub short_term: Option<ShortTermAsymmetry>,
    pub long_term: Option<LongTermAsymmetry>,
    pub total: Option<TotalAsymmetry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Poincare {
    pub plot: PoincarePlot,
    pub descriptors: PoincareDescriptors,
}

/// Build the plot from an already filtered series and compute its descriptors.
pub fn poincare(series: &RRSeries) -> Poincare {
    let plot = prepare_plot(series);
    let descriptors = descriptors(&plot);
    Poincare { plot, descriptors }
}

/// Range of `annotations` left after trimming non-normal entries at both ends.
pub fn shave_ends(annotations: &[BeatAnnotation]) -> std::ops::Range<usize> {
    let start = annotations
        .iter()
        .position(|a| a.is_normal())
        .unwrap_or(annotations.len());
    let end = annotations
        .iter()
        .rposition(|a| a.is_normal())
        .map_or(start, |i| i + 1);
    start..end.max(start)
}

pub fn prepare_plot(series: &RRSeries) -> PoincarePlot {
    let range = shave_ends(&series.annotations);
    let offset = range.start;
    let values = &series.rr[range.clone()];
    let annotations = &series.annotations[range];
    if values.len() < 2 {
        return PoincarePlot::default();
    }

    let pairs = values.len() - 1;
    let mut dropped = vec![false; pairs];
    for (k, ann) in annotations.iter().enumerate() {
        if *ann == BeatAnnotation::Excluded {
            if k < pairs {
                dropped[k] = true;
            }
            if k > 0 {
                dropped[k - 1] = true;
            }
        }
    }

    let mut plot = PoincarePlot::default();
    for k in (0..pairs).filter(|&k| !dropped[k]) {
        plot.xi.push(values[k]);
        plot.xii.push(values[k + 1]);
        plot.xi_indices.push(offset + k);
        plot.xii_indices.push(offset + k + 1);
    }
    plot
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

fn population_variance(data: &[f64]) -> f64 {
    let m = mean(data);
    data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / data.len() as f64
}

/// `a / b`, or `None` if `b` is zero or the result is not finite.
fn ratio(a: f64, b: f64) -> Option<f64> {
    if b == 0.0 {
        return None;
    }
    let r = a / b;
    r.is_finite().then_some(r)
}

pub fn descriptors(plot: &PoincarePlot) -> PoincareDescriptors {
    if plot.is_empty() {
        return PoincareDescriptors::default();
    }
    let diff: Vec<f64> = plot.xii.iter().zip(&plot.xi).map(|(b, a)| b - a).collect();
    let sum: Vec<f64> = plot.xii.iter().zip(&plot.xi).map(|(b, a)| b + a).collect();
    let sd1 = (population_variance(&diff) / 2.0).sqrt();
    let sd2 = (population_variance(&sum) / 2.0).sqrt();
    let sdnn = ((sd1 * sd1 + sd2 * sd2) / 2.0).sqrt();

    let short_term = short_term_asymmetry(plot);
    let long_term = long_term_asymmetry(plot);
    let total = match (short_term, long_term) {
        (Some(st), Some(lt)) => total_asymmetry(&st, &lt, sdnn),
        _ => None,
    };

    PoincareDescriptors {
        sd1: Some(sd1),
        sd2: Some(sd2),
        sdnn: Some(sdnn),
        short_term,
        long_term,
        total,
    }
}

pub fn short_term_asymmetry(plot: &PoincarePlot) -> Option<ShortTermAsymmetry> {
    let n = plot.len() as f64;
    let (mut dec, mut acc) = (0.0, 0.0);
    let (mut n_dec, mut n_acc) = (0usize, 0usize);
    for (a, b) in plot.xi.iter().zip(&plot.xii) {
        let d = (b - a) / SQRT_2;
        if d > 0.0 {
            dec += d * d;
            n_dec += 1;
        } else if d < 0.0 {
            acc += d * d;
            n_acc += 1;
        }
    }
    if n_dec == 0 || n_acc == 0 {
        return None;
    }
    let sd1d = (dec / n).sqrt();
    let sd1a = (acc / n).sqrt();
    let sd1i_sq = sd1d * sd1d + sd1a * sd1a;
    Some(ShortTermAsymmetry {
        sd1d,
        sd1a,
        sd1i: sd1i_sq.sqrt(),
        c1d: ratio(sd1d * sd1d, sd1i_sq)?,
        c1a: ratio(sd1a * sd1a, sd1i_sq)?,
    })
}

pub fn long_term_asymmetry(plot: &PoincarePlot) -> Option<LongTermAsymmetry> {
    let n = plot.len() as f64;
    let centre = mean(&plot.xi) + mean(&plot.xii);
    let (mut dec, mut acc, mut flat) = (0.0, 0.0, 0.0);
    let (mut n_dec, mut n_acc) = (0usize, 0usize);
    for (a, b) in plot.xi.iter().zip(&plot.xii) {
        let s = (a + b - centre) / SQRT_2;
        if b > a {
            dec += s * s;
            n_dec += 1;
        } else if b < a {
            acc += s * s;
            n_acc += 1;
        } else {
            flat += s * s;
        }
    }
    if n_dec == 0 || n_acc == 0 {
        return None;
    }
    let sd2d = ((dec + 0.5 * flat) / n).sqrt();
    let sd2a = ((acc + 0.5 * flat) / n).sqrt();
    let sd2i_sq = sd2d * sd2d + sd2a * sd2a;
    Some(LongTermAsymmetry {
        sd2d,
        sd2a,
        sd2i: sd2i_sq.sqrt(),
        c2d: ratio(sd2d * sd2d, sd2i_sq)?,
        c2a: ratio(sd2a * sd2a, sd2i_sq)?,
    })
}

fn total_asymmetry(
    st: &ShortTermAsymmetry,
    lt: &LongTermAsymmetry,
    sdnn: f64,
) -> Option<TotalAsymmetry> {
    let sdnnd = ((st.sd1d.powi(2) + lt.sd2d.powi(2)) / 2.0).sqrt();
    let sdnna = ((st.sd1a.powi(2) + lt.sd2a.powi(2)) / 2.0).sqrt();
    let sdnn_sq = sdnn * sdnn;
    Some(TotalAsymmetry {
        sdnnd,
        sdnna,
        cd: ratio(sdnnd * sdnnd, sdnn_sq)?,
        ca: ratio(sdnna * sdnna, sdnn_sq)?,
    })
}
