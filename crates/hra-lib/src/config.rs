use crate::detectors::{ArtifactConfig, QrsConfig};
use crate::rr::RrFilter;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Parameters of interactive beat edits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig {
    /// A new beat closer than this many samples to an existing one is ignored.
    pub ignore_radius: usize,
    /// Half width (seconds) of the window searched for the clicked R wave.
    pub detection_window_s: f64,
}

impl Default for EditConfig {
    fn default() -> Self {
        Self {
            ignore_radius: 15,
            detection_window_s: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// Band edges on the periodogram frequency axis.
    pub cuts: Vec<f64>,
    /// Resampling frequency of the FFT spectrum (Hz).
    pub resampling_rate: f64,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            cuts: vec![0.0, 0.003, 0.04, 0.15, 0.4],
            resampling_rate: 4.0,
        }
    }
}

/// Everything a session needs, loadable from a TOML file where every
/// section and key is optional.
///
/// ```toml
/// [filter]
/// annotation_filter = [1, 2, 3]
/// square_filter = [0.3, 2.0]
///
/// [spectral]
/// cuts = [0.0, 0.04, 0.15, 0.4]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub detector: QrsConfig,
    pub artifact: ArtifactConfig,
    pub filter: RrFilter,
    pub edit: EditConfig,
    pub spectral: SpectralConfig,
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing analysis config")
    }
}

pub fn read_config(path: &Path) -> Result<AnalysisConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: AnalysisConfig = toml::from_str(&contents)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok(config)
}
