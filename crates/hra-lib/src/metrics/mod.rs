pub mod hrv;
pub mod poincare;
pub mod runs;
pub mod spectral;

pub use hrv::{hrv_time, HRVTime};
pub use poincare::{poincare, Poincare, PoincareDescriptors, PoincarePlot};
pub use runs::{runs, RunDirection, Runs};
pub use spectral::{FftSpectrum, FilteredSeries, LombScargleSpectrum};
