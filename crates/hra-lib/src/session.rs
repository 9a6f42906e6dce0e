use crate::annotation::BeatAnnotation;
use crate::config::AnalysisConfig;
use crate::detectors::{detect_beats, BeatClassifier};
use crate::error::{HraError, HraResult};
use crate::metrics::hrv::{hrv_time, HRVTime};
use crate::metrics::poincare::{poincare, Poincare};
use crate::metrics::runs::{runs, Runs};
use crate::metrics::spectral::{validate_cuts, LombScargleSpectrum};
use crate::rr::RRSeries;
use crate::signal::{Beats, Trace};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Polarity of the trace the beats were detected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Normal,
    Inverted,
}

impl Orientation {
    fn slot(self) -> usize {
        match self {
            Orientation::Normal => 0,
            Orientation::Inverted => 1,
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Orientation::Normal => Orientation::Inverted,
            Orientation::Inverted => Orientation::Normal,
        }
    }
}

/// Whether an edit changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditOutcome {
    Changed,
    Unchanged,
}

/// Beats, annotations and RR data of one orientation, as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationResults {
    pub r_waves_all_pos: Vec<f64>,
    pub r_waves_all_vals: Vec<f64>,
    pub annotations: Vec<BeatAnnotation>,
    pub ventriculars_pos: Vec<f64>,
    pub ventriculars_vals: Vec<f64>,
    pub supraventriculars_pos: Vec<f64>,
    pub supraventriculars_vals: Vec<f64>,
    pub artifacts_pos: Vec<f64>,
    pub artifacts_vals: Vec<f64>,
    pub rr_intervals: Vec<f64>,
    pub rr_annotations: Vec<BeatAnnotation>,
}

impl OrientationResults {
    pub fn new(beats: &Beats, annotations: &[BeatAnnotation], rr: &RRSeries) -> Self {
        let pick = |code: BeatAnnotation| -> (Vec<f64>, Vec<f64>) {
            beats
                .positions
                .iter()
                .zip(&beats.values)
                .zip(annotations)
                .filter(|(_, &a)| a == code)
                .map(|((&p, &v), _)| (p, v))
                .unzip()
        };
        let (ventriculars_pos, ventriculars_vals) = pick(BeatAnnotation::Ventricular);
        let (supraventriculars_pos, supraventriculars_vals) = pick(BeatAnnotation::Supraventricular);
        let (artifacts_pos, artifacts_vals) = pick(BeatAnnotation::Artifact);
        Self {
            r_waves_all_pos: beats.positions.clone(),
            r_waves_all_vals: beats.values.clone(),
            annotations: annotations.to_vec(),
            ventriculars_pos,
            ventriculars_vals,
            supraventriculars_pos,
            supraventriculars_vals,
            artifacts_pos,
            artifacts_vals,
            rr_intervals: rr.rr.clone(),
            rr_annotations: rr.annotations.clone(),
        }
    }

    fn beats(&self) -> HraResult<(Beats, Vec<BeatAnnotation>)> {
        let n = self.r_waves_all_pos.len();
        if self.r_waves_all_vals.len() != n {
            return Err(HraError::LengthMismatch {
                time: n,
                voltage: self.r_waves_all_vals.len(),
            });
        }
        if self.annotations.len() != n {
            return Err(HraError::AnnotationMismatch {
                signal: n,
                annotations: self.annotations.len(),
            });
        }
        let beats = Beats {
            positions: self.r_waves_all_pos.clone(),
            values: self.r_waves_all_vals.clone(),
        };
        Ok((beats, self.annotations.clone()))
    }
}

/// Persisted results of both orientations; `None` when never computed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub normal: Option<OrientationResults>,
    pub inverted: Option<OrientationResults>,
    /// Orientation that was active when the snapshot was taken.
    #[serde(default)]
    pub active: Orientation,
}

#[derive(Debug, Clone, Default)]
struct Derived {
    rr: RRSeries,
    filtered: RRSeries,
    poincare: Poincare,
    runs: Option<Runs>,
    summary: HRVTime,
}

#[derive(Debug, Clone, Default)]
struct Spectral {
    spectrum: LombScargleSpectrum,
    bands: Vec<f64>,
}

impl Spectral {
    fn compute(filtered: &RRSeries, cuts: &[f64]) -> Self {
        let spectrum = LombScargleSpectrum::from_rr(filtered);
        let bands = spectrum.get_bands(cuts, None).unwrap_or_else(|err| {
            warn!("band powers unavailable: {err}");
            Vec::new()
        });
        debug!("spectrum recomputed over {} bins", spectrum.frequency.len());
        Self { spectrum, bands }
    }
}

/// One recording under analysis: the trace, its beats and annotations, and
/// every quantity derived from them.
///
/// Every mutation rebuilds RR, Poincaré, runs and the summary before
/// returning. The periodogram and band powers are marked stale instead and
/// rebuilt on the next read.
#[derive(Debug)]
pub struct Session {
    trace: Trace,
    config: AnalysisConfig,
    classifier: BeatClassifier,
    orientation: Orientation,
    beats: Beats,
    annotations: Vec<BeatAnnotation>,
    cache: [Option<OrientationResults>; 2],
    derived: Derived,
    spectral: Option<Spectral>,
    changes: u64,
}

impl Session {
    /// Detect and classify beats on `trace`.
    pub fn new(trace: Trace, config: AnalysisConfig) -> HraResult<Self> {
        let classifier = BeatClassifier::new(config.artifact.clone());
        Self::with_classifier(trace, config, classifier)
    }

    pub fn with_classifier(
        trace: Trace,
        config: AnalysisConfig,
        classifier: BeatClassifier,
    ) -> HraResult<Self> {
        validate_cuts(&config.spectral.cuts)?;
        let mut session = Self {
            trace,
            config,
            classifier,
            orientation: Orientation::Normal,
            beats: Beats::default(),
            annotations: Vec::new(),
            cache: [None, None],
            derived: Derived::default(),
            spectral: None,
            changes: 0,
        };
        session.detect();
        info!(
            "session: {} samples, {} beats detected",
            session.trace.len(),
            session.beats.len()
        );
        Ok(session)
    }

    /// Restore a session from a snapshot without re-running detection.
    ///
    /// `trace` is the recording in its normal orientation.
    pub fn from_snapshot(
        mut trace: Trace,
        config: AnalysisConfig,
        snapshot: SessionSnapshot,
    ) -> HraResult<Self> {
        validate_cuts(&config.spectral.cuts)?;
        let SessionSnapshot {
            normal,
            inverted,
            active,
        } = snapshot;
        let prefer_inverted = active == Orientation::Inverted || normal.is_none();
        let (orientation, current, other) = match (normal, inverted) {
            (normal, Some(inverted)) if prefer_inverted => {
                (Orientation::Inverted, inverted, normal)
            }
            (Some(normal), inverted) => (Orientation::Normal, normal, inverted),
            (None, _) => return Self::new(trace, config),
        };
        if orientation == Orientation::Inverted {
            trace.invert();
        }
        let (beats, annotations) = current.beats()?;
        let mut cache = [None, None];
        cache[orientation.flipped().slot()] = other;

        let classifier = BeatClassifier::new(config.artifact.clone());
        let mut session = Self {
            trace,
            config,
            classifier,
            orientation,
            beats,
            annotations,
            cache,
            derived: Derived::default(),
            spectral: None,
            changes: 0,
        };
        session.recompute();
        info!(
            "session restored: {:?} orientation, {} beats",
            session.orientation,
            session.beats.len()
        );
        Ok(session)
    }

    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn beats(&self) -> &Beats {
        &self.beats
    }

    pub fn annotations(&self) -> &[BeatAnnotation] {
        &self.annotations
    }

    /// Unfiltered RR series with propagated annotations.
    pub fn rr(&self) -> &RRSeries {
        &self.derived.rr
    }

    /// RR series after the configured filter.
    pub fn filtered_rr(&self) -> &RRSeries {
        &self.derived.filtered
    }

    pub fn poincare(&self) -> &Poincare {
        &self.derived.poincare
    }

    /// `None` when no run could be computed from the filtered series.
    pub fn runs(&self) -> Option<&Runs> {
        self.derived.runs.as_ref()
    }

    /// Lomb-Scargle periodogram of the filtered series, rebuilt if an edit
    /// made it stale.
    pub fn spectrum(&mut self) -> &LombScargleSpectrum {
        &self.ensure_spectral().spectrum
    }

    /// Band powers for the configured cuts.
    pub fn bands(&mut self) -> &[f64] {
        &self.ensure_spectral().bands
    }

    fn ensure_spectral(&mut self) -> &Spectral {
        let filtered = &self.derived.filtered;
        let cuts = &self.config.spectral.cuts;
        self.spectral
            .get_or_insert_with(|| Spectral::compute(filtered, cuts))
    }

    pub fn summary(&self) -> &HRVTime {
        &self.derived.summary
    }

    /// Number of edits that changed the session.
    pub fn change_count(&self) -> u64 {
        self.changes
    }

    /// Re-run detection and classification on the current orientation,
    /// discarding manual edits.
    pub fn redetect(&mut self) {
        self.detect();
        self.changes += 1;
    }

    pub fn set_filter(&mut self, filter: crate::rr::RrFilter) {
        if self.config.filter != filter {
            self.config.filter = filter;
            self.recompute();
        }
    }

    /// Overwrite the annotation of one beat.
    pub fn classify(&mut self, index: usize, annotation: BeatAnnotation) -> HraResult<EditOutcome> {
        let len = self.annotations.len();
        let slot = self
            .annotations
            .get_mut(index)
            .ok_or(HraError::BeatIndexOutOfRange { index, len })?;
        if *slot == annotation {
            return Ok(EditOutcome::Unchanged);
        }
        debug!("classify beat {index}: {slot} -> {annotation}");
        *slot = annotation;
        self.commit();
        Ok(EditOutcome::Changed)
    }

    /// Insert a Normal beat at the R wave nearest a click, using the
    /// configured ignore radius.
    pub fn insert_beat(&mut self, click_time: f64) -> HraResult<EditOutcome> {
        self.insert_beat_with_radius(click_time, self.config.edit.ignore_radius)
    }

    pub fn insert_beat_with_radius(
        &mut self,
        click_time: f64,
        ignore_radius: usize,
    ) -> HraResult<EditOutcome> {
        let clicked = self
            .trace
            .sample_at_or_after(click_time)
            .ok_or(HraError::ClickOutsideTrace { time: click_time })?;
        let peak = self.local_maximum(clicked);
        let peak_time = self.trace.time()[peak];
        let pos = self.beats.positions.partition_point(|&p| p < peak_time);

        let neighbours = [pos.checked_sub(1), Some(pos)];
        let too_close = neighbours
            .into_iter()
            .flatten()
            .filter_map(|i| self.beats.positions.get(i))
            .any(|&p| {
                let distance = self.trace.sample_index(p).abs_diff(peak);
                distance == 0 || distance < ignore_radius
            });
        if too_close {
            debug!("insert at {click_time}s ignored: beat within {ignore_radius} samples");
            return Ok(EditOutcome::Unchanged);
        }

        self.beats.positions.insert(pos, peak_time);
        self.beats.values.insert(pos, self.trace.voltage()[peak]);
        self.annotations.insert(pos, BeatAnnotation::Normal);
        debug!("inserted beat {pos} at {peak_time}s");
        self.commit();
        Ok(EditOutcome::Changed)
    }

    /// Remove the first beat at or after `click_time`.
    pub fn remove_beat(&mut self, click_time: f64) -> EditOutcome {
        let pos = self.beats.positions.partition_point(|&p| p < click_time);
        if pos >= self.beats.len() {
            return EditOutcome::Unchanged;
        }
        let removed = self.beats.positions.remove(pos);
        self.beats.values.remove(pos);
        self.annotations.remove(pos);
        debug!("removed beat {pos} at {removed}s");
        self.commit();
        EditOutcome::Changed
    }

    /// Flip the trace polarity. Results of the target orientation are
    /// restored if they were computed before, otherwise detected afresh.
    pub fn invert(&mut self) {
        let current = self.results();
        self.cache[self.orientation.slot()] = Some(current);
        self.trace.invert();
        self.orientation = self.orientation.flipped();

        let restored = self.cache[self.orientation.slot()]
            .as_ref()
            .map(OrientationResults::beats);
        match restored {
            Some(Ok((beats, annotations))) => {
                self.beats = beats;
                self.annotations = annotations;
                self.recompute();
            }
            Some(Err(err)) => {
                warn!("cached {:?} results unusable ({err}); detecting", self.orientation);
                self.detect();
            }
            None => self.detect(),
        }
        info!("inverted trace, now {:?}", self.orientation);
        self.changes += 1;
    }

    /// Results of the current orientation.
    pub fn results(&self) -> OrientationResults {
        OrientationResults::new(&self.beats, &self.annotations, &self.derived.rr)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut slots = self.cache.clone();
        slots[self.orientation.slot()] = Some(self.results());
        let [normal, inverted] = slots;
        SessionSnapshot {
            normal,
            inverted,
            active: self.orientation,
        }
    }

    fn detect(&mut self) {
        self.beats = detect_beats(&self.trace, &self.config.detector);
        self.annotations = self.classifier.classify(&self.trace, &self.beats);
        self.recompute();
    }

    fn commit(&mut self) {
        self.recompute();
        self.changes += 1;
    }

    fn local_maximum(&self, centre: usize) -> usize {
        let dt = self.trace.sampling_period();
        let half = if dt > 0.0 {
            (self.config.edit.detection_window_s / dt).round() as usize
        } else {
            0
        };
        let voltage = self.trace.voltage();
        let start = centre.saturating_sub(half);
        let end = (centre + half).min(voltage.len()).max(start + 1);
        let mut best = start;
        for i in start..end {
            if voltage[i] > voltage[best] {
                best = i;
            }
        }
        best
    }

    fn recompute(&mut self) {
        let rr = RRSeries::from_beats(&self.beats, &self.annotations);
        let filtered = self.config.filter.apply(&rr);
        let poincare = poincare(&filtered);
        let runs = match runs(&filtered) {
            Ok(runs) => Some(runs),
            Err(err) => {
                warn!("runs unavailable: {err}");
                None
            }
        };
        let summary = hrv_time(&filtered);
        self.derived = Derived {
            rr,
            filtered,
            poincare,
            runs,
            summary,
        };
        self.spectral = None;
    }
}

/// Independently owned sessions, keyed by a caller-chosen id.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the session stored under `key`; other keys are untouched.
    pub fn insert(&mut self, key: impl Into<String>, session: Session) -> Option<Session> {
        self.sessions.insert(key.into(), session)
    }

    pub fn get(&self, key: &str) -> Option<&Session> {
        self.sessions.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Session> {
        self.sessions.get_mut(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Session> {
        self.sessions.remove(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::qrs::tests::synthetic_ecg;

    const RR: [f64; 11] = [0.82, 0.78, 0.8, 0.79, 0.81, 0.77, 0.84, 0.88, 0.8, 0.83, 0.79];

    fn ecg(rr: &[f64]) -> Trace {
        synthetic_ecg(250.0, rr).0
    }

    fn session() -> Session {
        Session::new(ecg(&RR), AnalysisConfig::default()).unwrap()
    }

    #[test]
    fn detects_and_derives() {
        let mut s = session();
        assert_eq!(s.beats().len(), 12);
        assert!(s.annotations().iter().all(|a| a.is_normal()));
        assert_eq!(s.rr().len(), 11);
        assert_eq!(s.poincare().plot.len(), 10);
        assert!(s.runs().is_some());
        assert_eq!(s.bands().len(), 4);
        assert_eq!(s.summary().n, 11);
        assert_eq!(s.change_count(), 0);
    }

    #[test]
    fn classify_is_idempotent() {
        let mut s = session();
        assert_eq!(
            s.classify(4, BeatAnnotation::Ventricular).unwrap(),
            EditOutcome::Changed
        );
        let rr_after_first = s.rr().clone();
        let plot_after_first = s.poincare().clone();
        assert_eq!(
            s.classify(4, BeatAnnotation::Ventricular).unwrap(),
            EditOutcome::Unchanged
        );
        assert_eq!(s.change_count(), 1);
        assert_eq!(s.rr(), &rr_after_first);
        assert_eq!(s.poincare(), &plot_after_first);
        assert_eq!(s.rr().annotations[3], BeatAnnotation::Ventricular);
        assert_eq!(s.rr().annotations[4], BeatAnnotation::Ventricular);
        assert_eq!(s.filtered_rr().annotations[4], BeatAnnotation::Excluded);
    }

    #[test]
    fn classify_out_of_range_leaves_state() {
        let mut s = session();
        let err = s.classify(99, BeatAnnotation::Artifact).unwrap_err();
        assert_eq!(err, HraError::BeatIndexOutOfRange { index: 99, len: 12 });
        assert_eq!(err.kind(), crate::error::ErrorKind::Edit);
        assert_eq!(s.change_count(), 0);
    }

    #[test]
    fn insert_near_existing_beat_is_ignored() {
        let mut s = session();
        let first = s.beats().positions[0];
        assert_eq!(s.insert_beat(first - 0.01).unwrap(), EditOutcome::Unchanged);
        assert_eq!(s.beats().len(), 12);
        assert_eq!(s.change_count(), 0);
    }

    #[test]
    fn insert_between_beats_adds_normal_beat() {
        let mut s = session();
        let click = (s.beats().positions[2] + s.beats().positions[3]) / 2.0;
        assert_eq!(s.insert_beat(click).unwrap(), EditOutcome::Changed);
        assert_eq!(s.beats().len(), 13);
        assert_eq!(s.annotations()[3], BeatAnnotation::Normal);
        assert!(s.beats().positions.windows(2).all(|w| w[1] > w[0]));
        assert_eq!(s.rr().len(), 12);
        assert_eq!(s.change_count(), 1);
    }

    #[test]
    fn insert_on_existing_beat_is_ignored_even_with_zero_radius() {
        let mut s = session();
        let fifth = s.beats().positions[5];
        assert_eq!(
            s.insert_beat_with_radius(fifth, 0).unwrap(),
            EditOutcome::Unchanged
        );
        assert_eq!(s.beats().len(), 12);
        assert!(s.beats().positions.windows(2).all(|w| w[1] > w[0]));
        assert!(s.rr().rr.iter().all(|&rr| rr > 0.0));
    }

    #[test]
    fn spectrum_follows_edits() {
        let mut s = session();
        let before = s.spectrum().clone();
        assert_eq!(before.frequency.len(), 11);

        s.classify(5, BeatAnnotation::Artifact).unwrap();
        let after = s.spectrum().clone();
        assert_eq!(after.frequency.len(), 10);
        assert_ne!(after, before);
        assert_eq!(s.bands().len(), 4);

        // reading twice serves the cached result
        assert_eq!(s.spectrum(), &after);
    }

    #[test]
    fn insert_past_the_end_is_an_error() {
        let mut s = session();
        let end = s.trace().time().last().copied().unwrap();
        assert_eq!(
            s.insert_beat(end + 1.0),
            Err(HraError::ClickOutsideTrace { time: end + 1.0 })
        );
    }

    #[test]
    fn remove_first_beat_after_click() {
        let mut s = session();
        let third = s.beats().positions[2];
        assert_eq!(s.remove_beat(third - 0.1), EditOutcome::Changed);
        assert_eq!(s.beats().len(), 11);
        assert!(!s.beats().positions.contains(&third));
        assert_eq!(s.remove_beat(1.0e6), EditOutcome::Unchanged);
        assert_eq!(s.change_count(), 1);
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut s = session();
        s.classify(5, BeatAnnotation::Supraventricular).unwrap();
        let snapshot = s.snapshot();
        assert!(snapshot.inverted.is_none());
        let normal = snapshot.normal.as_ref().unwrap();
        assert_eq!(normal.supraventriculars_pos, vec![s.beats().positions[5]]);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"inverted\":null"));
        assert!(json.contains("\"active\":\"normal\""));
        let back: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);

        let restored = Session::from_snapshot(s.trace().clone(), AnalysisConfig::default(), back)
            .unwrap();
        assert_eq!(restored.rr(), s.rr());
        assert_eq!(restored.annotations(), s.annotations());
    }

    #[test]
    fn invert_restores_cached_orientation() {
        let mut s = session();
        s.classify(2, BeatAnnotation::Artifact).unwrap();
        let before = s.results();
        s.invert();
        assert_eq!(s.orientation(), Orientation::Inverted);
        s.invert();
        assert_eq!(s.orientation(), Orientation::Normal);
        assert_eq!(s.results(), before);
        let snapshot = s.snapshot();
        assert!(snapshot.normal.is_some());
        assert!(snapshot.inverted.is_some());
    }

    #[test]
    fn snapshot_reloads_in_active_orientation() {
        let mut s = session();
        s.invert();
        let snapshot = s.snapshot();
        assert_eq!(snapshot.active, Orientation::Inverted);

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: SessionSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Session::from_snapshot(ecg(&RR), AnalysisConfig::default(), back).unwrap();
        assert_eq!(restored.orientation(), Orientation::Inverted);
        assert_eq!(restored.beats(), s.beats());
        assert_eq!(restored.snapshot().normal, snapshot.normal);
    }

    #[test]
    fn snapshot_without_active_orientation_defaults_to_normal() {
        let back: SessionSnapshot =
            serde_json::from_str(r#"{"normal": null, "inverted": null}"#).unwrap();
        assert_eq!(back.active, Orientation::Normal);
    }

    #[test]
    fn invalid_cuts_are_rejected() {
        let mut config = AnalysisConfig::default();
        config.spectral.cuts = vec![0.5, 0.5];
        assert!(matches!(
            Session::new(ecg(&RR[..4]), config),
            Err(HraError::InvalidBandCuts(_))
        ));
    }

    #[test]
    fn store_keeps_sessions_apart() {
        let mut store = SessionStore::new();
        store.insert("a", session());
        store.insert("b", session());
        store
            .get_mut("a")
            .unwrap()
            .classify(1, BeatAnnotation::Artifact)
            .unwrap();
        assert_eq!(store.get("a").unwrap().change_count(), 1);
        assert_eq!(store.get("b").unwrap().change_count(), 0);
        assert_eq!(store.len(), 2);
    }
}
