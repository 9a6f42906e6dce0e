use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::{error::Error, f64::consts::PI, fs, path::Path};

const FS: f64 = 250.0;
const RR: [f64; 11] = [0.82, 0.78, 0.8, 0.79, 0.81, 0.77, 0.84, 0.88, 0.8, 0.83, 0.79];

/// Gaussian R waves on a slow baseline, written as a two-column CSV.
fn write_ecg(dir: &Path) -> (String, Vec<f64>) {
    let mut beats = vec![0.5];
    for rr in RR {
        let last = beats[beats.len() - 1];
        beats.push(last + rr);
    }
    let samples = ((beats[beats.len() - 1] + 1.0) * FS) as usize;
    let mut text = String::from("time,ecg\n");
    for i in 0..samples {
        let t = i as f64 / FS;
        let qrs: f64 = beats
            .iter()
            .map(|&bt| 1.2 * (-0.5 * ((t - bt) / 0.02).powi(2)).exp())
            .sum();
        let v = 0.05 * (2.0 * PI * t).sin() + qrs;
        text.push_str(&format!("{t},{v}\n"));
    }
    let path = dir.join("ecg.csv");
    fs::write(&path, text).expect("write ecg");
    (path.to_string_lossy().to_string(), beats)
}

fn run_json(args: &[&str]) -> Result<Value, Box<dyn Error>> {
    let output = cargo_bin_cmd!("hra")
        .args(args)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    Ok(serde_json::from_slice(&output)?)
}

#[test]
fn detect_beats_finds_every_r_wave() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let (input, truth) = write_ecg(dir.path());
    let actual = run_json(&["detect-beats", "--input", &input])?;
    let positions: Vec<f64> = serde_json::from_value(actual["positions"].clone())?;
    assert_eq!(positions.len(), truth.len());
    for (found, expected) in positions.iter().zip(&truth) {
        assert!((found - expected).abs() <= 2.0 / FS, "{found} vs {expected}");
    }
    assert_eq!(actual["orientation"], "normal");
    assert!(actual["annotations"]
        .as_array()
        .is_some_and(|a| a.iter().all(|c| c == 0)));
    Ok(())
}

#[test]
fn analyze_writes_snapshot_and_export_matches() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let (input, _) = write_ecg(dir.path());
    let snapshot = dir.path().join("session.json");
    let snapshot = snapshot.to_string_lossy().to_string();

    let report = run_json(&["analyze", "--input", &input, "--snapshot-out", &snapshot])?;
    assert_eq!(report["beats"], 12);
    assert_eq!(report["rr"]["rr"].as_array().map(Vec::len), Some(11));
    assert_eq!(report["bands"].as_array().map(Vec::len), Some(4));

    let stored: Value = serde_json::from_str(&fs::read_to_string(&snapshot)?)?;
    assert!(stored["inverted"].is_null());
    assert_eq!(stored["normal"]["rr_intervals"], report["rr"]["rr"]);

    let out = dir.path().join("rr.txt");
    cargo_bin_cmd!("hra")
        .args([
            "export-rr",
            "--input",
            &input,
            "--snapshot",
            &snapshot,
            "--out",
            &out.to_string_lossy(),
        ])
        .assert()
        .success();
    let text = fs::read_to_string(&out)?;
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("RRinterval\tannotation"));
    assert_eq!(lines.count(), 11);
    Ok(())
}

#[test]
fn edits_persist_through_snapshot() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let (input, truth) = write_ecg(dir.path());
    let snapshot = dir.path().join("edit.json");
    let snapshot = snapshot.to_string_lossy().to_string();

    let edit = |extra: &[&str]| -> Result<Value, Box<dyn Error>> {
        let mut args = vec!["edit", "--input", input.as_str(), "--snapshot", snapshot.as_str()];
        args.extend_from_slice(extra);
        run_json(&args)
    };

    let first = edit(&["classify", "--index", "3", "--code", "1"])?;
    assert_eq!(first["outcome"], "changed");
    let again = edit(&["classify", "--index", "3", "--code", "1"])?;
    assert_eq!(again["outcome"], "unchanged");

    let near = format!("{}", truth[5] + 0.01);
    let ignored = edit(&["insert", "--time", &near])?;
    assert_eq!(ignored["outcome"], "unchanged");

    let removed = edit(&["remove", "--time", &format!("{}", truth[7] - 0.1)])?;
    assert_eq!(removed["outcome"], "changed");
    assert_eq!(removed["beats"], 11);

    let stored: Value = serde_json::from_str(&fs::read_to_string(&snapshot)?)?;
    assert_eq!(stored["normal"]["annotations"][3], 1);
    assert_eq!(
        stored["normal"]["ventriculars_pos"].as_array().map(Vec::len),
        Some(1)
    );
    Ok(())
}

#[test]
fn classify_out_of_range_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let (input, _) = write_ecg(dir.path());
    let snapshot = dir.path().join("edit.json");
    cargo_bin_cmd!("hra")
        .args([
            "edit",
            "--input",
            &input,
            "--snapshot",
            &snapshot.to_string_lossy(),
            "classify",
            "--index",
            "400",
            "--code",
            "2",
        ])
        .assert()
        .failure();
    assert!(!snapshot.exists());
    Ok(())
}

#[test]
fn bad_trace_is_reported() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bad.csv");
    fs::write(&path, "time,ecg\n0.0,1.0\n0.0,2.0\n")?;
    cargo_bin_cmd!("hra")
        .args(["detect-beats", "--input", &path.to_string_lossy()])
        .assert()
        .failure();
    Ok(())
}
