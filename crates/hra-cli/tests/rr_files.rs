use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use std::{error::Error, fs, path::Path};

fn write_rr(dir: &Path, name: &str, rows: &[(f64, u8)]) -> String {
    let mut text = String::from("RRinterval\tannotation\n");
    for (ms, code) in rows {
        text.push_str(&format!("{ms:.6}\t{code}\n"));
    }
    let path = dir.join(name);
    fs::write(&path, text).expect("write rr file");
    path.to_string_lossy().to_string()
}

fn assert_close(a: f64, b: f64, tol: f64) {
    let diff = (a - b).abs();
    assert!(diff <= tol, "diff {diff} exceeded tol {tol} ({a} vs {b})");
}

#[test]
fn poincare_of_symmetric_series() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let rows: Vec<(f64, u8)> = [1000.0, 2000.0, 3000.0, 2000.0, 1000.0]
        .iter()
        .map(|&ms| (ms, 0))
        .collect();
    let input = write_rr(dir.path(), "sym.txt", &rows);

    let output = cargo_bin_cmd!("hra")
        .args(["poincare", "--input", &input])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let actual: Value = serde_json::from_slice(&output)?;

    assert_eq!(actual["plot"]["xi"].as_array().map(Vec::len), Some(4));
    let short = &actual["descriptors"]["short_term"];
    assert_close(short["c1d"].as_f64().unwrap_or(f64::NAN), 0.5, 1e-9);
    assert_close(short["c1a"].as_f64().unwrap_or(f64::NAN), 0.5, 1e-9);
    Ok(())
}

#[test]
fn runs_skip_filtered_intervals() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = write_rr(
        dir.path(),
        "runs.txt",
        &[(800.0, 0), (810.0, 0), (820.0, 0), (800.0, 0), (790.0, 0)],
    );
    let output = cargo_bin_cmd!("hra")
        .args(["runs", "--input", &input])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let actual: Value = serde_json::from_slice(&output)?;
    assert_eq!(actual["decelerating"], serde_json::json!([0, 1]));
    assert_eq!(actual["accelerating"], serde_json::json!([0, 1]));
    assert_eq!(actual["neutral"], serde_json::json!([]));

    // a ventricular interval in the middle breaks the series into two segments
    let split = write_rr(
        dir.path(),
        "split.txt",
        &[(800.0, 0), (810.0, 0), (700.0, 1), (820.0, 0), (830.0, 0)],
    );
    let output = cargo_bin_cmd!("hra")
        .args(["runs", "--input", &split])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let actual: Value = serde_json::from_slice(&output)?;
    assert_eq!(actual["decelerating"], serde_json::json!([2]));
    Ok(())
}

#[test]
fn runs_without_clean_segment_fail() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = write_rr(dir.path(), "bad.txt", &[(800.0, 3), (820.0, 0)]);
    cargo_bin_cmd!("hra")
        .args(["runs", "--input", &input])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn spectrum_rejects_duplicate_cuts() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let rows: Vec<(f64, u8)> = (0..20).map(|i| (800.0 + (i % 3) as f64 * 10.0, 0)).collect();
    let input = write_rr(dir.path(), "rr.txt", &rows);
    let output = cargo_bin_cmd!("hra")
        .args(["spectrum", "--input", &input, "--cuts", "0,0.04,0.04,0.4"])
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output)?;
    assert!(stderr.contains("strictly increasing"), "stderr: {stderr}");
    Ok(())
}

#[test]
fn spectrum_reports_bands_and_fft() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let rows: Vec<(f64, u8)> = (0..32)
        .map(|i| (800.0 + 40.0 * (i as f64 * 0.7).sin(), 0))
        .collect();
    let input = write_rr(dir.path(), "rr.txt", &rows);
    let output = cargo_bin_cmd!("hra")
        .args([
            "spectrum",
            "--input",
            &input,
            "--cuts",
            "0,0.5,2,7",
            "--resample-hz",
            "4",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let actual: Value = serde_json::from_slice(&output)?;
    let bands = actual["bands"].as_array().cloned().unwrap_or_default();
    assert_eq!(bands.len(), 3);
    assert!(bands.iter().all(|b| b.as_f64().is_some_and(|p| p >= 0.0)));
    assert_eq!(
        actual["lomb_scargle"]["frequency"].as_array().map(Vec::len),
        Some(32)
    );
    assert!(actual["fft"]["magnitude"].is_array());
    Ok(())
}

#[test]
fn batch_reports_each_file() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let rows: Vec<(f64, u8)> = (0..12).map(|i| (780.0 + (i % 4) as f64 * 15.0, 0)).collect();
    write_rr(dir.path(), "a.txt", &rows);
    fs::write(dir.path().join("b.txt"), "RRinterval\tannotation\n800\tnope\n")?;
    fs::write(dir.path().join("notes.md"), "ignored")?;

    let output = cargo_bin_cmd!("hra")
        .args(["batch", "--dir", &dir.path().to_string_lossy(), "--ext", ".txt"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let lines: Vec<Value> = String::from_utf8(output)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["file"], "a.txt");
    assert!(lines[0]["poincare"]["descriptors"].is_object());
    assert_eq!(lines[0]["bands"].as_array().map(Vec::len), Some(4));
    assert_eq!(lines[1]["file"], "b.txt");
    assert!(lines[1]["error"].is_string());
    Ok(())
}
