use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::session::SessionSnapshot;

/// Persist both orientations' results as JSON.
pub fn save_snapshot(path: &Path, snapshot: &SessionSnapshot) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("serializing snapshot")?;
    fs::write(path, json).with_context(|| format!("writing snapshot {}", path.display()))
}

pub fn load_snapshot(path: &Path) -> Result<SessionSnapshot> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing snapshot {}", path.display()))
}
