use anyhow::{Context, Result};

/// Parse one number per line. Blank lines and `#` comments are skipped;
/// a trailing `,` or `;` field separator is tolerated.
pub fn parse_f64_series(text: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim().trim_end_matches(&[',', ';'][..]);
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let val: f64 = trimmed
            .parse()
            .with_context(|| format!("line {} is not a number: {}", idx + 1, trimmed))?;
        out.push(val);
    }
    if out.is_empty() {
        anyhow::bail!("no numeric samples found");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_and_separators() {
        let values = parse_f64_series("# header\n812.5,\n\n790;\n  801  \n").unwrap();
        assert_eq!(values, vec![812.5, 790.0, 801.0]);
    }

    #[test]
    fn rejects_text_and_empty_input() {
        assert!(parse_f64_series("800\nabc\n").is_err());
        assert!(parse_f64_series("# nothing\n").is_err());
    }
}
