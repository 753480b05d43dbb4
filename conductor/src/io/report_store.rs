//! Run report persistence under `.conductor/reports/`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};

/// Atomically write the JSON report and its rendered text form.
#[instrument(skip_all, fields(json = %json_path.display()))]
pub fn write_report<T: Serialize>(
    json_path: &Path,
    text_path: &Path,
    report: &T,
    rendered: &str,
) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(report).context("serialize run report")?;
    buf.push('\n');
    write_atomic(json_path, &buf)?;
    write_atomic(text_path, rendered)?;
    debug!("run report written");
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("report path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_both_forms_and_creates_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let json_path = temp.path().join("reports/p.json");
        let text_path = temp.path().join("reports/p.md");
        write_report(&json_path, &text_path, &json!({ "score": 6.0 }), "# Report\n")
            .expect("write");
        let json = fs::read_to_string(&json_path).expect("json");
        assert_eq!(json, "{\n  \"score\": 6.0\n}\n");
        assert_eq!(fs::read_to_string(&text_path).expect("text"), "# Report\n");
        assert!(!temp.path().join("reports/p.tmp").exists());
    }
}
