//! Project naming and identifier derivation.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::core::types::ProjectId;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9 _-]").expect("valid regex"));

/// Filesystem-safe project name: keeps ASCII alphanumerics, space, `-` and
/// `_`, maps spaces to `_` and lowercases. Falls back to `project_<hash8>`.
pub fn sanitize_name(name: &str) -> String {
    let kept = UNSAFE_CHARS.replace_all(name, "");
    let safe = kept.trim().replace(' ', "_").to_lowercase();
    if safe.is_empty() {
        return format!("project_{}", &digest_hex(name.as_bytes())[..8]);
    }
    safe
}

/// Short display name derived from the first words of an objective.
pub fn name_from_objective(objective: &str) -> String {
    let head: Vec<&str> = objective.split_whitespace().take(5).collect();
    sanitize_name(&head.join(" "))
}

/// Stable id for a project created at `now`.
pub fn project_id(objective: &str, now: DateTime<Utc>) -> ProjectId {
    let mut hasher = Sha256::new();
    hasher.update(objective.as_bytes());
    hasher.update(now.to_rfc3339().as_bytes());
    let hex = hex::encode(hasher.finalize());
    ProjectId::new(format!("proj-{}", &hex[..12]))
}

fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_name("My Calc: v2!"), "my_calc_v2");
        assert_eq!(sanitize_name("  snake-case_ok "), "snake-case_ok");
    }

    #[test]
    fn sanitize_falls_back_to_hash() {
        let name = sanitize_name("!!!");
        assert!(name.starts_with("project_"));
        assert_eq!(name.len(), "project_".len() + 8);
        assert_eq!(name, sanitize_name("!!!"));
    }

    #[test]
    fn objective_name_uses_first_words() {
        assert_eq!(
            name_from_objective("Create a basic calculator that can add"),
            "create_a_basic_calculator_that"
        );
    }

    #[test]
    fn project_id_is_deterministic_per_timestamp() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("time");
        let first = project_id("calc", now);
        assert_eq!(first, project_id("calc", now));
        assert!(first.as_str().starts_with("proj-"));
        assert_eq!(first.as_str().len(), 17);
        assert_ne!(first, project_id("other", now));
    }
}
