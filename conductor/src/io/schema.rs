//! JSON Schema validation for documents crossing a process boundary.

use anyhow::{Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;

pub const EXECUTION_OUTCOME_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/execution_outcome/v1.schema.json"
));

pub const PLAN_DRAFT_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/plan_draft/v1.schema.json"
));

/// Validate `instance` against the schema source `schema`.
///
/// `label` names the document in the error message.
pub fn validate_against(schema: &str, instance: &Value, label: &str) -> Result<()> {
    let schema_value: Value =
        serde_json::from_str(schema).map_err(|err| anyhow!("parse {label} schema: {err}"))?;
    let compiled =
        validator_for(&schema_value).map_err(|err| anyhow!("invalid {label} schema: {err}"))?;
    if !compiled.is_valid(instance) {
        let messages = compiled
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "{label} schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}
