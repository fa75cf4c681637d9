//! Loading test definitions from JSON files.

use std::path::Path;

use ab_testing_validation::{DefinitionSet, resolve_definitions_dir};
use serde::Deserialize;
use tracing::debug;

use crate::ConfigurationError;
use crate::config::debug_config;
use crate::model::Test;

/// Load every definition file in `dir`.
///
/// # Errors
/// Fails on the first unreadable, schema-invalid or duplicate definition.
pub fn load_tests(dir: &Path) -> Result<Vec<Test>, ConfigurationError> {
    tests_from_definitions(&DefinitionSet::from_directory(dir)?)
}

/// Load definitions from the directory named by `AB_TESTING_DIR`, then
/// `/etc/ab-testing`, then `ab-testing/`.
pub fn load_default_tests() -> Result<Vec<Test>, ConfigurationError> {
    load_tests(&resolve_definitions_dir())
}

/// Load one definition file holding a test or an array of tests.
pub fn load_tests_from_file(path: &Path) -> Result<Vec<Test>, ConfigurationError> {
    tests_from_definitions(&DefinitionSet::from_file(path)?)
}

/// Deserialize already validated definitions.
pub fn tests_from_definitions(set: &DefinitionSet) -> Result<Vec<Test>, ConfigurationError> {
    let log_parse = debug_config().log_parse;
    set.iter()
        .map(|definition| {
            let test = Test::deserialize(&definition.value).map_err(|source| {
                ConfigurationError::Parse {
                    test_id: definition.id.clone(),
                    source,
                }
            })?;
            if log_parse {
                debug!(
                    test_id = %test.id,
                    file = %definition.source.display(),
                    variants = test.variants.len(),
                    rules = test.targeting_rules.len(),
                    "parsed test definition"
                );
            }
            Ok(test)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestStatus;
    use crate::targeting::{Operator, RuleType};
    use ab_testing_validation::ValidationError;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, value: serde_json::Value) {
        std::fs::write(dir.path().join(name), value.to_string()).unwrap();
    }

    fn promo() -> serde_json::Value {
        json!({
            "id": "promo-banner",
            "name": "Promo banner",
            "status": "running",
            "trafficAllocation": 100,
            "variants": [
                {"id": "A", "name": "Control", "weight": 50, "isControl": true},
                {"id": "B", "name": "Bold", "weight": 50, "config": {"color": "red"}}
            ],
            "targetingRules": [
                {"type": "query-param", "operator": "equals", "key": "utm_source", "value": ["mail", "ads"]}
            ],
            "startDate": "2026-01-01T00:00:00Z"
        })
    }

    #[test]
    fn test_load_directory() {
        let dir = TempDir::new().unwrap();
        write(&dir, "promo.json", promo());
        write(
            &dir,
            "more.json",
            json!([{
                "id": "beta-feature",
                "name": "Beta",
                "status": "paused",
                "trafficAllocation": 10,
                "variants": [{"id": "on", "name": "On", "weight": 100}]
            }]),
        );
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let tests = load_tests(dir.path()).unwrap();
        let ids: Vec<&str> = tests.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["beta-feature", "promo-banner"]);

        let promo = &tests[1];
        assert!(promo.variants[0].is_control);
        assert_eq!(promo.variants[1].config, Some(json!({"color": "red"})));
        assert_eq!(promo.targeting_rules[0].kind, RuleType::QueryParam);
        assert_eq!(promo.targeting_rules[0].operator, Operator::Equals);
        assert!(promo.start_date.is_some());
        assert_eq!(tests[0].status, TestStatus::Paused);
    }

    #[test]
    fn test_schema_violation_surfaces() {
        let dir = TempDir::new().unwrap();
        let mut bad = promo();
        bad["trafficAllocation"] = json!(150);
        write(&dir, "bad.json", bad);
        assert!(matches!(
            load_tests(dir.path()),
            Err(ConfigurationError::Definition(ValidationError::SchemaError { .. }))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "a.json", promo());
        write(&dir, "b.json", promo());
        assert!(matches!(
            load_tests(dir.path()),
            Err(ConfigurationError::Definition(ValidationError::DuplicateId { .. }))
        ));
    }

    #[test]
    fn test_single_file() {
        let dir = TempDir::new().unwrap();
        write(&dir, "promo.json", promo());
        let tests = load_tests_from_file(&dir.path().join("promo.json")).unwrap();
        assert_eq!(tests.len(), 1);
    }
}
