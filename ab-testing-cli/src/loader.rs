use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use ab_testing::Test;
use ab_testing::loader::tests_from_definitions;
use ab_testing::registry::validate_test;
use ab_testing_validation::DefinitionSet;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::{AppError, Result};

/// Top level key every definition file must have
const EXPERIMENTS_KEY: &str = "experiments";

/// Definitions that passed schema, duplicate-id and semantic checks
#[derive(Debug)]
pub struct Catalog {
    pub definitions: DefinitionSet,
    pub tests: Vec<Test>,
}

impl Catalog {
    pub fn test(&self, id: &str) -> Result<&Test> {
        self.tests
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| AppError::UnknownTest(id.to_string()))
    }
}

/// Reads all YAML files under the root directory, in path order.
/// Only performs file level validation, e.g. suffix and top level structure
pub fn load_documents(root: &str) -> Result<Vec<(PathBuf, Value)>> {
    let mut documents = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let dir_entry = entry?;

        // Only process files, skip directories
        if !dir_entry.file_type().is_file() {
            continue;
        }
        let path = dir_entry.path();

        // non-yaml files (like README.md) may live anywhere in the tree
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") => {
                return Err(AppError::Validation(format!(
                    "Invalid file {}: expected .yaml, found .yml",
                    path.display()
                )));
            }
            Some("yaml") => {}
            _ => continue,
        }

        let experiments = parse_file(path)?;
        debug!(file = %path.display(), experiments = experiments.len(), "read definition file");
        documents.push((path.to_path_buf(), Value::Array(experiments)));
    }
    Ok(documents)
}

/// Parses a YAML file with a single top level `experiments` list
fn parse_file(path: &Path) -> Result<Vec<Value>> {
    let file = fs::File::open(path)?;
    let path_string = path.display().to_string();

    let data: HashMap<String, serde_yaml::Value> =
        serde_yaml::from_reader(file).map_err(|e| AppError::YamlParse {
            path: path_string.clone(),
            source: e,
        })?;

    if data.len() != 1 {
        let keys: Vec<&String> = data.keys().collect();
        return Err(AppError::Validation(format!(
            "Invalid YAML structure in {}: expected exactly one top level key '{}', found {:?}",
            path_string, EXPERIMENTS_KEY, keys
        )));
    }

    let Some(experiments) = data.get(EXPERIMENTS_KEY) else {
        let keys: Vec<&String> = data.keys().collect();
        return Err(AppError::Validation(format!(
            "Invalid YAML structure in {}: expected top level key '{}', found {:?}",
            path_string, EXPERIMENTS_KEY, keys
        )));
    };

    let Some(items) = experiments.as_sequence() else {
        return Err(AppError::Validation(format!(
            "Invalid YAML structure in {}: expected '{}' to be a list",
            path_string, EXPERIMENTS_KEY
        )));
    };

    // serde_yaml::Value -> serde_json::Value
    items
        .iter()
        .map(|item| serde_json::to_value(item).map_err(AppError::from))
        .collect()
}

/// Loads every definition under `root` and runs all checks the engine
/// would apply at registration time
pub fn load_catalog(root: &str) -> Result<Catalog> {
    let documents = load_documents(root)?;
    let definitions = DefinitionSet::from_documents(documents)?;
    let tests = tests_from_definitions(&definitions)?;
    for test in &tests {
        validate_test(test)?;
    }
    Ok(Catalog { definitions, tests })
}
