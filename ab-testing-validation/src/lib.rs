//! Schema validation library for experiment definitions
//!
//! Definition files are JSON documents holding either a single experiment object
//! or an array of them. Every experiment is checked against an embedded schema
//! before the engine deserializes it, and experiment ids must be unique across
//! all files of a set.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

/// Embedded schema every experiment definition must satisfy
const EXPERIMENT_SCHEMA_JSON: &str = include_str!("experiment-schema.json");
const EXPERIMENT_SCHEMA_NAME: &str = "experiment-schema.json";
const DEFINITION_EXTENSION: &str = "json";

/// Environment variable overriding the definitions directory
pub const DIR_ENV_VAR: &str = "AB_TESTING_DIR";
const SYSTEM_DIR: &str = "/etc/ab-testing";
const LOCAL_DIR: &str = "ab-testing";

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Errors that can occur while loading and validating definitions
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Schema error in {file}: {message}")]
    SchemaError { file: PathBuf, message: String },

    #[error("Duplicate experiment id '{id}' found in {first_file} and {second_file}")]
    DuplicateId {
        id: String,
        first_file: PathBuf,
        second_file: PathBuf,
    },

    #[error("Invalid definition document in {file}: expected an object or an array of objects")]
    InvalidDocument { file: PathBuf },

    #[error("Failed to read file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JSONParse(#[from] serde_json::Error),
}

/// One schema-valid experiment definition and the file it came from
#[derive(Debug, Clone)]
pub struct Definition {
    pub id: String,
    pub source: PathBuf,
    pub value: Value,
}

/// Compiled validator for experiment definitions
pub struct DefinitionValidator {
    validator: jsonschema::Validator,
}

impl DefinitionValidator {
    /// Compile the embedded experiment schema
    ///
    /// # Errors
    /// Returns error if the embedded schema fails to compile
    pub fn new() -> ValidationResult<Self> {
        let schema: Value = serde_json::from_str(EXPERIMENT_SCHEMA_JSON)?;
        let validator =
            jsonschema::validator_for(&schema).map_err(|e| ValidationError::SchemaError {
                file: PathBuf::from(EXPERIMENT_SCHEMA_NAME),
                message: format!("Failed to compile validator: {}", e),
            })?;
        Ok(Self { validator })
    }

    /// Validate a single experiment object
    ///
    /// # Arguments
    /// * `definition` - JSON object describing one experiment
    /// * `path` - File the definition was read from, used in error messages
    ///
    /// # Errors
    /// Returns error listing every schema violation
    pub fn validate(&self, definition: &Value, path: &Path) -> ValidationResult<()> {
        let output = self.validator.evaluate(definition);

        if output.flag().valid {
            Ok(())
        } else {
            let errors: Vec<String> = output
                .iter_errors()
                .map(|e| format!("Error: {}", e.error))
                .collect();

            Err(ValidationError::SchemaError {
                file: path.to_path_buf(),
                message: format!("Definition validation failed:\n{}", errors.join("\n")),
            })
        }
    }

    /// Split a document into its experiments and validate each of them
    ///
    /// # Errors
    /// Returns error if the document is neither an object nor an array of
    /// objects, or if any experiment fails validation
    pub fn validate_document(
        &self,
        document: Value,
        path: &Path,
    ) -> ValidationResult<Vec<Definition>> {
        let items = match document {
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            _ => {
                return Err(ValidationError::InvalidDocument {
                    file: path.to_path_buf(),
                });
            }
        };

        let mut definitions = Vec::with_capacity(items.len());
        for item in items {
            if !item.is_object() {
                return Err(ValidationError::InvalidDocument {
                    file: path.to_path_buf(),
                });
            }
            self.validate(&item, path)?;
            // the schema requires a string id
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            definitions.push(Definition {
                id,
                source: path.to_path_buf(),
                value: item,
            });
        }
        Ok(definitions)
    }
}

/// A validated collection of experiment definitions with unique ids
#[derive(Debug, Default)]
pub struct DefinitionSet {
    definitions: Vec<Definition>,
}

impl DefinitionSet {
    /// Load every `*.json` file in a directory
    ///
    /// Files are read in lexicographic order so the resulting set is
    /// deterministic. Other files and subdirectories are ignored.
    ///
    /// # Errors
    /// Returns error if the directory can't be read, a file isn't valid JSON,
    /// a definition fails validation, or two definitions share an id
    pub fn from_directory(dir: &Path) -> ValidationResult<Self> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(DEFINITION_EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut documents = Vec::with_capacity(paths.len());
        for path in paths {
            let file = fs::File::open(&path)?;
            let document: Value = serde_json::from_reader(file)?;
            documents.push((path, document));
        }
        Self::from_documents(documents)
    }

    /// Load a single definition file (one object or an array of objects)
    ///
    /// # Errors
    /// Same as [`DefinitionSet::from_directory`]
    pub fn from_file(path: &Path) -> ValidationResult<Self> {
        let file = fs::File::open(path)?;
        let document: Value = serde_json::from_reader(file)?;
        Self::from_documents(vec![(path.to_path_buf(), document)])
    }

    /// Validate already-parsed documents, keyed by the file they came from
    ///
    /// # Errors
    /// Returns error if any definition fails validation or ids collide
    pub fn from_documents(
        documents: impl IntoIterator<Item = (PathBuf, Value)>,
    ) -> ValidationResult<Self> {
        let validator = DefinitionValidator::new()?;
        let mut definitions = Vec::new();
        for (path, document) in documents {
            definitions.extend(validator.validate_document(document, &path)?);
        }
        ensure_unique_ids(&definitions)?;
        Ok(Self { definitions })
    }

    pub fn get(&self, id: &str) -> Option<&Definition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn into_definitions(self) -> Vec<Definition> {
        self.definitions
    }
}

/// Checks definitions for duplicate experiment ids
fn ensure_unique_ids(definitions: &[Definition]) -> ValidationResult<()> {
    let mut id_to_file = HashMap::<&str, &Path>::new();
    for Definition { id, source, .. } in definitions {
        if let Some(first_file) = id_to_file.get(id.as_str()) {
            return Err(ValidationError::DuplicateId {
                id: id.clone(),
                first_file: first_file.to_path_buf(),
                second_file: source.clone(),
            });
        }
        id_to_file.insert(id, source);
    }
    Ok(())
}

/// Resolve the definitions directory: `AB_TESTING_DIR` if set, then
/// `/etc/ab-testing` if it exists, otherwise `ab-testing/`.
pub fn resolve_definitions_dir() -> PathBuf {
    resolve_dir_from(std::env::var(DIR_ENV_VAR).ok(), Path::new(SYSTEM_DIR))
}

fn resolve_dir_from(env_value: Option<String>, system_dir: &Path) -> PathBuf {
    if let Some(dir) = env_value.filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if system_dir.is_dir() {
        return system_dir.to_path_buf();
    }
    PathBuf::from(LOCAL_DIR)
}
