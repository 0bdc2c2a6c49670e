// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Task Schemas
//!
//! Tasks are validated against a JSON Schema before they reach a processor.
//! Each worker may ship its own schema; workers without one fall back to the
//! default schema. Schemas are compiled once at startup and kept in memory.
//!
//! On disk, schemas follow this layout:
//!
//! ```text
//! schemas/
//! ├── task.schema.json              # default
//! └── audit-echo/
//!     └── task.schema.json          # schema of the `audit-echo` worker
//! ```

use crate::errors::WorkerError;
use jsonschema::Validator;
use serde_json::{json, Value};
use std::{collections::HashMap, fs, path::Path, sync::Arc};
use tracing::{debug, error, info};

/// File name of a task schema inside a schema directory.
pub const TASK_SCHEMA_FILE: &str = "task.schema.json";

/// Compiled task schemas keyed by worker name.
#[derive(Clone)]
pub struct SchemaRegistry {
    default: Arc<Validator>,
    workers: HashMap<String, Arc<Validator>>,
}

impl SchemaRegistry {
    /// Creates a registry whose default schema accepts any JSON object.
    pub fn builtin() -> Result<Self, WorkerError> {
        SchemaRegistry::new(&json!({ "type": "object" }))
    }

    /// Creates a registry with `default_schema` as the fallback schema.
    pub fn new(default_schema: &Value) -> Result<Self, WorkerError> {
        Ok(SchemaRegistry {
            default: Arc::new(compile("default", default_schema)?),
            workers: HashMap::default(),
        })
    }

    /// Reads `<dir>/task.schema.json` as the default schema and every
    /// `<dir>/<worker>/task.schema.json` as the schema of `<worker>`.
    /// Without a default file the built-in one (any JSON object) is kept.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, WorkerError> {
        let dir = dir.as_ref();
        let mut registry = SchemaRegistry::builtin()?;

        let default_path = dir.join(TASK_SCHEMA_FILE);
        if default_path.is_file() {
            registry.default = Arc::new(compile("default", &read_schema(&default_path)?)?);
        }

        let entries = fs::read_dir(dir).map_err(|err| {
            error!(error = err.to_string(), path = %dir.display(), "failure to read schemas");
            WorkerError::SchemaCompileError(dir.display().to_string())
        })?;

        for entry in entries.flatten() {
            let path = entry.path().join(TASK_SCHEMA_FILE);
            if !path.is_file() {
                continue;
            }

            let worker = entry.file_name().to_string_lossy().into_owned();
            let schema = read_schema(&path)?;
            registry = registry.with_schema(&worker, &schema)?;
        }

        info!(
            path = %dir.display(),
            workers = registry.workers.len(),
            "task schemas loaded"
        );
        Ok(registry)
    }

    /// Registers the schema of one worker.
    pub fn with_schema(mut self, worker_name: &str, schema: &Value) -> Result<Self, WorkerError> {
        debug!(worker = worker_name, "compiling task schema");
        self.workers
            .insert(worker_name.to_owned(), Arc::new(compile(worker_name, schema)?));
        Ok(self)
    }

    pub fn has_worker_schema(&self, worker_name: &str) -> bool {
        self.workers.contains_key(worker_name)
    }

    /// Returns the worker's schema, or the default one.
    pub fn validator(&self, worker_name: &str) -> Arc<Validator> {
        self.workers
            .get(worker_name)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    /// Validates `task` against the schema of `worker_name`, or the default
    /// schema when the worker has none.
    ///
    /// # Parameters
    /// * `worker_name` - Worker the task is meant for
    /// * `task` - Parsed task
    ///
    /// # Returns
    /// Ok(()) for a valid task, otherwise a `SchemaValidationError` listing
    /// every violation as `path: reason`
    pub fn validate(&self, worker_name: &str, task: &Value) -> Result<(), WorkerError> {
        let validator = self.validator(worker_name);

        let violations: Vec<String> = validator
            .iter_errors(task)
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{}: {}", path, err)
                }
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(WorkerError::SchemaValidationError(violations.join("; ")))
        }
    }
}

fn compile(name: &str, schema: &Value) -> Result<Validator, WorkerError> {
    jsonschema::validator_for(schema).map_err(|err| {
        error!(error = err.to_string(), schema = name, "failure to compile schema");
        WorkerError::SchemaCompileError(format!("{}: {}", name, err))
    })
}

fn read_schema(path: &Path) -> Result<Value, WorkerError> {
    let raw = fs::read_to_string(path).map_err(|err| {
        error!(error = err.to_string(), path = %path.display(), "failure to read schema");
        WorkerError::SchemaCompileError(path.display().to_string())
    })?;

    serde_json::from_str(&raw).map_err(|err| {
        error!(error = err.to_string(), path = %path.display(), "failure to parse schema");
        WorkerError::SchemaCompileError(format!("{}: {}", path.display(), err))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_schema() -> Value {
        json!({
            "type": "object",
            "required": ["url"],
            "properties": { "url": { "type": "string" } }
        })
    }

    #[test]
    fn builtin_default_accepts_any_object() {
        let registry = SchemaRegistry::builtin().unwrap();

        assert!(registry.validate("audit-anything", &json!({})).is_ok());
        assert!(matches!(
            registry.validate("audit-anything", &json!("test")),
            Err(WorkerError::SchemaValidationError(_))
        ));
    }

    #[test]
    fn worker_schema_takes_precedence_over_the_default() {
        let registry = SchemaRegistry::builtin()
            .unwrap()
            .with_schema("audit-performance-gpsi", &url_schema())
            .unwrap();

        assert!(registry.has_worker_schema("audit-performance-gpsi"));
        assert!(registry
            .validate("audit-performance-gpsi", &json!({"url": "https://example.org"}))
            .is_ok());
        assert!(registry.validate("audit-performance-gpsi", &json!({})).is_err());
        assert!(registry.validate("audit-other", &json!({})).is_ok());
    }

    #[test]
    fn reports_every_violation() {
        let schema = json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "runs": { "type": "integer" }
            }
        });
        let registry = SchemaRegistry::new(&schema).unwrap();

        let Err(WorkerError::SchemaValidationError(reason)) =
            registry.validate("audit-x", &json!({"url": 1, "runs": "two"}))
        else {
            panic!("expected a validation error");
        };

        assert!(reason.contains("/url"));
        assert!(reason.contains("/runs"));
    }

    #[test]
    fn invalid_schemas_do_not_compile() {
        let result = SchemaRegistry::new(&json!({"type": 12}));
        assert!(matches!(result, Err(WorkerError::SchemaCompileError(_))));
    }

    #[test]
    fn loads_a_schema_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(TASK_SCHEMA_FILE),
            r#"{"type": "object", "required": ["id"]}"#,
        )
        .unwrap();
        fs::create_dir(dir.path().join("audit-echo")).unwrap();
        fs::write(
            dir.path().join("audit-echo").join(TASK_SCHEMA_FILE),
            url_schema().to_string(),
        )
        .unwrap();
        fs::create_dir(dir.path().join("no-schema")).unwrap();

        let registry = SchemaRegistry::load_dir(dir.path()).unwrap();

        assert!(registry.has_worker_schema("audit-echo"));
        assert!(!registry.has_worker_schema("no-schema"));
        assert!(registry.validate("audit-echo", &json!({"url": "u"})).is_ok());
        assert!(registry.validate("no-schema", &json!({"url": "u"})).is_err());
        assert!(registry.validate("no-schema", &json!({"id": 1})).is_ok());
    }

    #[test]
    fn loads_the_bundled_schemas() {
        let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/schemas");
        let registry = SchemaRegistry::load_dir(dir).unwrap();

        assert!(registry.has_worker_schema("audit-echo"));
        assert!(registry.validate("audit-echo", &json!({})).is_err());
    }
}
