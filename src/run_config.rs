use crate::config::{DEFAULT_BATCH_SIZE, DEFAULT_COMMIT_SIZE};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use tracing::error;

/// Reserved run-metadata keys. These are never dataset types.
pub const SCHEMA_VERSION_KEY: &str = "schemaVersion";
pub const RELEASE_VERSION_KEY: &str = "releaseVersion";

/// One violated rule found while validating the run configuration against
/// the fixed engine schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub rule: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.rule)
    }
}

/// One requested dataset type with its allow-listed sub-types and optional
/// per-type pipeline scalars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRequest {
    pub data_type: String,
    pub sub_types: Vec<String>,
    pub batch_size: usize,
    pub commit_size: usize,
}

/// The validated run configuration: which dataset types and sub-types this
/// run should ingest, plus the release metadata the store is stamped with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub schema_version: String,
    pub release_version: String,
    pub requests: Vec<DatasetRequest>,
}

impl RunConfig {
    /// Loads and validates a configuration file. Configuration errors are
    /// never partially tolerated: every violated field is logged with its
    /// rule before the error is returned.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let doc: Value = serde_json::from_str(&raw)
            .with_context(|| format!("Config file is not valid JSON: {}", path.display()))?;
        Self::from_document(&doc)
    }

    pub fn from_document(doc: &Value) -> Result<Self> {
        let violations = validate(doc);
        if !violations.is_empty() {
            for violation in &violations {
                error!("Config validation: {violation}");
            }
            bail!("Config file validation unsuccessful: {} violation(s)", violations.len());
        }

        // Validation passed, so the shapes below are known good.
        let root = doc.as_object().cloned().unwrap_or_default();
        let mut requests = Vec::new();
        for (key, value) in &root {
            if key == SCHEMA_VERSION_KEY || key == RELEASE_VERSION_KEY {
                continue;
            }
            let Some(spec) = value.as_object() else { continue };
            let sub_types = spec
                .get("subTypes")
                .and_then(Value::as_array)
                .map(|subs| {
                    subs.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            requests.push(DatasetRequest {
                data_type: key.clone(),
                sub_types,
                batch_size: scalar_or(spec.get("batchSize"), DEFAULT_BATCH_SIZE),
                commit_size: scalar_or(spec.get("commitSize"), DEFAULT_COMMIT_SIZE),
            });
        }

        let version = |key: &str| {
            root.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Ok(Self {
            schema_version: version(SCHEMA_VERSION_KEY),
            release_version: version(RELEASE_VERSION_KEY),
            requests,
        })
    }

    pub fn request(&self, data_type: &str) -> Option<&DatasetRequest> {
        self.requests.iter().find(|r| r.data_type == data_type)
    }
}

fn scalar_or(value: Option<&Value>, default: usize) -> usize {
    value.and_then(Value::as_u64).map(|v| v as usize).unwrap_or(default)
}

/// Validates a configuration document against the fixed engine schema and
/// returns every violation found, not just the first.
pub fn validate(doc: &Value) -> Vec<Violation> {
    let mut violations = Vec::new();

    let Some(root) = doc.as_object() else {
        violations.push(Violation {
            field: "<root>".to_string(),
            rule: "must be an object".to_string(),
        });
        return violations;
    };

    for key in [SCHEMA_VERSION_KEY, RELEASE_VERSION_KEY] {
        match root.get(key) {
            None => violations.push(Violation {
                field: key.to_string(),
                rule: "required field".to_string(),
            }),
            Some(Value::String(_)) => {}
            Some(_) => violations.push(Violation {
                field: key.to_string(),
                rule: "must be a string".to_string(),
            }),
        }
    }

    for (key, value) in root {
        if key == SCHEMA_VERSION_KEY || key == RELEASE_VERSION_KEY {
            continue;
        }
        let Some(spec) = value.as_object() else {
            violations.push(Violation {
                field: key.clone(),
                rule: "dataset type entry must be an object".to_string(),
            });
            continue;
        };

        match spec.get("subTypes") {
            None => violations.push(Violation {
                field: format!("{key}.subTypes"),
                rule: "required field".to_string(),
            }),
            Some(Value::Array(subs)) => {
                if subs.is_empty() {
                    violations.push(Violation {
                        field: format!("{key}.subTypes"),
                        rule: "must not be empty".to_string(),
                    });
                }
                for (i, sub) in subs.iter().enumerate() {
                    if !sub.is_string() {
                        violations.push(Violation {
                            field: format!("{key}.subTypes[{i}]"),
                            rule: "must be a string".to_string(),
                        });
                    }
                }
            }
            Some(_) => violations.push(Violation {
                field: format!("{key}.subTypes"),
                rule: "must be an array of strings".to_string(),
            }),
        }

        for scalar in ["batchSize", "commitSize"] {
            if let Some(v) = spec.get(scalar) {
                if !v.is_u64() {
                    violations.push(Violation {
                        field: format!("{key}.{scalar}"),
                        rule: "must be an unsigned integer".to_string(),
                    });
                }
            }
        }

        for field in spec.keys() {
            if !matches!(field.as_str(), "subTypes" | "batchSize" | "commitSize") {
                violations.push(Violation {
                    field: format!("{key}.{field}"),
                    rule: "unknown field".to_string(),
                });
            }
        }
    }

    violations
}
