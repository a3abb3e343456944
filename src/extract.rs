use crate::record::Record;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Logical record group names produced by the built-in transform. Domain
/// transforms may declare their own groups as long as the query specs agree.
pub const ENTITY_GROUP: &str = "entities";
pub const XREF_GROUP: &str = "crossReferences";

/// One normalized record tagged with the logical group it stages into.
#[derive(Debug, Clone, PartialEq)]
pub struct Emit {
    pub group: String,
    pub record: Record,
}

impl Emit {
    pub fn new(group: &str, record: Record) -> Self {
        Self {
            group: group.to_string(),
            record,
        }
    }
}

/// Produces a lazy, finite sequence of records from a staged artifact.
/// Consumed exactly once; re-running re-opens the artifact from the start.
/// Implementations must be pure per source record with no shared mutable
/// state, so sub-descriptors can run in parallel workers safely.
pub trait Extractor: Send + Sync {
    fn records(&self, artifact: &Path) -> Result<Box<dyn Iterator<Item = Emit> + '_>>;
}

/// Test-mode filter: a predicate over the raw source record. Records failing
/// it are skipped before batching; other sub-descriptors are unaffected.
#[derive(Clone)]
pub struct TestFilter {
    predicate: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl TestFilter {
    pub fn new(predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// Keeps only source records whose primary identifier is in `ids`.
    pub fn from_ids(ids: HashSet<String>) -> Self {
        Self::new(move |source| {
            primary_id(source).map(|id| ids.contains(id)).unwrap_or(false)
        })
    }

    pub fn accepts(&self, source: &Value) -> bool {
        (self.predicate)(source)
    }
}

/// A pure transformation from one raw source record to zero-or-more grouped
/// records.
pub type Transform = Arc<dyn Fn(&Value) -> Vec<Emit> + Send + Sync>;

/// Extractor for AGR-style JSON artifacts: a document with a `metaData`
/// object and a `data` array of source records. Each source record passes
/// through the transform; malformed records are skipped with a warning
/// rather than aborting the pass.
pub struct JsonArrayExtractor {
    transform: Transform,
    filter: Option<TestFilter>,
}

impl JsonArrayExtractor {
    pub fn new(transform: Transform) -> Self {
        Self {
            transform,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: TestFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl Extractor for JsonArrayExtractor {
    fn records(&self, artifact: &Path) -> Result<Box<dyn Iterator<Item = Emit> + '_>> {
        if !artifact.exists() {
            warn!(artifact = %artifact.display(), "Artifact missing, yielding no records");
            return Ok(Box::new(std::iter::empty()));
        }
        let raw = std::fs::read_to_string(artifact)
            .with_context(|| format!("Failed to read artifact: {}", artifact.display()))?;
        if raw.trim().is_empty() {
            warn!(artifact = %artifact.display(), "Artifact empty, yielding no records");
            return Ok(Box::new(std::iter::empty()));
        }
        let document: Value = serde_json::from_str(&raw)
            .with_context(|| format!("Artifact is not valid JSON: {}", artifact.display()))?;

        let meta = document.get("metaData").cloned().unwrap_or(Value::Null);
        let data = match document.get("data").and_then(Value::as_array) {
            Some(data) => data.clone(),
            None => {
                warn!(artifact = %artifact.display(), "Artifact has no data array, yielding no records");
                Vec::new()
            }
        };
        debug!(artifact = %artifact.display(), records = data.len(), "Artifact opened");

        let transform = Arc::clone(&self.transform);
        let filter = self.filter.clone();
        Ok(Box::new(data.into_iter().flat_map(move |mut source| {
            if let Some(filter) = &filter {
                if !filter.accepts(&source) {
                    return Vec::new();
                }
            }
            if let Value::Object(map) = &mut source {
                map.insert("metaData".to_string(), meta.clone());
            }
            (transform)(&source)
        })))
    }
}

/// Directory of extractors keyed by dataset type: a transformation is a
/// registered capability, not an override in a class hierarchy.
#[derive(Default)]
pub struct TransformRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
    fallback: Option<Arc<dyn Extractor>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose fallback is the generic flattening transform, good
    /// enough for any AGR-shaped submission file.
    pub fn with_generic_fallback(filter: Option<TestFilter>) -> Self {
        let mut extractor = JsonArrayExtractor::new(Arc::new(generic_transform));
        if let Some(filter) = filter {
            extractor = extractor.with_filter(filter);
        }
        Self {
            extractors: HashMap::new(),
            fallback: Some(Arc::new(extractor)),
        }
    }

    pub fn register(&mut self, data_type: &str, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(data_type.to_string(), extractor);
    }

    pub fn get(&self, data_type: &str) -> Option<Arc<dyn Extractor>> {
        self.extractors
            .get(data_type)
            .or(self.fallback.as_ref())
            .cloned()
    }
}

fn primary_id(source: &Value) -> Option<&str> {
    for key in ["primaryId", "objectId", "id"] {
        if let Some(id) = source.get(key).and_then(Value::as_str) {
            return Some(id);
        }
    }
    None
}

/// The built-in transform: flattens one AGR-shaped source record into an
/// entity record plus one cross-reference record per `crossReferences`
/// element. Source records without a primary identifier are malformed and
/// skipped.
pub fn generic_transform(source: &Value) -> Vec<Emit> {
    let Some(primary_key) = primary_id(source) else {
        warn!("Source record has no primary identifier, skipping");
        return Vec::new();
    };

    let mut entity = Record::new();
    entity.set("primaryKey", primary_key);
    for (column, keys) in [
        ("name", &["name", "objectName"][..]),
        ("symbol", &["symbol"][..]),
        ("taxonId", &["taxonId"][..]),
    ] {
        for key in keys {
            if let Some(value) = source.get(*key).and_then(Value::as_str) {
                entity.set(column, value);
                break;
            }
        }
    }
    if let Some(meta) = source.get("metaData") {
        for (column, key) in [
            ("dateProduced", "dateProduced"),
            ("dataProvider", "dataProvider"),
            ("release", "release"),
        ] {
            if let Some(value) = meta.get(key).and_then(Value::as_str) {
                entity.set(column, value);
            }
        }
    }

    let mut emits = vec![Emit::new(ENTITY_GROUP, entity)];

    if let Some(xrefs) = source.get("crossReferences").and_then(Value::as_array) {
        for xref in xrefs {
            let Some(global_id) = xref.get("id").and_then(Value::as_str) else {
                continue;
            };
            let (prefix, local_id) = global_id.split_once(':').unwrap_or(("", global_id));
            let page = xref
                .get("pages")
                .and_then(Value::as_array)
                .and_then(|p| p.first())
                .and_then(Value::as_str)
                .unwrap_or_default();

            let mut record = Record::new();
            record.set("dataId", primary_key);
            record.set("primaryKey", format!("{global_id}{page}"));
            record.set("globalCrossRefId", global_id);
            record.set("localId", local_id);
            record.set("prefix", prefix);
            record.set("page", page);
            emits.push(Emit::new(XREF_GROUP, record));
        }
    }

    emits
}
