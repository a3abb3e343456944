use crate::batch::BatchBuffer;
use crate::record::Record;
use anyhow::{Context, Result};
use csv::Writer;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One bulk-write operation: a Cypher template, the commit size the store
/// should checkpoint at, and the staged file the template reads. Constructed
/// once per (dataset type, logical record group) and immutable afterwards.
///
/// `required` is caller-declared: a store failure on a required spec is fatal
/// for its sub-descriptor, an optional one is recorded and skipped past.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub group: String,
    pub cypher_template: String,
    pub commit_size: usize,
    pub file_name: String,
    pub columns: Vec<String>,
    pub required: bool,
}

impl QuerySpec {
    pub fn staged_path(&self, staging_dir: &Path) -> PathBuf {
        staging_dir.join(&self.file_name)
    }
}

/// Appends record batches to one staged CSV file in the declared column
/// order. The header row is written once at creation (truncating any file
/// from a previous run); batches append thereafter. Writers are never shared
/// across query specs.
pub struct StageWriter {
    writer: Writer<BufWriter<File>>,
    columns: Vec<String>,
    rows: u64,
}

impl StageWriter {
    pub fn create(staging_dir: &Path, spec: &QuerySpec) -> Result<Self> {
        let path = spec.staged_path(staging_dir);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create staged file: {}", path.display()))?;
        let mut writer = Writer::from_writer(BufWriter::with_capacity(128 * 1024, file));
        writer
            .write_record(&spec.columns)
            .with_context(|| format!("Failed to write header: {}", path.display()))?;
        Ok(Self {
            writer,
            columns: spec.columns.clone(),
            rows: 0,
        })
    }

    pub fn append(&mut self, batch: &[Record]) -> Result<()> {
        for record in batch {
            let row: Vec<String> = self.columns.iter().map(|c| record.cell(c)).collect();
            self.writer.write_record(&row)?;
        }
        self.rows += batch.len() as u64;
        Ok(())
    }

    pub fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.rows)
    }
}

/// Per-group staging totals reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StagedGroup {
    pub group: String,
    pub file_name: String,
    pub rows: u64,
    pub batches: u64,
}

/// Fans one extractor pass out to per-group batch/stage pipelines. Each
/// logical record group gets its own batch accounting and its own staged
/// file; routing is by the group tag the transformation attached to the
/// record.
pub struct GroupRouter {
    routes: Vec<Route>,
    dropped: u64,
}

struct Route {
    group: String,
    file_name: String,
    buffer: BatchBuffer,
    writer: StageWriter,
}

impl GroupRouter {
    pub fn new(staging_dir: &Path, specs: &[QuerySpec], batch_size: usize) -> Result<Self> {
        let mut routes = Vec::with_capacity(specs.len());
        for spec in specs {
            routes.push(Route {
                group: spec.group.clone(),
                file_name: spec.file_name.clone(),
                buffer: BatchBuffer::new(batch_size),
                writer: StageWriter::create(staging_dir, spec)?,
            });
        }
        Ok(Self { routes, dropped: 0 })
    }

    pub fn route(&mut self, group: &str, record: Record) -> Result<()> {
        let Some(route) = self.routes.iter_mut().find(|r| r.group == group) else {
            // A group the transform emits but no query spec declares is a
            // wiring mistake in the caller, not a reason to abort the pass.
            self.dropped += 1;
            warn!(group, "Record routed to undeclared group, dropping");
            return Ok(());
        };
        if let Some(batch) = route.buffer.push(record) {
            route.writer.append(&batch)?;
        }
        Ok(())
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Flushes every group's final partial batch and closes the writers.
    /// After this returns, every staged file is fully written and safe to
    /// hand to the bulk loader.
    pub fn finish(self) -> Result<Vec<StagedGroup>> {
        let mut staged = Vec::with_capacity(self.routes.len());
        for mut route in self.routes {
            if let Some(batch) = route.buffer.flush() {
                route.writer.append(&batch)?;
            }
            let rows = route.writer.finish()?;
            staged.push(StagedGroup {
                group: route.group,
                file_name: route.file_name,
                rows,
                batches: route.buffer.batches_emitted(),
            });
        }
        Ok(staged)
    }
}
