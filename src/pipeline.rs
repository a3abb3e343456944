use crate::extract::Extractor;
use crate::fetch;
use crate::load::{self, LoadFailure};
use crate::stage::{GroupRouter, QuerySpec, StagedGroup};
use crate::stats::PassStats;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Everything one worker needs to process a single sub-descriptor,
/// self-contained so it can cross a process boundary as CLI arguments.
#[derive(Debug, Clone)]
pub struct SubTask {
    pub data_type: String,
    pub provider: String,
    pub location: String,
    pub extracted_name: Option<String>,
    pub staging_dir: PathBuf,
    pub batch_size: usize,
    pub commit_size: usize,
}

/// What to do once staging is complete.
pub enum LoadMode {
    /// Stage only; leave the CSV files for a later load.
    Skip,
    Bolt {
        uri: String,
        user: String,
        password: String,
        import_prefix: String,
    },
}

/// The self-contained result a worker hands back to the coordinator. This
/// is the only channel besides exit status and logs; workers share no
/// in-memory state with each other or with the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub data_type: String,
    pub provider: String,
    pub staged_artifact: Option<PathBuf>,
    pub stats: PassStats,
    pub staged: Vec<StagedGroup>,
    pub failures: Vec<LoadFailure>,
    pub required_failed: bool,
}

impl WorkerReport {
    pub fn succeeded(&self) -> bool {
        !self.required_failed
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        serde_json::to_writer_pretty(file, self)
            .with_context(|| format!("Failed to write report: {}", path.display()))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read report file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Report file is not valid JSON: {}", path.display()))
    }
}

/// Runs the full Extract -> Batch -> Stage -> Load pass for one
/// sub-descriptor. Strictly sequential: every staged file is fully written
/// before the first load query runs.
pub fn run(
    task: &SubTask,
    extractor: &dyn Extractor,
    specs: &[QuerySpec],
    load_mode: &LoadMode,
) -> Result<WorkerReport> {
    let mut stats = PassStats::default();

    let artifact = fetch::stage_artifact(
        &task.location,
        &task.staging_dir,
        task.extracted_name.as_deref(),
    )?;
    let staged_artifact = artifact.exists().then(|| artifact.clone());

    info!(
        data_type = %task.data_type,
        provider = %task.provider,
        artifact = %artifact.display(),
        "Starting extraction pass"
    );

    let mut router = GroupRouter::new(&task.staging_dir, specs, task.batch_size)?;
    for emit in extractor.records(&artifact)? {
        stats.records_extracted += 1;
        router.route(&emit.group, emit.record)?;
    }
    stats.records_dropped = router.dropped();
    let staged = router.finish()?;
    for group in &staged {
        stats.rows_staged += group.rows;
        stats.batches_emitted += group.batches;
    }

    info!(
        data_type = %task.data_type,
        provider = %task.provider,
        records = stats.records_extracted,
        rows = stats.rows_staged,
        "Staging complete"
    );

    let mut failures: Vec<LoadFailure> = Vec::new();
    let mut required_failed = false;
    if let LoadMode::Bolt {
        uri,
        user,
        password,
        import_prefix,
    } = load_mode
    {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()?;
        let outcome = rt.block_on(async {
            let graph = load::connect_with_retry(uri, user, password).await?;
            Ok::<_, anyhow::Error>(
                load::execute_specs(&graph, specs, import_prefix, &task.provider).await,
            )
        })?;
        stats.queries_run = outcome.queries_run;
        stats.queries_failed = outcome.failures.len() as u64;
        failures = outcome.failures;
        required_failed = outcome.required_failed;
    }

    Ok(WorkerReport {
        data_type: task.data_type.clone(),
        provider: task.provider.clone(),
        staged_artifact,
        stats,
        staged,
        failures,
        required_failed,
    })
}
