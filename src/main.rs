use anyhow::{bail, Context, Result};
use biograph::catalog::{AllianceProviders, Catalog};
use biograph::coordinator::{Coordinator, RunOutcome, WorkerLaunch};
use biograph::extract::{TestFilter, TransformRegistry};
use biograph::load;
use biograph::pipeline::{self, LoadMode, SubTask};
use biograph::registry::Registry;
use biograph::run_config::{self, RunConfig};
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "biograph")]
#[command(about = "Load versioned biological datasets into a Neo4j property graph")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve, fetch, stage, and load every configured dataset
    Run(RunArgs),
    /// Validate a run configuration file and report every violation
    Validate(ValidateArgs),
    /// Internal single-dataset worker, launched by `run`
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Path to the run configuration file
    #[arg(short, long)]
    config: String,

    /// Path to the release catalog file
    #[arg(long)]
    catalog: String,

    /// Staging directory for fetched artifacts and CSV files
    #[arg(short, long)]
    staging: String,

    /// Only run these dataset types (repeatable); default is all resolved
    #[arg(long = "type")]
    types: Vec<String>,

    /// Neo4j Bolt URI
    #[arg(long, default_value = biograph::config::DEFAULT_BOLT_URI)]
    bolt_uri: String,

    /// Neo4j user
    #[arg(long, default_value = "neo4j")]
    bolt_user: String,

    /// Neo4j password
    #[arg(long, default_value = "neo4j", env = "BIOGRAPH_BOLT_PASSWORD")]
    bolt_password: String,

    /// Import file URI prefix for Neo4j LOAD CSV
    #[arg(long, default_value = biograph::config::DEFAULT_IMPORT_PREFIX)]
    import_prefix: String,

    /// Stage CSV files only, skip all Neo4j queries
    #[arg(long)]
    no_load: bool,

    /// Skip index creation before loading
    #[arg(long)]
    no_indexes: bool,

    /// Max concurrent worker processes
    #[arg(long, default_value_t = biograph::config::MAX_PARALLEL_WORKERS)]
    max_parallel: usize,

    /// Kill a worker that runs longer than this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// File of record identifiers (one per line) to restrict extraction to
    #[arg(long)]
    test_ids: Option<String>,
}

#[derive(Args)]
struct ValidateArgs {
    /// Path to the run configuration file
    #[arg(short, long)]
    config: String,
}

#[derive(Args)]
struct WorkerArgs {
    #[arg(long)]
    data_type: String,
    #[arg(long)]
    provider: String,
    #[arg(long)]
    location: String,
    #[arg(long)]
    extracted_name: Option<String>,
    #[arg(long)]
    staging: String,
    #[arg(long)]
    batch_size: usize,
    #[arg(long)]
    commit_size: usize,
    #[arg(long)]
    report: String,
    #[arg(long)]
    bolt_uri: String,
    #[arg(long)]
    bolt_user: String,
    #[arg(long, env = "BIOGRAPH_BOLT_PASSWORD")]
    bolt_password: String,
    #[arg(long)]
    import_prefix: String,
    #[arg(long)]
    no_load: bool,
    #[arg(long)]
    test_ids: Option<String>,
}

fn load_test_ids(path: &str) -> Result<HashSet<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read test id file: {path}"))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn worker_launch(
    args: &RunArgs,
    data_type: &str,
    provider: &str,
    location: &str,
    extracted_name: Option<&str>,
    batch_size: usize,
    commit_size: usize,
) -> Result<WorkerLaunch> {
    let program = std::env::current_exe().context("Failed to locate current executable")?;
    let report_path =
        Path::new(&args.staging).join(format!("report_{data_type}_{provider}.json"));

    let mut argv = vec![
        "worker".to_string(),
        "--data-type".to_string(),
        data_type.to_string(),
        "--provider".to_string(),
        provider.to_string(),
        "--location".to_string(),
        location.to_string(),
        "--staging".to_string(),
        args.staging.clone(),
        "--batch-size".to_string(),
        batch_size.to_string(),
        "--commit-size".to_string(),
        commit_size.to_string(),
        "--report".to_string(),
        report_path.display().to_string(),
        "--bolt-uri".to_string(),
        args.bolt_uri.clone(),
        "--bolt-user".to_string(),
        args.bolt_user.clone(),
        "--import-prefix".to_string(),
        args.import_prefix.clone(),
    ];
    if let Some(name) = extracted_name {
        argv.push("--extracted-name".to_string());
        argv.push(name.to_string());
    }
    if args.no_load {
        argv.push("--no-load".to_string());
    }
    if let Some(ref path) = args.test_ids {
        argv.push("--test-ids".to_string());
        argv.push(path.clone());
    }

    Ok(WorkerLaunch {
        data_type: data_type.to_string(),
        provider: provider.to_string(),
        program,
        args: argv,
        // The password never touches argv; workers read it from the
        // environment.
        env: vec![(
            "BIOGRAPH_BOLT_PASSWORD".to_string(),
            args.bolt_password.clone(),
        )],
        report_path,
    })
}

fn run_run(args: RunArgs) -> Result<()> {
    let start = Instant::now();

    let config = RunConfig::load(Path::new(&args.config))?;
    let catalog = Catalog::load(Path::new(&args.catalog))?;
    info!(
        schema = %catalog.schema_version,
        release = %catalog.release_version,
        files = catalog.data_files.len(),
        "Catalog loaded"
    );

    let mut registry = Registry::resolve(&config, &catalog, &AllianceProviders);
    let data_types: Vec<String> = registry
        .dataset_types()
        .filter(|t| args.types.is_empty() || args.types.iter().any(|want| want == t))
        .map(str::to_string)
        .collect();
    if data_types.is_empty() {
        bail!("No dataset types resolved; nothing to run");
    }

    fs::create_dir_all(&args.staging)
        .with_context(|| format!("Failed to create staging directory: {}", args.staging))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("biograph-coordinator")
        .enable_io()
        .enable_time()
        .build()?;

    if !args.no_load && !args.no_indexes {
        rt.block_on(async {
            let graph =
                load::connect_with_retry(&args.bolt_uri, &args.bolt_user, &args.bolt_password)
                    .await?;
            load::create_indexes(&graph, &data_types).await
        })?;
    }

    let mut launches = Vec::new();
    for data_type in &data_types {
        let Some(descriptor) = registry.dataset(data_type) else { continue };
        for sub in &descriptor.sub_descriptors {
            launches.push(worker_launch(
                &args,
                data_type,
                &sub.provider,
                &sub.location,
                sub.extracted_file.as_deref(),
                descriptor.batch_size,
                descriptor.commit_size,
            )?);
        }
    }
    info!(workers = launches.len(), "Launching worker pool");

    let coordinator = Coordinator::new(args.max_parallel, args.timeout_secs.map(Duration::from_secs));
    let outcome: RunOutcome = rt.block_on(coordinator.run_workers(launches))?;

    let mut totals = biograph::stats::PassStats::default();
    for report in &outcome.reports {
        if let Some(ref artifact) = report.staged_artifact {
            registry.record_staged_artifact(&report.data_type, &report.provider, artifact.clone());
        }
        totals.merge(&report.stats);
    }

    println!();
    println!("=== Summary ===");
    println!("Release:            {}", catalog.release_version);
    println!("Total time:         {:.2}s", start.elapsed().as_secs_f64());
    println!();
    println!("Workers finished:   {}", outcome.reports.len());
    println!("Workers failed:     {}", outcome.failures.len());
    println!("Records extracted:  {}", totals.records_extracted);
    println!("Records dropped:    {}", totals.records_dropped);
    println!("Rows staged:        {}", totals.rows_staged);
    println!("Queries run:        {}", totals.queries_run);
    println!("Queries failed:     {}", totals.queries_failed);

    if !outcome.all_succeeded() {
        for failure in &outcome.failures {
            error!(
                data_type = %failure.data_type,
                provider = %failure.provider,
                "{}", failure.reason
            );
        }
        bail!("{} worker(s) failed", outcome.failures.len());
    }
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.config)
        .with_context(|| format!("Failed to read config file: {}", args.config))?;
    let doc: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("Config file is not valid JSON: {}", args.config))?;

    let violations = run_config::validate(&doc);
    if violations.is_empty() {
        println!("{}: OK", args.config);
        return Ok(());
    }
    for violation in &violations {
        println!("{}: {violation}", args.config);
    }
    bail!("Config file validation unsuccessful: {} violation(s)", violations.len());
}

fn run_worker(args: WorkerArgs) -> Result<()> {
    let task = SubTask {
        data_type: args.data_type.clone(),
        provider: args.provider.clone(),
        location: args.location,
        extracted_name: args.extracted_name,
        staging_dir: PathBuf::from(&args.staging),
        batch_size: args.batch_size,
        commit_size: args.commit_size,
    };

    let filter = match args.test_ids {
        Some(ref path) => Some(TestFilter::from_ids(load_test_ids(path)?)),
        None => None,
    };
    let transforms = TransformRegistry::with_generic_fallback(filter);
    let Some(extractor) = transforms.get(&args.data_type) else {
        bail!("No extractor available for dataset type {}", args.data_type);
    };

    let specs = load::generic_specs(&args.data_type, &args.provider, args.commit_size);
    let load_mode = if args.no_load {
        LoadMode::Skip
    } else {
        LoadMode::Bolt {
            uri: args.bolt_uri,
            user: args.bolt_user,
            password: args.bolt_password,
            import_prefix: args.import_prefix,
        }
    };

    let report = pipeline::run(&task, extractor.as_ref(), &specs, &load_mode)?;
    report.write(Path::new(&args.report))?;

    if report.required_failed {
        bail!(
            "Required query failed for {} ({})",
            args.data_type,
            args.provider
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Run(args) => run_run(args),
        Commands::Validate(args) => run_validate(args),
        Commands::Worker(args) => run_worker(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
