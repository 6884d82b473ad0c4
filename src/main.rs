//! Guest Test Manager CLI
//!
//! Entry point for the `test-manager` command-line tool.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use gtm_protocol::{FsObjectStore, HttpObjectStore, ObjectStore};
use guest_test_manager::config::{parse_images, ConfigLayer, ManagerConfig};
use guest_test_manager::{
    CommandEngine, Finalizer, ProvisioningEngine, ResultCollector, RunSummary, Scheduler,
    SuiteRegistry, TestWorkflow, TracingLogger,
};
use regex_lite::Regex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code when any workflow did not succeed.
const EXIT_TESTS_FAILED: u8 = 2;

#[derive(Parser)]
#[command(name = "test-manager")]
#[command(about = "Run guest OS test suites against machine images", version)]
struct Cli {
    /// Target project
    #[arg(long)]
    project: Option<String>,

    /// Target zone
    #[arg(long)]
    zone: Option<String>,

    /// Comma-separated list of images to test
    #[arg(long)]
    images: Option<String>,

    /// Only run suites whose name matches this regex
    #[arg(long)]
    filter: Option<String>,

    /// Path of the combined JUnit report (default: junit.xml)
    #[arg(long)]
    out_path: Option<PathBuf>,

    /// Number of workflows run at once (default: 5)
    #[arg(long)]
    parallel_count: Option<usize>,

    /// Print the workflows as JSON instead of running them
    #[arg(long, conflicts_with = "validate")]
    print: bool,

    /// Validate the workflows instead of running them
    #[arg(long)]
    validate: bool,

    /// Path to a TOML config file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Provisioning engine binary (default: daisy)
    #[arg(long)]
    engine_binary: Option<PathBuf>,

    /// gs:// base for per-workflow reports (default: gs://<project>-test-results)
    #[arg(long)]
    results_base: Option<String>,

    /// Use a filesystem object store rooted here
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Bearer token for the storage API
    #[arg(long, env = "GTM_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

impl Cli {
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            project: self.project.clone(),
            zone: self.zone.clone(),
            images: self.images.as_deref().map(parse_images),
            filter: self.filter.clone(),
            out_path: self.out_path.clone(),
            parallel_count: self.parallel_count,
            engine_binary: self.engine_binary.clone(),
            results_base: self.results_base.clone(),
            storage_root: self.storage_root.clone(),
            access_token: self.access_token.clone(),
            ..Default::default()
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "guest_test_manager=debug,gtm_protocol=debug"
    } else {
        "guest_test_manager=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let file_layer = match cli.config.as_deref().map(ConfigLayer::from_file).transpose() {
        Ok(layer) => layer,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let config = match ManagerConfig::load(file_layer, cli.layer()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let suite_filter = match config.filter.as_deref().map(Regex::new).transpose() {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Error: invalid filter: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let registry = SuiteRegistry::with_builtin();
    let mut workflows = registry.build_workflows(&config.images, suite_filter.as_ref());

    let engine = CommandEngine::new(&config.engine_binary, &config.scratch_dir);
    let settings = config.finalize_settings();
    let finalizer = Finalizer::new(&settings, &engine, Arc::new(TracingLogger));
    if let Err(e) = finalizer.finalize_all(&mut workflows) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    if cli.print {
        return print_workflows(&workflows);
    }
    if cli.validate {
        return validate_workflows(&engine, &workflows);
    }

    let store = match open_store(&config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let collector = ResultCollector::new(store);
    let scheduler = match Scheduler::new(&engine, &collector, config.parallel_count) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let summary = RunSummary::new(scheduler.run(workflows));
    for line in summary.lines() {
        println!("{}", line);
    }
    if let Err(e) = summary.write_junit(&config.out_path) {
        tracing::error!(path = %config.out_path.display(), error = %e, "failed to write report");
        return ExitCode::FAILURE;
    }
    tracing::info!(path = %config.out_path.display(), "wrote combined report");

    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_TESTS_FAILED)
    }
}

fn open_store(config: &ManagerConfig) -> gtm_protocol::StorageResult<Arc<dyn ObjectStore>> {
    if let Some(root) = &config.storage_root {
        return Ok(Arc::new(FsObjectStore::new(root.clone())));
    }
    if config.access_token.is_none() {
        tracing::warn!("no access token, using unauthenticated storage access");
    }
    Ok(Arc::new(HttpObjectStore::new(
        &config.storage_endpoint,
        config.access_token.clone(),
    )?))
}

fn print_workflows(workflows: &[TestWorkflow]) -> ExitCode {
    for workflow in workflows {
        if workflow.is_skipped() {
            continue;
        }
        match workflow.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("{} [{}]: {}", workflow.name(), workflow.image(), e),
        }
    }
    ExitCode::SUCCESS
}

fn validate_workflows(engine: &dyn ProvisioningEngine, workflows: &[TestWorkflow]) -> ExitCode {
    let mut failed = 0;
    for workflow in workflows {
        if workflow.is_skipped() {
            continue;
        }
        let Some(graph) = workflow.graph() else {
            eprintln!(
                "{} [{}]: setup failed: {}",
                workflow.name(),
                workflow.image(),
                workflow.setup_error().unwrap_or("not set up")
            );
            failed += 1;
            continue;
        };
        let result = graph
            .validate()
            .map_err(|e| e.to_string())
            .and_then(|_| engine.validate(graph).map_err(|e| e.to_string()));
        match result {
            Ok(()) => println!("{} [{}]: valid", workflow.name(), workflow.image()),
            Err(e) => {
                eprintln!("{} [{}]: {}", workflow.name(), workflow.image(), e);
                failed += 1;
            }
        }
    }
    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_TESTS_FAILED)
    }
}
