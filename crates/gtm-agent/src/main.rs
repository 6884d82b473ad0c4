//! Guest Test Agent Entrypoint
//!
//! Usage: gtm-agent [--work-root DIR] [--storage-root DIR]
//!
//! Started by the machine's startup script. Prints a success or failure
//! marker on the console when done; the test manager's wait step watches
//! for it.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gtm_agent::{console_line, Agent, AgentConfig, AgentResult, HttpMetadata, MetadataSource};
use gtm_protocol::{FsObjectStore, HttpObjectStore, ObjectStore, AGENT_STATUS_MARKER};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gtm-agent")]
#[command(about = "Run a guest test binary and upload its report", version)]
struct Cli {
    /// Directory the scratch directory is created in
    #[arg(long, default_value = "/")]
    work_root: PathBuf,

    /// Metadata service base URL
    #[arg(long)]
    metadata_endpoint: Option<String>,

    /// Storage JSON API endpoint
    #[arg(long)]
    storage_endpoint: Option<String>,

    /// Use a filesystem object store rooted here
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> AgentConfig {
        let defaults = AgentConfig::default();
        AgentConfig {
            work_root: self.work_root,
            metadata_endpoint: self.metadata_endpoint.unwrap_or(defaults.metadata_endpoint),
            storage_endpoint: self.storage_endpoint.unwrap_or(defaults.storage_endpoint),
            storage_root: self.storage_root,
        }
    }
}

fn open_store(config: &AgentConfig, metadata: &dyn MetadataSource) -> AgentResult<Box<dyn ObjectStore>> {
    if let Some(root) = &config.storage_root {
        return Ok(Box::new(FsObjectStore::new(root.clone())));
    }
    let token = metadata.access_token()?;
    if token.is_none() {
        tracing::warn!("no service account token, using unauthenticated storage access");
    }
    Ok(Box::new(HttpObjectStore::new(&config.storage_endpoint, token)?))
}

fn run(config: AgentConfig) -> AgentResult<gtm_agent::AgentOutcome> {
    let metadata = HttpMetadata::new(config.metadata_endpoint.clone())?;
    let store = open_store(&config, &metadata)?;
    Agent::new(config, &metadata, store.as_ref()).run()
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "gtm_agent=debug,gtm_protocol=debug"
    } else {
        "gtm_agent=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    println!("{} started", AGENT_STATUS_MARKER);
    let result = run(cli.into_config());
    println!("{}", console_line(&result));

    match result {
        Ok(outcome) => {
            tracing::info!(
                report = %outcome.report_url,
                tests = outcome.counts.total,
                failed = outcome.counts.failed,
                "agent finished"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "agent failed");
            ExitCode::FAILURE
        }
    }
}
