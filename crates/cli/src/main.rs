//! Deployment convergence CLI
//!
//! Marks commits for deployment in a deploy group, waits for them to roll
//! out, and shows per-instance rollout status.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::deploy::{self, DeployContext, MarkForDeployment};
use commands::status;
use converge_lib::signal::GitRefStore;
use converge_lib::DeployError;
use converge_lib::waiter::{DEFAULT_DEPLOYMENT_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Deployment convergence CLI
#[derive(Parser)]
#[command(name = "converge")]
#[command(author, version, about = "Mark, wait for and inspect deployments", long_about = None)]
pub struct Cli {
    /// Status API URL (can also be set via CONVERGE_API_URL env var)
    #[arg(long, env = "CONVERGE_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Mark a commit for deployment in a deploy group
    MarkForDeployment(MarkArgs),

    /// Wait for a commit to be deployed to every instance in a deploy group
    WaitForDeployment(WaitArgs),

    /// Show rollout status of every instance in a deploy group
    Status {
        /// Service name; a leading "services-" is stripped
        #[arg(long, short)]
        service: String,

        /// Deploy group, e.g. cluster1.main
        #[arg(long = "deploy-group", short = 'l')]
        deploy_group: String,

        /// Commit to check readiness against
        #[arg(long, short)]
        commit: Option<String>,

        /// Output format
        #[arg(long, short, default_value = "table")]
        format: output::OutputFormat,
    },
}

#[derive(Args)]
pub struct MarkArgs {
    /// Git url of the service repository
    #[arg(long = "git-url", short = 'u')]
    pub git_url: String,

    /// Commit to mark for deployment
    #[arg(long, short)]
    pub commit: String,

    /// Deploy group, e.g. cluster1.canary or cluster2.main
    #[arg(long = "deploy-group", short = 'l')]
    pub deploy_group: String,

    /// Service name; a leading "services-" is stripped
    #[arg(long, short)]
    pub service: String,

    /// Wait for the deployment to finish instead of exiting straight away
    #[arg(long = "wait-for-deployment")]
    pub wait_for_deployment: bool,

    /// Seconds to wait for the deployment before failing
    #[arg(long, short, default_value_t = DEFAULT_DEPLOYMENT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Service configuration directory used to validate the service name
    #[arg(long = "soa-dir", short = 'd')]
    pub soa_dir: Option<PathBuf>,
}

#[derive(Args)]
pub struct WaitArgs {
    /// Commit to wait for
    #[arg(long, short)]
    pub commit: String,

    /// Deploy group, e.g. cluster1.main
    #[arg(long = "deploy-group", short = 'l')]
    pub deploy_group: String,

    /// Service name; a leading "services-" is stripped
    #[arg(long, short)]
    pub service: String,

    /// Seconds to wait for the deployment before failing
    #[arg(long, short, default_value_t = DEFAULT_DEPLOYMENT_TIMEOUT_SECS)]
    pub timeout: u64,
}

async fn run(cli: Cli) -> Result<()> {
    let api_url = config::Config::load()?.resolve_api_url(cli.api_url);
    let api = Arc::new(client::ApiClient::new(&api_url)?);

    let ctx = DeployContext {
        refs: Arc::new(GitRefStore::new()),
        status: api.clone(),
        events: Arc::new(output::ConsoleEventSink::default()),
        poll_interval: DEFAULT_POLL_INTERVAL,
    };

    match cli.command {
        Commands::MarkForDeployment(args) => {
            let args = MarkForDeployment {
                git_url: args.git_url,
                commit: args.commit,
                deploy_group: args.deploy_group,
                service: args.service,
                wait: args.wait_for_deployment,
                timeout_secs: args.timeout,
                soa_dir: args.soa_dir,
            };
            deploy::mark_for_deployment(&ctx, &args).await?;
        }
        Commands::WaitForDeployment(args) => {
            deploy::wait_for_deployment(
                &ctx,
                &args.service,
                &args.deploy_group,
                &args.commit,
                args.timeout,
            )
            .await?;
            output::print_success("Deployment complete");
        }
        Commands::Status {
            service,
            deploy_group,
            commit,
            format,
        } => {
            let service = deploy::strip_services_prefix(&service);
            status::show_status(api.as_ref(), service, &deploy_group, commit.as_deref(), format)
                .await?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            match e.downcast_ref::<DeployError>() {
                Some(err) => ExitCode::from(err.exit_code()),
                None => ExitCode::FAILURE,
            }
        }
    }
}
