use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use shoal_agent::{
    AgentRpc, HostedRuntimes, HttpRegistryClient, LocalRegistryClient, RegistryClient,
    SystemLoadSampler, serve_agent_rpc, start_host,
};
use shoal_core::{MemoryStore, Resource, ResourceStatus, StaticTokenValidator};
use shoal_deployer::{ApplicationServices, DeployPlan, PlanSummary};
use shoal_registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing_subscriber::{EnvFilter, fmt};

mod config;
mod deploy;

use config::{LOCAL_REGISTRY, ShoalConfig};
use deploy::{DeployJob, HostDeployer, read_json};

#[derive(Parser)]
#[command(name = "shoal", about = "Shoal service-mesh control plane")]
struct Cli {
    /// Config file (defaults to ./shoal.toml, then ~/.shoal/shoal.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register this host with the registry and report its load until ctrl-c
    Host {
        /// Registry URL, overriding [registry] url
        #[arg(long)]
        registry: Option<String>,

        /// Heartbeat interval in seconds, overriding [host] heartbeat_interval_secs
        #[arg(long)]
        interval: Option<u64>,

        /// Deploy <definitions> <plan> once registered (repeatable)
        #[arg(long, num_args = 2, value_name = "FILE")]
        deploy: Vec<PathBuf>,
    },
    /// Deploy plans on this host and upload the results to the registry
    Deploy {
        /// <definitions> <plan> pairs
        #[arg(required = true, num_args = 2.., value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    /// Parse a deploy plan and its service definitions and summarize them
    CheckPlan {
        /// Deploy plan (JSON)
        plan: PathBuf,

        /// Service definitions (JSON list of {application, services})
        definitions: PathBuf,

        /// Directory relative code locations resolve against
        #[arg(long, default_value = ".")]
        base_dir: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config,
}

fn init_logging(json: bool) {
    // Logs go to stderr so command output on stdout stays parseable
    let builder = fmt()
        .with_env_filter(EnvFilter::from_env("SHOAL_LOG"))
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Command::Host {
            registry,
            interval,
            deploy,
        } => run_host(cli.config.as_deref(), registry, interval, &deploy).await,
        Command::Deploy { files } => run_deploy(cli.config.as_deref(), &files).await,
        Command::CheckPlan {
            plan,
            definitions,
            base_dir,
            json,
        } => check_plan(&plan, &definitions, &base_dir, json),
        Command::Config => {
            let config = ShoalConfig::load(cli.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Registry the host talks to: `[registry] url = "local"` runs one in this
/// process, owned by the host account.
fn registry_client(config: &ShoalConfig) -> Arc<dyn RegistryClient> {
    if !config.registry.is_local() {
        return Arc::new(HttpRegistryClient::new(
            config.registry.url.clone(),
            config.registry.token.clone(),
        ));
    }
    let token = config
        .registry
        .token
        .clone()
        .unwrap_or_else(|| LOCAL_REGISTRY.to_string());
    let account = config.host.account.clone();
    let validator =
        StaticTokenValidator::new().with_token(token.as_str(), account.as_str(), account.as_str());
    let registry = Registry::new(Arc::new(MemoryStore::new()), Arc::new(validator))
        .with_settings(config.local_registry_settings());
    tracing::info!(account = %account, "Using in-process registry");
    Arc::new(LocalRegistryClient::new(Arc::new(registry), token))
}

async fn run_host(
    config_path: Option<&Path>,
    registry: Option<String>,
    interval: Option<u64>,
    deploy: &[PathBuf],
) -> Result<()> {
    let mut config = ShoalConfig::load(config_path)?;
    if let Some(url) = registry {
        config.registry.url = url;
    }
    if let Some(secs) = interval {
        config.host.heartbeat_interval_secs = secs;
    }
    let jobs = DeployJob::pairs(deploy)?;
    let host = config.host_resource()?;

    tracing::info!(
        registry = %config.registry.url,
        account = %host.account,
        name = %host.name,
        "Starting Shoal host agent"
    );

    let client = registry_client(&config);
    let mut agent = start_host(
        host,
        config.heartbeat_interval(),
        Arc::clone(&client),
        Arc::new(SystemLoadSampler::new()),
    );

    let runtimes = Arc::new(HostedRuntimes::new());
    let mut deployer = HostDeployer::new(&config, client);
    if !jobs.is_empty() {
        let registered = tokio::select! {
            id = agent.registered() => Some(id),
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(host_id) = registered else {
            tracing::info!("Shutdown requested before registration");
            agent.shutdown().await;
            return Ok(());
        };
        match host_id {
            Some(host_id) => {
                let report = deployer.run(&host_id, &jobs).await;
                report.record_into(&runtimes).await;
            }
            None => tracing::warn!("Host not registered, skipping deploys"),
        }
    }

    let mut server = None;
    if let Some(port) = config.host.agent_port {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to bind agent port {port}"))?;
        let mut rpc = AgentRpc::new(Arc::clone(&runtimes));
        for (name, provider) in deployer.providers() {
            rpc = rpc.with_provider(name.as_str(), Arc::clone(provider));
        }
        if let Some(token) = &config.host.agent_token {
            rpc = rpc.with_token(token.as_str());
        }
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(serve_agent_rpc(listener, Arc::new(rpc), async {
            let _ = stopped.await;
        }));
        server = Some((stop, task));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("Shutdown requested");
    agent.shutdown().await;
    if let Some((stop, task)) = server {
        let _ = stop.send(());
        task.await
            .context("agent RPC server panicked")?
            .context("agent RPC server failed")?;
    }
    Ok(())
}

/// Register the host, deploy every pair and print a JSON report. Fails after
/// all pairs have run if any of them failed.
async fn run_deploy(config_path: Option<&Path>, files: &[PathBuf]) -> Result<()> {
    let config = ShoalConfig::load(config_path)?;
    let jobs = DeployJob::pairs(files)?;
    let host = config.host_resource()?;
    let client = registry_client(&config);

    let resource = Resource {
        status: ResourceStatus::Ready,
        ..host
    };
    let Some(host_id) = client
        .update_resource_info(&resource)
        .await
        .context("failed to register host")?
    else {
        bail!("registry returned no host id for {}", resource.name);
    };

    let mut deployer = HostDeployer::new(&config, client);
    let report = deployer.run(&host_id, &jobs).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.failed.is_empty() {
        bail!("{} of {} deploy(s) failed", report.failed.len(), jobs.len());
    }
    Ok(())
}

fn check_plan(
    plan_path: &Path,
    definitions_path: &Path,
    base_dir: &Path,
    json: bool,
) -> Result<()> {
    let plan: DeployPlan = read_json(plan_path)?;
    let definitions: Vec<ApplicationServices> = read_json(definitions_path)?;
    let summary = PlanSummary::new(&plan, &definitions);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("providers: {}", summary.providers.join(", "));
        for app in &summary.applications {
            println!(
                "{} {}: {} service(s), {} init step(s)",
                app.name,
                app.version.as_deref().unwrap_or("-"),
                app.services.len(),
                app.init_steps
            );
            for service in &app.services {
                println!("  {service}");
            }
        }
    }

    for app in &plan.applications {
        match app.code_dir(base_dir) {
            Some(dir) if dir.is_dir() => {}
            Some(dir) => eprintln!(
                "warning: {} code directory {} not found",
                app.name,
                dir.display()
            ),
            None => eprintln!("warning: {} has no local code location", app.name),
        }
    }
    Ok(())
}
