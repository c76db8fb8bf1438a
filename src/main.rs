use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tonic::transport::Endpoint;
use tracing_subscriber::EnvFilter;

use swift_scheduler::config::{MasterConfig, WorkerConfig, DEFAULT_MASTER_PORT};
use swift_scheduler::dashboard::{run_dashboard, DashboardState};
use swift_scheduler::grpc::GrpcServer;
use swift_scheduler::proto::scheduler_service_client::SchedulerServiceClient;
use swift_scheduler::proto::GetClusterLoadRequest;
use swift_scheduler::scheduler::WorkerRegistry;
use swift_scheduler::shutdown::install_shutdown_handler;
use swift_scheduler::worker::WorkerAgent;

#[derive(Parser, Debug)]
#[command(name = "swift-scheduler")]
#[command(version)]
#[command(about = "Master/worker job scheduling control plane")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the master that workers connect to
    Master(MasterArgs),

    /// Start a worker and register it with the master
    Worker(WorkerArgs),

    /// Cluster inspection commands
    Cluster {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: ClusterCommands,
    },
}

// =============================================================================
// Master Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct MasterArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on for gRPC
    #[arg(long, default_value_t = DEFAULT_MASTER_PORT)]
    port: u16,

    /// Port for the web dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Disconnect workers that send nothing for this many milliseconds.
    /// Without it only a transport disconnect removes a worker.
    #[arg(long)]
    worker_idle_timeout_ms: Option<u64>,

    /// Outbound message buffer per worker connection
    #[arg(long, default_value = "32")]
    outbound_buffer: usize,
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Master address
    #[arg(long, short = 'm', default_value = "http://127.0.0.1:50051")]
    master: String,

    /// Worker identity (defaults to <hostname>-<pid>)
    #[arg(long)]
    worker_id: Option<String>,

    /// Hostname reported to the master
    #[arg(long)]
    hostname: Option<String>,

    /// Maximum number of concurrent tasks
    #[arg(long, default_value = "10")]
    max_concurrency: u32,

    /// Interval between status updates in milliseconds
    #[arg(long, default_value = "5000")]
    status_interval_ms: u64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Master address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(clap::Subcommand, Debug)]
enum ClusterCommands {
    /// Show registered workers and aggregate load
    Status,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct WorkerOutput {
    worker_id: String,
    hostname: String,
    max_concurrency: u32,
    active_task_count: u32,
    registered_at_ms: i64,
    last_status_at_ms: i64,
}

#[derive(Serialize)]
struct ClusterStatusOutput {
    active_tasks: u64,
    total_capacity: u64,
    workers: Vec<WorkerOutput>,
}

// =============================================================================
// Commands
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_master(args: MasterArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut config = MasterConfig::new(SocketAddr::new(args.bind, args.port));
    config.outbound_buffer = args.outbound_buffer;
    if let Some(timeout_ms) = args.worker_idle_timeout_ms {
        config = config.with_idle_timeout_ms(timeout_ms);
    }
    if let Some(port) = args.dashboard_port {
        config = config.with_dashboard(SocketAddr::new(args.bind, port));
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        dashboard_addr = ?config.dashboard_addr,
        worker_idle_timeout_ms = ?config.worker_idle_timeout_ms,
        "Starting master"
    );

    let shutdown = install_shutdown_handler();
    let registry = Arc::new(WorkerRegistry::new());

    if let Some(dashboard_addr) = config.dashboard_addr {
        let state = DashboardState {
            registry: registry.clone(),
        };
        let dashboard_shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_dashboard(dashboard_addr, state, dashboard_shutdown).await;
        });
    }

    GrpcServer::new(config, registry).run(shutdown).await?;
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut config = WorkerConfig::new(args.master)
        .with_max_concurrency(args.max_concurrency)
        .with_status_interval_ms(args.status_interval_ms);
    if let Some(worker_id) = args.worker_id {
        config = config.with_worker_id(worker_id);
    }
    if let Some(hostname) = args.hostname {
        config.hostname = hostname;
    }

    let shutdown = install_shutdown_handler();
    WorkerAgent::new(config).run(shutdown).await?;
    Ok(())
}

async fn handle_cluster_status(client: &ClientArgs) -> Result<(), Box<dyn std::error::Error>> {
    let channel = Endpoint::new(client.addr.clone())?.connect().await?;
    let mut grpc = SchedulerServiceClient::new(channel);
    let resp = grpc
        .get_cluster_load(GetClusterLoadRequest {})
        .await?
        .into_inner();

    match client.output {
        OutputFormat::Json => {
            let output = ClusterStatusOutput {
                active_tasks: resp.active_tasks,
                total_capacity: resp.total_capacity,
                workers: resp
                    .workers
                    .into_iter()
                    .map(|w| WorkerOutput {
                        worker_id: w.worker_id,
                        hostname: w.hostname,
                        max_concurrency: w.max_concurrency,
                        active_task_count: w.active_task_count,
                        registered_at_ms: w.registered_at_ms,
                        last_status_at_ms: w.last_status_at_ms,
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!(
                "Load: {}/{} active tasks across {} workers",
                resp.active_tasks,
                resp.total_capacity,
                resp.workers.len()
            );
            if resp.workers.is_empty() {
                return Ok(());
            }
            println!();
            println!(
                "{:<32} {:<24} {:>8} {:>8}",
                "WORKER", "HOSTNAME", "ACTIVE", "MAX"
            );
            for w in resp.workers {
                println!(
                    "{:<32} {:<24} {:>8} {:>8}",
                    w.worker_id, w.hostname, w.active_task_count, w.max_concurrency
                );
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Master(master_args) => run_master(master_args).await,
        Commands::Worker(worker_args) => run_worker(worker_args).await,
        Commands::Cluster { client, command } => match command {
            ClusterCommands::Status => handle_cluster_status(&client).await,
        },
    }
}
