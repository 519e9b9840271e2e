//! `psi`: two-party private set intersection with secure aggregation
//!
//! Subcommands either run the responder (`start-server`) or drive an
//! initiator session against one (`connect`, `run-psi`, `run-join`,
//! `run-aggregate`). Initiator commands generate the demo tables, run the
//! required protocol prefix over a fresh connection, print a summary, and
//! exit the session.

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use psi_client::Client;
use psi_core::{datagen, table::MemTable, table::Table, Error, ErrorKind, Result};
use psi_server::Server;
use tracing::{error, info, Level};

/// PSI party node
#[derive(Parser)]
#[command(name = "psi")]
#[command(about = "ECDH private set intersection with CKKS secure aggregation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Endpoint {
    /// Responder host
    #[arg(long, env = "PSI_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Responder port
    #[arg(long, env = "PSI_PORT", default_value_t = 5000)]
    port: u16,
}

#[derive(Args, Clone)]
struct DataOpts {
    /// Rows to generate per party
    #[arg(long, default_value_t = datagen::DEFAULT_ROWS)]
    rows: usize,

    /// Fraction of identifiers common to both parties
    #[arg(long, default_value_t = datagen::DEFAULT_OVERLAP)]
    overlap: f64,

    /// Generator seed
    #[arg(long, env = "PSI_SEED", default_value_t = datagen::DEFAULT_SEED)]
    seed: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Plain,
    Secure,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the responder server
    StartServer {
        #[command(flatten)]
        endpoint: Endpoint,
        #[command(flatten)]
        data: DataOpts,
    },

    /// Probe connectivity to a responder
    Connect {
        #[command(flatten)]
        endpoint: Endpoint,
    },

    /// Run the PSI exchange and print the intersection size
    RunPsi {
        #[command(flatten)]
        endpoint: Endpoint,
        #[command(flatten)]
        data: DataOpts,
    },

    /// Run PSI, then fetch and join the matching responder rows
    RunJoin {
        #[command(flatten)]
        endpoint: Endpoint,
        #[command(flatten)]
        data: DataOpts,
    },

    /// Run PSI, then aggregate compensation per department
    RunAggregate {
        #[command(flatten)]
        endpoint: Endpoint,
        #[command(flatten)]
        data: DataOpts,

        /// Aggregation mode
        #[arg(long, value_enum, default_value_t = Mode::Secure)]
        mode: Mode,
    },

    /// Open a session and close it again with EXIT
    Exit {
        #[command(flatten)]
        endpoint: Endpoint,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(kind = %e.kind(), error = %e, "command failed");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Exit codes: 0 success, 2 usage (clap), 3 connection failed, 4 protocol
/// error, 5 cryptographic failure
fn exit_code(error: &Error) -> u8 {
    match error.kind() {
        ErrorKind::Transport => 3,
        ErrorKind::Framing
        | ErrorKind::Protocol
        | ErrorKind::PreconditionUnmet
        | ErrorKind::Alignment => 4,
        ErrorKind::MalformedPoint | ErrorKind::CryptoContext => 5,
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::StartServer { endpoint, data } => start_server(endpoint, data).await,
        Commands::Connect { endpoint } => {
            let client = Client::connect(&endpoint.host, endpoint.port, MemTable::default()).await?;
            client.exit().await?;
            println!("Responder at {}:{} is reachable.", endpoint.host, endpoint.port);
            Ok(())
        }
        Commands::RunPsi { endpoint, data } => {
            let mut client = connect_with_data(&endpoint, &data).await?;
            let intersection = client.run_psi().await?;
            println!(
                "Intersection: {} of {} identifiers.",
                intersection.len(),
                client.table().len()
            );
            for id in intersection.iter().take(10) {
                println!("  {id}");
            }
            client.exit().await
        }
        Commands::RunJoin { endpoint, data } => {
            let mut client = connect_with_data(&endpoint, &data).await?;
            client.run_psi().await?;
            let joined = client.run_join().await?;
            println!("Joined rows: {}", joined.len());
            client.exit().await
        }
        Commands::RunAggregate {
            endpoint,
            data,
            mode,
        } => {
            let mut client = connect_with_data(&endpoint, &data).await?;
            client.run_psi().await?;
            let totals = match mode {
                Mode::Plain => {
                    client.run_join().await?;
                    client.aggregate_plain()?
                }
                Mode::Secure => client.run_secure_aggregation().await?,
            };
            println!("Total compensation per department:");
            for (department, total) in &totals {
                println!("  {department}: {total}");
            }
            client.exit().await
        }
        Commands::Exit { endpoint } => {
            let client = Client::connect(&endpoint.host, endpoint.port, MemTable::default()).await?;
            client.exit().await?;
            println!("Session closed.");
            Ok(())
        }
    }
}

async fn start_server(endpoint: Endpoint, data: DataOpts) -> Result<()> {
    let (_, responder_table) = datagen::generate(data.rows, data.overlap, data.seed);
    let server = Server::bind(&endpoint.host, endpoint.port, responder_table).await?;

    let shutdown = server.shutdown_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.shutdown();
        }
    });

    server.serve().await
}

async fn connect_with_data(endpoint: &Endpoint, data: &DataOpts) -> Result<Client> {
    let (initiator_table, _) = datagen::generate(data.rows, data.overlap, data.seed);
    Client::connect(&endpoint.host, endpoint.port, initiator_table).await
}
