pub mod server;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// cc-jobmon - job monitoring backend for HPC clusters
#[derive(Parser, Debug)]
#[command(
    name = "jobmon",
    version,
    about = "cc-jobmon - job monitoring backend for HPC clusters"
)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the REST API server in the foreground
    Serve {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,

        /// Address to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short = 'p', long)]
        port: Option<u16>,

        /// Data directory path
        #[arg(long = "data-dir")]
        data_dir: Option<PathBuf>,
    },

    /// Create the job database or apply pending migrations
    InitDb {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,

        /// Data directory path
        #[arg(long = "data-dir")]
        data_dir: Option<PathBuf>,
    },

    /// Query a running server's health endpoint
    Status {
        /// Server host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

/// Build the base URL for the server HTTP API.
pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

/// Format a connection error message for when the server is not reachable.
pub fn connection_error_message(host: &str, port: u16) -> String {
    format!(
        "Could not connect to server at {}:{}. Is it running? (try: jobmon serve)",
        host, port
    )
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Some(Commands::Serve {
            config,
            host,
            port,
            data_dir,
        }) => {
            server::cmd_serve(
                config.clone(),
                host.clone(),
                *port,
                data_dir.clone(),
                cli.verbose,
            )
            .await
        }
        Some(Commands::InitDb { config, data_dir }) => {
            server::cmd_init_db(config.clone(), data_dir.clone(), cli.verbose)
        }
        Some(Commands::Status { host, port }) => server::cmd_status(host, *port, cli.verbose).await,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
