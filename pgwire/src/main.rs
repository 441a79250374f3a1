use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use serde::Serialize;
use wireprobe_pgwire::{probe, Session, SessionConfig};

#[derive(Parser, Debug)]
#[clap(author, version, about = "PostgreSQL wire-protocol probe")]
struct Args {
    /// Config file path (TOML, JSON or YAML)
    #[clap(short, long, env = "PGPROBE_CONFIG")]
    config: Option<String>,

    /// PostgreSQL host to connect to
    #[clap(long, env = "PGHOST")]
    host: Option<String>,

    /// PostgreSQL port to connect to
    #[clap(long, env = "PGPORT")]
    port: Option<u16>,

    /// PostgreSQL user
    #[clap(short, long, env = "PGUSER")]
    user: Option<String>,

    /// PostgreSQL password
    #[clap(long, env = "PGPASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// PostgreSQL database
    #[clap(short, long, env = "PGDATABASE")]
    database: Option<String>,

    /// Connect timeout in milliseconds
    #[clap(long)]
    connect_timeout_ms: Option<u64>,

    /// Per-operation timeout in milliseconds
    #[clap(long)]
    operation_timeout_ms: Option<u64>,

    /// Accept a SCRAM server signature that does not verify
    #[clap(long)]
    no_verify_server_signature: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, authenticate and report what the server announced
    Probe,

    /// Run SQL with the simple query protocol
    Query {
        /// SQL text; several statements return several results
        sql: String,
    },

    /// Describe a statement without executing it
    Describe {
        /// SQL text of one statement
        sql: String,
    },

    /// Listen on a channel and print the notifications that arrive
    Listen {
        /// Channel name
        channel: String,

        /// Collection window in milliseconds
        #[clap(long)]
        window_ms: Option<u64>,
    },
}

fn build_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => {
            let user = args
                .user
                .clone()
                .context("No user given; pass --user or set PGUSER")?;
            SessionConfig::new("localhost", user)
        }
    };

    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(user) = &args.user {
        config.user = user.clone();
    }
    if let Some(password) = &args.password {
        config.password = Some(password.clone());
    }
    if let Some(database) = &args.database {
        config.database = Some(database.clone());
    }
    if let Some(timeout) = args.connect_timeout_ms {
        config.connect_timeout_ms = timeout;
    }
    if let Some(timeout) = args.operation_timeout_ms {
        config.operation_timeout_ms = timeout;
    }
    if args.no_verify_server_signature {
        config.verify_server_signature = false;
    }

    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let config = build_config(&args)?;
    debug!("Using {:?}", config);

    if let Command::Probe = args.command {
        let report = probe(&config).await?;
        return print_json(&report);
    }

    let mut session = Session::connect(&config)
        .await
        .with_context(|| format!("Failed to connect to {}:{}", config.host, config.port))?;

    let outcome = match &args.command {
        Command::Probe => Ok(()),
        Command::Query { sql } => match session.execute_all(sql).await {
            Ok(results) => print_json(&results),
            Err(e) => Err(e.into()),
        },
        Command::Describe { sql } => match session.describe(sql).await {
            Ok(description) => print_json(&description),
            Err(e) => Err(e.into()),
        },
        Command::Listen { channel, window_ms } => {
            let window = window_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| config.listen_window());
            match session.listen(channel, window).await {
                Ok(result) => print_json(&result),
                Err(e) => Err(e.into()),
            }
        }
    };

    info!("Session stats: {:?}", session.stats());
    session.close().await?;
    outcome
}
