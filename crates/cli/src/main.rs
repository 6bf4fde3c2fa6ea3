//! API signature CLI.
//!
//! This tool provides commands for:
//! - Validating settings files and computing their hashes
//! - Signing requests for inspection
//! - Signing and sending requests
//! - Verifying signed requests against configured clients

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod config;
mod error;
mod hash;
mod request;
mod transport;

use error::CliError;
use request::RequestArgs;

#[derive(Parser)]
#[command(name = "apisig")]
#[command(about = "Sign, send and verify HMAC-signed API requests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Settings management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print a signed request without sending it
    Sign(SignArgs),

    /// Sign and send a request
    Send(SignArgs),

    /// Validate a signed request against the configured clients
    Verify {
        /// Path to the TOML settings file
        #[arg(long, short, env = "API_SIGNATURE_SETTINGS")]
        file: PathBuf,

        /// HTTP method
        #[arg(long, short, default_value = "GET")]
        method: String,

        /// Request URL or path with query string
        #[arg(long, short)]
        url: String,

        /// Raw request body
        #[arg(long, short)]
        body: Option<String>,

        /// Content type of the body
        #[arg(long, default_value = "application/x-www-form-urlencoded")]
        content_type: String,
    },
}

#[derive(clap::Args)]
struct SignArgs {
    /// Path to the TOML settings file
    #[arg(long, short, env = "API_SIGNATURE_SETTINGS")]
    file: PathBuf,

    /// Client name (defaults to `default_client`)
    #[arg(long, short)]
    client: Option<String>,

    /// HTTP method: GET, POST, PUT or DELETE
    #[arg(long, short, default_value = "GET")]
    method: String,

    /// Request path
    #[arg(long, short)]
    path: String,

    /// Payload field as key=value (repeatable)
    #[arg(long = "data", short = 'd')]
    data: Vec<String>,

    /// Extra header as 'Name: value' (repeatable)
    #[arg(long = "header", short = 'H')]
    headers: Vec<String>,
}

impl SignArgs {
    fn as_request_args(&self) -> RequestArgs<'_> {
        RequestArgs {
            file: &self.file,
            client: self.client.as_deref(),
            method: &self.method,
            path: &self.path,
            data: &self.data,
            headers: &self.headers,
        }
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate settings and print a summary
    Validate {
        /// Path to the TOML settings file
        #[arg(long, short, env = "API_SIGNATURE_SETTINGS")]
        file: PathBuf,
    },

    /// Compute and display settings hash (SHA-256)
    Hash {
        /// Path to the TOML settings file
        #[arg(long, short, env = "API_SIGNATURE_SETTINGS")]
        file: PathBuf,

        /// Output format
        #[arg(long, default_value = "text")]
        format: HashFormat,

        /// Hash the raw file without applying environment overrides
        #[arg(long)]
        raw: bool,

        /// Fail unless the hash equals this one, e.g. the hash printed on the
        /// server host
        #[arg(long)]
        expect: Option<String>,
    },
}

#[derive(Clone, ValueEnum, Debug)]
pub enum HashFormat {
    Text,
    Json,
}

fn init_logger(verbose: bool) -> Result<(), log::SetLoggerError> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}  {} {}",
                chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logger(cli.verbose) {
        eprintln!("Warning: failed to initialize logger: {}", e);
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Validate { file } => config::validate(&file, cli.verbose),
            ConfigAction::Hash {
                file,
                format,
                raw,
                expect,
            } => hash::compute_and_display(&file, &format, raw, expect.as_deref(), cli.verbose),
        },
        Commands::Sign(args) => request::sign(&args.as_request_args(), cli.verbose).map(|_| ()),
        Commands::Send(args) => request::send(&args.as_request_args(), cli.verbose),
        Commands::Verify {
            file,
            method,
            url,
            body,
            content_type,
        } => request::verify(
            &file,
            &method,
            &url,
            body.as_deref(),
            Some(content_type.as_str()),
            cli.verbose,
        )
        .map(|_| ()),
    }
}
