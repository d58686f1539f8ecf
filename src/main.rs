mod output;

use crate::output::{Format, Tally, render};
use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use exn::ResultExt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use verdict_config::Config;
use verdict_reputation::{CancelHandle, Client, CredentialSource, ScanResult, Sha256, channel};

#[derive(Debug, Display, Error)]
enum CliError {
    #[display("could not load configuration")]
    Config,
}

#[derive(Parser)]
#[command(name = "verdict", version, about)]
struct Cli {
    /// Config file (toml, yaml or json), merged over the user config.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Overrides any key from the config files or environment.
    #[arg(long, global = true, value_name = "KEY")]
    api_key: Option<String>,
    /// Print one JSON object per result instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hash files and check them, uploading any the service hasn't seen.
    Scan {
        /// Only look up digests; never upload.
        #[arg(long)]
        no_upload: bool,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Check digests you already have.
    Lookup {
        #[arg(required = true, value_name = "SHA256")]
        digests: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "verdict=info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let format = if cli.json { Format::Json } else { Format::Text };
    let config = match Config::load(cli.config.as_deref()).or_raise(|| CliError::Config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err:?}");
            return ExitCode::from(2);
        },
    };
    let api_key = cli.api_key.or_else(|| config.api_key());
    let mut settings = config.to_settings();

    let tally = match cli.command {
        Command::Scan { no_upload, files } => {
            settings.upload_unknown = !no_upload;
            let client = Arc::new(Client::http(settings, api_key));
            scan(client, files, format).await
        },
        Command::Lookup { digests } => {
            let client = Client::http(settings, api_key);
            lookup(&client, digests, format).await
        },
    };
    tracing::debug!(?tally, "Done");
    ExitCode::from(tally.exit_status())
}

/// Scan files one at a time; results are printed on this task as they land.
async fn scan(client: Arc<Client>, files: Vec<PathBuf>, format: Format) -> Tally {
    let stop = interrupt_on_ctrl_c(client.cancel_handle());
    let (scheduler, mut completions) = channel();
    let scheduler = Arc::new(scheduler);
    let tally = Arc::new(Mutex::new(Tally::default()));

    for path in files {
        if stop.is_cancelled() {
            tracing::warn!(path = %path.display(), "Skipped after interrupt");
            continue;
        }
        let sink = Arc::clone(&tally);
        client.scan_file_async(path, scheduler.clone(), move |result| {
            report(&mut sink.lock().unwrap_or_else(PoisonError::into_inner), &result, format);
        });
        completions.run_next().await;
    }
    client.close();
    std::mem::take(&mut *tally.lock().unwrap_or_else(PoisonError::into_inner))
}

async fn lookup(client: &Client, digests: Vec<String>, format: Format) -> Tally {
    let mut tally = Tally::default();
    for raw in digests {
        let result = match Sha256::parse(&raw) {
            Ok(digest) => client.lookup(&digest).await,
            Err(err) => ScanResult::failed(raw, &err),
        };
        report(&mut tally, &result, format);
    }
    tally
}

fn report(tally: &mut Tally, result: &ScanResult, format: Format) {
    tally.record(result);
    println!("{}", render(result, format));
}

/// First Ctrl+C cancels the in-flight scan and skips the rest. The returned
/// handle reports whether that has happened.
fn interrupt_on_ctrl_c(client_cancel: CancelHandle) -> CancelHandle {
    let stop = CancelHandle::new();
    let flag = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::warn!("Interrupted, cancelling");
                flag.cancel();
                client_cancel.cancel();
            },
            Err(err) => tracing::error!(error = %err, "Could not listen for Ctrl+C"),
        }
    });
    stop
}
