use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;

use autha_directory::{DirectoryConfig, Ldap, Verification, telemetry};
use clap::{Parser, Subcommand};

/// Environment variable read by `authenticate` before prompting on stdin.
const PASSWORD_ENV: &str = "DIRECTORY_PASSWORD";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory configuration file.
    #[clap(long, short, default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Show which accounts a synchronization would create.
    Preview,
    /// Fetch every account selected by the configured filters.
    Sync,
    /// Check the credentials of a directory user.
    Authenticate {
        login: String,
        /// Print the account created on first login.
        #[clap(long)]
        provision: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = telemetry::setup_tracing("info") {
        eprintln!("cannot install tracing subscriber: {err}");
    }
    telemetry::describe_metrics();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "directory command failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(args: Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = DirectoryConfig::read(&args.config)?;

    match args.cmd {
        Commands::Preview => {
            let report = autha_directory::preview(&Ldap, &config).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(if report.is_error {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        },
        Commands::Sync => {
            let users = autha_directory::sync(&Ldap, &config).await?;
            println!("{}", serde_json::to_string_pretty(&users)?);
            Ok(ExitCode::SUCCESS)
        },
        Commands::Authenticate { login, provision } => {
            let password = match std::env::var(PASSWORD_ENV) {
                Ok(password) => password,
                Err(_) => read_password()?,
            };

            let verification =
                autha_directory::authenticate(&Ldap, &config, &login, &password).await?;
            if provision {
                if let Some(account) = verification.provision(&config) {
                    println!("{}", serde_json::to_string_pretty(&account)?);
                }
            }

            match verification {
                Verification::Verified(user) => {
                    println!("{}", serde_json::to_string_pretty(&user)?);
                    Ok(ExitCode::SUCCESS)
                },
                Verification::Rejected(reason) => {
                    println!("{reason}");
                    Ok(ExitCode::from(2))
                },
            }
        },
    }
}

/// Reads a single line from stdin, without its line ending.
fn read_password() -> std::io::Result<String> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_owned())
}
