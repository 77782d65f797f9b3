//! repairdesk - command-line client for the support back office.
//!
//! Logs in against the REST API, keeps the session on disk (or in the OS
//! keychain) and issues authenticated requests through the same gateway
//! the rest of the application uses.

mod commands;

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use repairdesk_core::{ApiError, AuthContext, Config};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: repairdesk <command> [args]

Commands:
  login [username]          Log in (password from REPAIRDESK_PASSWORD or prompt)
  logout                    End the session and forget stored credentials
  whoami [--json]           Show the logged-in user
  profile                   Show your employee profile
  profile set <field> <v>   Update a profile field (username, first_name,
                            last_name, email, phone_number)
  employees                 List employees (staff only)
  get <path>                Authenticated GET against the API, prints JSON
  keep-alive [minutes]      Refresh the access token periodically until Ctrl-C
  help                      Show this message

Environment:
  REPAIRDESK_HOME           Directory for config.json and session.json
  REPAIRDESK_BASE_URL       API base URL (default http://localhost:8000/api/)
  REPAIRDESK_STORAGE        Session storage: file | keyring
  RUST_LOG                  Log filter (default warn)";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer).with_target(false))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("help");
    if matches!(command, "help" | "--help" | "-h") {
        println!("{USAGE}");
        return ExitCode::SUCCESS;
    }

    match run(command, &args[1..]).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: &str, args: &[String]) -> Result<()> {
    let mut config = Config::load()?;
    debug!(base_url = %config.base_url, storage = ?config.storage, "Config loaded");
    let ctx = AuthContext::from_config(&config)?;
    info!(command, "repairdesk starting");

    match command {
        "login" => commands::login(&ctx, &mut config, args.first().map(String::as_str)).await,
        "logout" => commands::logout(&ctx),
        "whoami" => match args {
            [] => commands::whoami(&ctx, false),
            [flag] if flag == "--json" => commands::whoami(&ctx, true),
            _ => Err(anyhow::anyhow!("Usage: repairdesk whoami [--json]")),
        },
        "profile" => match args {
            [] => commands::show_profile(&ctx).await,
            [set, field, value] if set == "set" => {
                commands::update_profile(&ctx, field, value).await
            }
            _ => Err(anyhow::anyhow!("Usage: repairdesk profile [set <field> <value>]")),
        },
        "employees" => commands::employees(&ctx).await,
        "get" => match args {
            [path] => commands::get(&ctx, path).await,
            _ => Err(anyhow::anyhow!("Usage: repairdesk get <path>")),
        },
        "keep-alive" => {
            let minutes = args.first().map(|m| m.parse::<u64>()).transpose()?;
            commands::keep_alive(&ctx, &config, minutes).await
        }
        other => Err(anyhow::anyhow!("Unknown command: {other}\n\n{USAGE}")),
    }
}

/// Print an error, with a login hint when the session is gone
fn report(error: &anyhow::Error) {
    match error.downcast_ref::<ApiError>() {
        Some(api) if api.requires_login() => {
            eprintln!("Session expired. Please run `repairdesk login` again.");
        }
        Some(ApiError::Network(_)) => {
            eprintln!("Error: unable to reach the server ({error:#})");
        }
        _ => eprintln!("Error: {error:#}"),
    }
}
