mod args;
mod logging;
mod op;
mod ops;
mod state;

use clap::{Parser, Subcommand};

use args::Args;
use op::Op;
use ops::{Cat, Get, Init, Ls, Put, Rm, Verify};

command_enum! {
    (Init, Init),
    (Put, Put),
    (Get, Get),
    (Cat, Cat),
    (Rm, Rm),
    (Ls, Ls),
    (Verify, Verify),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Log level: explicit flag > config file > info
    let config = state::AppState::load(args.config_path.clone())
        .map(|state| state.config)
        .ok();
    let level = args
        .log_level
        .or_else(|| config.as_ref().and_then(|c| c.log_level.parse().ok()))
        .unwrap_or(tracing::Level::INFO);
    let log_dir = config.as_ref().and_then(|c| c.log_dir.as_deref());

    let log_guard = logging::init_logging(level, log_dir);

    let ctx = op::OpContext::new(args.config_path);

    let code = match args.command.execute(&ctx).await {
        Ok(output) => {
            let output = output.to_string();
            if !output.is_empty() {
                println!("{}", output);
            }
            0
        }
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("Error: {}", e);
            1
        }
    };

    // Flush the non-blocking writers before exiting.
    drop(log_guard);
    std::process::exit(code);
}
