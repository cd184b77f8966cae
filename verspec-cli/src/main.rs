use clap::Parser;
use tracing_subscriber::EnvFilter;

mod args;
mod cmd;
mod commands;
mod exit_codes;
mod output;

pub use args::*;
use commands::Command;

#[derive(Debug, Parser)]
#[command(name = "verspec", version, about = "Versioned HTTP spec runner")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to create tokio runtime: {e}");
            std::process::exit(exit_codes::FAILED);
        }
    };

    let exit_code = rt.block_on(run_command(cli.global, cli.command));
    std::process::exit(exit_code);
}

async fn run_command(global: GlobalArgs, command: Command) -> i32 {
    match command {
        Command::Materialize {
            versions,
            dry_run,
            clean,
        } => cmd::materialize::materialize_cmd(&global, &versions, dry_run, clean),
        Command::Run { selection, exec } => cmd::run::run_cmd(&global, &selection, &exec).await,
        Command::Plan { selection } => cmd::plan::plan_cmd(&global, &selection),
        Command::Validate { path } => cmd::validate::validate_cmd(&global, &path),
    }
}
