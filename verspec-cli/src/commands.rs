use std::path::PathBuf;

use clap::Subcommand;

use crate::args::*;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write the generated files of each version from its parent chain.
    Materialize {
        /// Versions to write; all of them when omitted.
        versions: Vec<String>,
        #[arg(long)]
        dry_run: bool,
        /// Delete generated files that no longer belong to their version.
        #[arg(long)]
        clean: bool,
    },
    /// Run the selected blocks and their dependencies against a live service.
    Run {
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        exec: ExecArgs,
    },
    /// Print the execution order without sending requests.
    Plan {
        #[command(flatten)]
        selection: SelectionArgs,
    },
    /// Parse a single spec file.
    Validate { path: PathBuf },
}
