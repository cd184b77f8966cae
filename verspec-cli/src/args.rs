use std::path::PathBuf;

use clap::Args;

use crate::output::OutputFormat;

#[derive(Debug, Args, Clone)]
pub struct GlobalArgs {
    /// Project root holding `verspec.yaml` and one directory per version.
    #[arg(long, default_value = ".", global = true)]
    pub root: PathBuf,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args, Clone)]
pub struct OutputArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Args, Clone)]
pub struct SelectionArgs {
    /// A path under the version directory (`auth/`, `auth/login.spec`) or a
    /// tag expression (`smoke && !slow`).
    pub target: String,
    #[arg(long)]
    pub version: String,
    /// Additional tag expression; repeated values are AND-ed.
    #[arg(long = "tag", value_name = "EXPR")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventsMode {
    None,
    /// JSON lines on stdout.
    Stdout,
}

#[derive(Debug, Args, Clone)]
pub struct ExecArgs {
    /// Run every block that can run instead of stopping at the first failure.
    #[arg(long)]
    pub keep_going: bool,
    /// Falls back to `VERSPEC_BASE_URL`, then to `base_url` in `verspec.yaml`.
    #[arg(long)]
    pub base_url: Option<String>,
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Per-request timeout in milliseconds.
    #[arg(long, value_name = "MS")]
    pub timeout: Option<u64>,
    #[arg(long, value_enum, default_value_t = EventsMode::None)]
    pub events: EventsMode,
}
