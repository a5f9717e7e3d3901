mod commands;
mod output;
mod vars;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use output::OutputFormat;
use stackflow_core::{Command, Differ};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(about = "Create, update and tear down dependent infrastructure stacks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalOpts {
    /// Turn on debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Project directory (defaults to searching upward for config/)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Result format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Disable coloured output
    #[arg(long, global = true)]
    pub no_colour: bool,

    /// Template variable, e.g. --var region=eu-west-1 or --var db.size=large
    #[arg(long = "var", global = true, value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// YAML file of template variables; may be repeated
    #[arg(long = "var-file", global = true, value_name = "FILE")]
    pub var_files: Vec<PathBuf>,

    /// Deep merge nested keys of --var-file files instead of replacing them
    #[arg(long, global = true)]
    pub merge_keys: bool,

    /// Run only the addressed stacks, in a single batch, ignoring dependencies
    #[arg(long, global = true)]
    pub ignore_dependencies: bool,

    /// Maximum stacks running at once within a batch (0 = unbounded)
    #[arg(long, global = true, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Apply changes without asking for confirmation
    #[arg(short, long, global = true)]
    pub yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create stacks (fails for stacks that already exist)
    Create(Target),
    /// Update existing stacks
    Update(Target),
    /// Create, update or recreate stacks depending on their remote status
    Launch(Target),
    /// Delete stacks, dependents first
    Delete(Target),
    /// Print the rendered template of each stack
    Generate(Target),
    /// Validate templates with the backend
    Validate(Target),
    /// Show differences between local and deployed stacks
    Diff(DiffArgs),
    /// Show the remote status of each stack
    #[command(alias = "describe")]
    Status(Target),
    /// Print a cost estimate URL for each stack
    EstimateCost(Target),
    /// Print the template each stack was deployed with
    FetchRemoteTemplate(Target),
    /// Print the backend name of each stack
    StackName(Target),
    /// Print the outputs of each stack
    ListOutputs(Target),
    /// Show version information
    Version,
}

/// Stacks to act on
#[derive(Args, Debug, Clone)]
struct Target {
    /// Stack identity (network/vpc), group (network) or . for every stack
    #[arg(default_value = ".")]
    path: String,
}

#[derive(Args, Debug, Clone)]
struct DiffArgs {
    #[command(flatten)]
    target: Target,

    /// How templates are compared
    #[arg(short = 'D', long, value_enum, default_value_t = DifferKind::Text)]
    differ: DifferKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DifferKind {
    /// Unified diff of the template text
    Text,
    /// Added, removed and changed keys of the parsed templates
    Structural,
}

impl From<DifferKind> for Differ {
    fn from(kind: DifferKind) -> Self {
        match kind {
            DifferKind::Text => Differ::Text,
            DifferKind::Structural => Differ::Structural,
        }
    }
}

impl Commands {
    fn plan_target(&self) -> Option<(Command, &str)> {
        let (command, target) = match self {
            Commands::Create(t) => (Command::Create, t),
            Commands::Update(t) => (Command::Update, t),
            Commands::Launch(t) => (Command::Launch, t),
            Commands::Delete(t) => (Command::Delete, t),
            Commands::Generate(t) => (Command::Generate, t),
            Commands::Validate(t) => (Command::Validate, t),
            Commands::Diff(d) => (Command::Diff, &d.target),
            Commands::Status(t) => (Command::Describe, t),
            Commands::EstimateCost(t) => (Command::EstimateCost, t),
            Commands::FetchRemoteTemplate(t) => (Command::FetchRemoteTemplate, t),
            Commands::StackName(t) => (Command::StackName, t),
            Commands::ListOutputs(t) => (Command::ListOutputs, t),
            Commands::Version => return None,
        };
        Some((command, target.path.as_str()))
    }

    fn differ(&self) -> Differ {
        match self {
            Commands::Diff(d) => d.differ.into(),
            _ => Differ::default(),
        }
    }
}

fn init_logging(debug: bool, no_colour: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_ansi(!no_colour)
        .with_target(debug)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.debug, cli.global.no_colour);
    if cli.global.no_colour {
        colored::control::set_override(false);
    }

    let Some((command, path)) = cli.command.plan_target() else {
        println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    };

    let differ = cli.command.differ();
    match commands::run::handle(&cli.global, command, path, differ).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}
