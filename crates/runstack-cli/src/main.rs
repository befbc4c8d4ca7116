use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

use commands::{GraphFormat, OutputFormat, Workspace};

#[derive(Parser)]
#[command(
    name = "runstack",
    about = "runstack: declare a secret-backed managed service stack",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Stack file
    #[arg(short, long, global = true, default_value = "stack.toml")]
    config: PathBuf,

    /// Directory holding the local ledger
    #[arg(long, global = true, default_value = ".runstack")]
    state_dir: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a stack file scaffold.
    ///
    /// The secret value is read from $STACK_SECRET at evaluation time.
    Init {
        /// Stack name (also the image name)
        name: String,
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "us-central1")]
        region: String,
        /// Overwrite an existing stack file
        #[arg(long)]
        force: bool,
    },
    /// Check the stack file and report ordering gaps
    Validate,
    /// Print the resource graph
    Graph {
        #[arg(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
        /// Include secret payloads in JSON output (for the engine)
        #[arg(long)]
        reveal_secrets: bool,
    },
    /// Diff the stack against the ledger
    Plan {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Record the stack as committed
    Commit,
    /// Show the committed outputs
    Outputs {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show commit and secret version history
    History {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("runstack=info".parse()?),
        )
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let workspace = Workspace::new(cli.config, cli.state_dir);

    match cli.command {
        Commands::Init {
            name,
            project,
            region,
            force,
        } => commands::stack::init(&workspace, &name, &project, &region, force),
        Commands::Validate => commands::stack::validate(&workspace).await,
        Commands::Graph {
            format,
            reveal_secrets,
        } => commands::stack::graph(&workspace, format, reveal_secrets).await,
        Commands::Plan { format } => commands::deploy::plan(&workspace, format).await,
        Commands::Commit => commands::deploy::commit(&workspace).await,
        Commands::Outputs { format } => commands::ledger::outputs(&workspace, format),
        Commands::History { format } => commands::ledger::history(&workspace, format),
    }
}
