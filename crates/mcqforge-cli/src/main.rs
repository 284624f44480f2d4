//! mcqforge CLI: the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};

use mcqforge_core::model::Strategy;

mod commands;

#[derive(Parser)]
#[command(
    name = "mcqforge",
    version,
    about = "Validated multiple-choice questions from a local LLM"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate questions for one or more topics
    Generate {
        /// Topic to write questions about (repeat for several topics)
        #[arg(long = "topic", required = true)]
        topics: Vec<String>,

        /// Questions wanted per topic
        #[arg(long, default_value = "1")]
        count: usize,

        /// Prompting strategy: single or batch (default: from config)
        #[arg(long)]
        strategy: Option<Strategy>,

        /// Output format
        #[arg(long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Write questions to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Directory to save per-topic run reports (JSON)
        #[arg(long)]
        report: Option<PathBuf>,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Send a raw prompt to the model and print its reply
    Prompt {
        /// Prompt text
        #[arg(long)]
        text: String,

        /// Maximum tokens to generate
        #[arg(long, default_value = "512")]
        max_tokens: u32,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check that the configured model can be loaded
    Check {
        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create a starter config file
    Init,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mcqforge=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Generate {
            topics,
            count,
            strategy,
            format,
            output,
            report,
            config,
        } => {
            commands::generate::execute(topics, count, strategy, format, output, report, config)
                .await
        }
        Commands::Prompt {
            text,
            max_tokens,
            config,
        } => commands::prompt::execute(text, max_tokens, config).await,
        Commands::Check { config } => commands::check::execute(config).await,
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
