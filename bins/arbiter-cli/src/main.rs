mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arbiter-cli")]
#[command(about = "Arbiter CLI - Judge submissions locally and manage sandbox images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Judge a source file against a JSON list of test cases
    Run {
        /// Language identifier (python, javascript, java, cpp, or an alias)
        #[arg(short, long)]
        language: String,

        /// Path to the submission
        #[arg(short, long)]
        source: PathBuf,

        /// Path to a JSON file: [{"input": "...", "expectedOutput": "..."}]
        #[arg(short, long)]
        tests: PathBuf,

        /// Wall-clock limit per test case
        #[arg(long)]
        time_limit_ms: Option<u64>,

        /// Memory ceiling per sandbox
        #[arg(long)]
        memory_limit_mb: Option<u64>,

        /// Test cases run concurrently (1 = sequential)
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Language profiles file (defaults to the built-in table)
        #[arg(long)]
        languages_file: Option<PathBuf>,
    },

    /// List enabled language profiles
    Languages {
        #[arg(long)]
        languages_file: Option<PathBuf>,
    },

    /// Pull sandbox images ahead of time
    Pull {
        /// Only this language (defaults to every enabled language)
        #[arg(short, long)]
        language: Option<String>,

        #[arg(long)]
        languages_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // engine logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            language,
            source,
            tests,
            time_limit_ms,
            memory_limit_mb,
            parallel,
            languages_file,
        } => {
            let all_passed = commands::run(commands::RunOptions {
                language,
                source,
                tests,
                time_limit_ms,
                memory_limit_mb,
                parallel,
                languages_file,
            })
            .await?;

            if !all_passed {
                std::process::exit(1);
            }
        }
        Commands::Languages { languages_file } => {
            commands::list_languages(languages_file.as_deref())?;
        }
        Commands::Pull {
            language,
            languages_file,
        } => {
            commands::pull_images(language.as_deref(), languages_file.as_deref()).await?;
        }
    }

    Ok(())
}
