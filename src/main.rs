use anyhow::Result;
use clap::{Parser, Subcommand};
use packforge::logging::{self, LogFormat};
use packforge_common::PackageType;
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "packforge")]
#[command(version, about = "Review, build and publish Debian packages of store apps")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to packforge.toml. Defaults to ./packforge.toml, then the user config directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Format of log lines on stderr
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Also write JSON logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Review and build a package for every target of its matrix
    Build {
        /// Repository URL or local source directory
        #[arg(long)]
        repo: String,

        /// Branch, tag or commit to build
        #[arg(long = "ref")]
        reference: String,

        /// Reverse-domain package name, e.g. com.github.someone.app
        #[arg(long)]
        name: String,

        /// Version being released
        #[arg(long)]
        version: String,

        /// Package type: app, library, system-app
        #[arg(long = "type", default_value = "app")]
        package_type: PackageType,

        /// Build for this distribution only instead of resolving the matrix
        #[arg(long)]
        distribution: Option<String>,

        /// Print the run reports as JSON
        #[arg(long)]
        json: bool,

        /// Skip publishing and issue reporting
        #[arg(long)]
        no_direct: bool,

        /// Maximum concurrent pipelines. Overrides packforge.toml
        #[arg(long)]
        max_parallel: Option<usize>,
    },
    /// Show the build targets resolved from a repository's branches
    Matrix {
        /// Repository URL or local source directory
        #[arg(long)]
        repo: String,

        /// Print targets as JSON
        #[arg(long)]
        json: bool,
    },
    /// View, validate or create configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration
    Validate,
    /// Write a default packforge.toml to the working directory
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(cli.log_format, cli.verbose, cli.log_dir.as_deref())?;

    match &cli.command {
        Commands::Build {
            repo,
            reference,
            name,
            version,
            package_type,
            distribution,
            json,
            no_direct,
            max_parallel,
        } => {
            let args = cmd::BuildArgs {
                repo: repo.clone(),
                reference: reference.clone(),
                name: name.clone(),
                version: version.clone(),
                package_type: *package_type,
                distribution: distribution.clone(),
                json: *json,
                direct: !*no_direct,
                max_parallel: *max_parallel,
            };
            let passed = cmd::cmd_build(&cli, args).await?;
            if !passed {
                std::process::exit(1);
            }
        }
        Commands::Matrix { repo, json } => cmd::cmd_matrix(&cli, repo, *json).await?,
        Commands::Config { command } => cmd::cmd_config(&cli, command.clone())?,
    }

    Ok(())
}
