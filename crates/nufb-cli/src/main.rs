//! Nuvola flatpak builder CLI.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nufb_config::{SystemConfig, config_path, load_system_config};
use nufb_scheduler::{BuildOptions, ExportPolicy};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::build::Profile;

#[derive(Parser)]
#[command(name = "nufb", version)]
#[command(about = "Build and publish Nuvola Apps flatpaks", long_about = None)]
struct Cli {
    /// Path to the system configuration [default: $NUFB_CONFIG or nufb.kdl]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build Nuvola CDK
    Cdk(BuildArgs),
    /// Build Nuvola ADK
    Adk(BuildArgs),
    /// Build Nuvola Base
    Base(BuildArgs),
    /// Build Nuvola
    Nuvola(BuildArgs),
    /// Build a single app
    App {
        /// App name, e.g. deezer
        name: String,
        #[command(flatten)]
        args: BuildArgs,
    },
    /// Build all apps configured for the branch
    Apps(BatchArgs),
    /// Build the SDKs, the runtime, Nuvola and all apps
    All(BatchArgs),
    /// Update the repository summary and metadata
    UpdateRepo,
    /// Prune old commits from the repository
    PruneRepo {
        /// Number of commits to keep for each ref
        #[arg(long)]
        depth: u32,
    },
    /// Load a manifest, apply the stage/keep rewrite and print the result
    Validate {
        /// Path to the manifest file
        manifest: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
struct BuildArgs {
    /// Branch to build
    #[arg(long, default_value = "master")]
    branch: String,

    /// Rebuild and export even if nothing changed
    #[arg(long, conflicts_with = "no_export")]
    export: bool,

    /// Do not export the build result
    #[arg(long)]
    no_export: bool,

    /// Install the build result for the current user
    #[arg(long)]
    install: bool,

    /// Keep build directories even if the build succeeds
    #[arg(long)]
    keep_build_dirs: bool,

    /// Delete build directories even if the build fails
    #[arg(long)]
    delete_build_dirs: bool,
}

impl BuildArgs {
    fn options(&self) -> BuildOptions {
        BuildOptions {
            export: ExportPolicy::from_flags(self.export, self.no_export),
            install: self.install,
            keep_build_dirs: self.keep_build_dirs,
            delete_build_dirs: self.delete_build_dirs,
            ..BuildOptions::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
struct BatchArgs {
    #[command(flatten)]
    build: BuildArgs,

    /// Maximum number of apps built at once [default: from config, or all]
    #[arg(long)]
    concurrency: Option<usize>,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn load_config(explicit: Option<&Path>) -> Result<SystemConfig> {
    let path = config_path(explicit);
    load_system_config(&path)
        .await
        .with_context(|| format!("Failed to load configuration: {}", path.display()))
}

async fn profile(explicit: Option<&Path>, profile: Profile, args: BuildArgs) -> Result<()> {
    let config = load_config(explicit).await?;
    commands::build::profile(&config, profile, &args.branch, args.options()).await
}

async fn run(cli: Cli) -> Result<()> {
    let explicit = cli.config.as_deref();

    match cli.command {
        Commands::Cdk(args) => profile(explicit, Profile::Cdk, args).await?,
        Commands::Adk(args) => profile(explicit, Profile::Adk, args).await?,
        Commands::Base(args) => profile(explicit, Profile::Base, args).await?,
        Commands::Nuvola(args) => profile(explicit, Profile::Nuvola, args).await?,
        Commands::App { name, args } => {
            let config = load_config(explicit).await?;
            commands::build::app(&config, &name, &args.branch, args.options()).await?;
        }
        Commands::Apps(BatchArgs { build, concurrency }) => {
            let config = load_config(explicit).await?;
            commands::build::apps(&config, &build.branch, build.options(), concurrency).await?;
        }
        Commands::All(BatchArgs { build, concurrency }) => {
            let config = load_config(explicit).await?;
            commands::build::all(&config, &build.branch, build.options(), concurrency).await?;
        }
        Commands::UpdateRepo => {
            let config = load_config(explicit).await?;
            commands::repo::update(&config).await?;
        }
        Commands::PruneRepo { depth } => {
            let config = load_config(explicit).await?;
            commands::repo::prune(&config, depth).await?;
        }
        // Needs no system configuration.
        Commands::Validate { manifest } => commands::validate(&manifest).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli).await
}
