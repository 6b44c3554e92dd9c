//! composectl - inspect compose projects the way the control client sees them

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use compose_control::compose::loader::{
    find_compose_file, load_env_file, process_environment, read_config_files,
};
use compose_control::compose::{
    derive_project_name, ComposeClient, ConfigDetails, FakeComposeClient, ProjectLoader,
    YamlProjectLoader,
};
use compose_control::settings::ClientSettings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// composectl - compose project inspection
#[derive(Parser)]
#[command(name = "composectl")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Inspect compose projects the way the control client sees them", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Settings file (YAML)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, validate and print the resolved project
    Config {
        /// Compose file, may be repeated
        #[arg(short, long)]
        file: Vec<PathBuf>,
        /// Project working directory
        #[arg(long)]
        project_directory: Option<PathBuf>,
        /// Project name
        #[arg(short = 'p', long)]
        project_name: Option<String>,
        /// Env file layered over the process environment
        #[arg(long)]
        env_file: Option<PathBuf>,
        /// Enable a profile
        #[arg(long)]
        profile: Vec<String>,
        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: OutputFormat,
    },

    /// Print the project name derived from a directory
    Name {
        /// Project working directory
        dir: PathBuf,
    },

    /// Show version information
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = match &cli.settings {
        Some(path) => ClientSettings::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => ClientSettings::default(),
    }
    .with_env_overrides()?;

    match cli.command {
        Commands::Config {
            file,
            project_directory,
            project_name,
            env_file,
            profile,
            format,
        } => {
            let working_dir = match project_directory {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };

            let files = if file.is_empty() {
                let found = find_compose_file(&working_dir).with_context(|| {
                    format!("No compose file found in {}", working_dir.display())
                })?;
                vec![found]
            } else {
                file
            };

            let mut environment = process_environment();
            let env_file = env_file.or_else(|| {
                let default = working_dir.join(".env");
                default.exists().then_some(default)
            });
            if let Some(path) = &env_file {
                environment = load_env_file(path, environment)?;
            }

            let details = ConfigDetails {
                config_texts: read_config_files(&files)?,
                working_dir,
                environment,
                project_name,
                profiles: profile,
            };

            let loader = YamlProjectLoader::new(&settings.fallback_project_name);
            let project = loader.load(&details)?;

            let output = match format {
                OutputFormat::Yaml => serde_yaml::to_string(&project)?,
                OutputFormat::Json => serde_json::to_string_pretty(&project)? + "\n",
            };
            print!("{}", output);
        }

        Commands::Name { dir } => {
            println!("{}", derive_project_name(&dir, &settings.fallback_project_name));
        }

        Commands::Version => {
            let client = FakeComposeClient::with_settings(settings);
            let runtime = client.version().await?;
            println!("composectl version {}", env!("CARGO_PKG_VERSION"));
            println!("compose runtime {}", runtime);
        }
    }

    Ok(())
}
