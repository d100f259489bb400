mod colors;
mod commands;

use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use vsotap::config::Config;
use vsotap::install::InstallOptions;
use vsotap::platform::Host;

#[derive(Parser)]
#[command(name = "vsotap")]
#[command(author, version, about = "Install and maintain the self-hosted agent formulae", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Installation prefix (defaults to $VSOTAP_PREFIX or $HOMEBREW_PREFIX)
    #[arg(long, global = true)]
    prefix: Option<PathBuf>,

    /// Directory holding the formula records (defaults to ./Formula)
    #[arg(long, global = true)]
    formula_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download, verify and install formulae
    Install {
        /// Formula names
        formulae: Vec<String>,

        /// Reinstall even if this version is already installed
        #[arg(long)]
        force: bool,

        /// Skip the post-install smoke tests
        #[arg(long)]
        skip_test: bool,

        /// Install even if the macOS version requirement is not met
        #[arg(long)]
        ignore_os_requirement: bool,
    },

    /// Remove installed formulae and their links
    Uninstall {
        /// Formula names
        formulae: Vec<String>,
    },

    /// Download and verify archives without installing
    Fetch {
        /// Formula names
        formulae: Vec<String>,
    },

    /// Show information about a formula
    Info {
        /// Formula name
        formula: String,
    },

    /// List installed formulae
    List,

    /// Show the post-install caveats of a formula
    Caveats {
        /// Formula name
        formula: String,
    },

    /// Run the smoke tests of an installed formula
    Test {
        /// Formula name
        formula: String,
    },

    /// Check formula records for problems
    Audit {
        /// Formula names (or all if empty)
        formulae: Vec<String>,
    },

    /// Point a formula at the newest deployed agent build
    UpdateFormula {
        /// Path to the formula file
        path: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    colors::init_colors();

    let config = Config::resolve(cli.prefix, cli.formula_dir);

    match cli.command {
        Some(Commands::Install {
            formulae,
            force,
            skip_test,
            ignore_os_requirement,
        }) => {
            let options = InstallOptions {
                host: Host::detect(),
                ignore_os_requirement,
                force,
                run_tests: !skip_test,
            };
            commands::install(&config, &formulae, options).await?;
        }
        Some(Commands::Uninstall { formulae }) => {
            commands::uninstall(&config, &formulae)?;
        }
        Some(Commands::Fetch { formulae }) => {
            commands::fetch(&config, &formulae).await?;
        }
        Some(Commands::Info { formula }) => {
            commands::info(&config, &formula)?;
        }
        Some(Commands::List) => {
            commands::list(&config)?;
        }
        Some(Commands::Caveats { formula }) => {
            commands::caveats(&config, &formula)?;
        }
        Some(Commands::Test { formula }) => {
            commands::test(&config, &formula).await?;
        }
        Some(Commands::Audit { formulae }) => {
            commands::audit(&config, &formulae)?;
        }
        Some(Commands::UpdateFormula { path }) => {
            commands::update_formula(&config, &path).await?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "vsotap", &mut std::io::stdout());
        }
        None => {
            println!("vsotap installs the self-hosted agent formulae.");
            println!("\nRun {} to see available commands.", "vsotap --help".cyan());
        }
    }

    Ok(())
}
