mod commands;
mod config;

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use commands::{Context, EXIT_FAILURE, EXIT_MANIFEST_ERROR, EXIT_RESOLUTION_ERROR};
use config::PalletConfig;
use pallet_core::{install_signal_handler, CancelToken};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "pallet",
    version,
    about = "Dependency resolution and phased rollout for cluster packages"
)]
struct Cli {
    /// Path to a pallet.toml configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Versions of the platforms the package is installed on.
#[derive(Debug, Args)]
struct EnvironmentArgs {
    /// Kubernetes version of the target cluster.
    #[arg(long, value_name = "VERSION")]
    kubernetes_version: Option<String>,
    /// OpenShift version, when the cluster runs OpenShift.
    #[arg(long, value_name = "VERSION")]
    openshift_version: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse and validate a package manifest.
    Validate {
        #[arg(default_value = "manifest.yaml")]
        manifest: PathBuf,
        /// Also assign the objects in this YAML stream to phases.
        #[arg(long)]
        objects: Option<PathBuf>,
    },
    /// Resolve dependencies and write the lock file.
    Resolve {
        #[arg(default_value = "manifest.yaml")]
        manifest: PathBuf,
        /// Use the existing lock file instead of resolving.
        #[arg(long, default_value_t = false)]
        locked: bool,
        /// Do not write the lock file.
        #[arg(long, default_value_t = false)]
        no_write: bool,
        #[command(flatten)]
        env: EnvironmentArgs,
    },
    /// Check whether the package may be installed as the given instance.
    Check {
        #[arg(default_value = "manifest.yaml")]
        manifest: PathBuf,
        /// Instance as NAME or NAMESPACE/NAME. Defaults to the package name.
        #[arg(long)]
        instance: Option<String>,
        /// An instance already installed in the cluster (repeatable).
        #[arg(long = "existing-instance", value_name = "INSTANCE")]
        existing: Vec<String>,
        #[command(flatten)]
        env: EnvironmentArgs,
    },
    /// Show how objects are grouped into rollout phases.
    Plan {
        #[arg(default_value = "manifest.yaml")]
        manifest: PathBuf,
        #[arg(long)]
        objects: Option<PathBuf>,
    },
    /// Reconcile the package against an in-memory cluster.
    Rollout {
        #[arg(default_value = "manifest.yaml")]
        manifest: PathBuf,
        #[arg(long)]
        objects: Option<PathBuf>,
        /// Instance as NAME or NAMESPACE/NAME. Defaults to the package name.
        #[arg(long)]
        instance: Option<String>,
        /// An instance already installed in the cluster (repeatable).
        #[arg(long = "existing-instance", value_name = "INSTANCE")]
        existing: Vec<String>,
        /// Phase class handled by an external handler that reports available.
        #[arg(long, value_name = "CLASS")]
        delegate: Vec<String>,
        /// Maximum number of reconciliation passes.
        #[arg(long, default_value_t = 1)]
        passes: u32,
        /// Use the existing lock file instead of resolving.
        #[arg(long, default_value_t = false)]
        locked: bool,
        /// Do not write the lock file.
        #[arg(long, default_value_t = false)]
        no_write: bool,
        #[command(flatten)]
        env: EnvironmentArgs,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

impl Commands {
    fn environment_args(&self) -> Option<&EnvironmentArgs> {
        match self {
            Commands::Resolve { env, .. }
            | Commands::Check { env, .. }
            | Commands::Rollout { env, .. } => Some(env),
            _ => None,
        }
    }
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe") || msg.contains("failed printing to stdout") {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PALLET_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    match dispatch(cli) {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn dispatch(cli: Cli) -> Result<u8, String> {
    let config = PalletConfig::discover(cli.config.as_deref())?;
    let environment = match cli.command.environment_args() {
        Some(env) => config.environment(
            env.kubernetes_version.as_deref(),
            env.openshift_version.as_deref(),
        ),
        None => config.environment(None, None),
    };
    let cancel = CancelToken::new();
    install_signal_handler(cancel.clone());
    let ctx = Context {
        config,
        environment,
        cancel,
        json: cli.json,
    };

    match cli.command {
        Commands::Validate { manifest, objects } => {
            commands::validate::run(&ctx, &manifest, objects.as_deref())
        }
        Commands::Resolve {
            manifest,
            locked,
            no_write,
            env: _,
        } => commands::resolve::run(&ctx, &manifest, locked, !no_write),
        Commands::Check {
            manifest,
            instance,
            existing,
            env: _,
        } => commands::check::run(&ctx, &manifest, instance.as_deref(), &existing),
        Commands::Plan { manifest, objects } => {
            commands::plan::run(&ctx, &manifest, objects.as_deref())
        }
        Commands::Rollout {
            manifest,
            objects,
            instance,
            existing,
            delegate,
            passes,
            locked,
            no_write,
            env: _,
        } => commands::rollout::run(
            &ctx,
            &commands::rollout::RolloutArgs {
                manifest,
                objects,
                instance,
                existing,
                delegate,
                passes,
                locked,
                write_lock: !no_write,
            },
        ),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    }
}

fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("manifest error:") || msg.starts_with("plan error:") {
        EXIT_MANIFEST_ERROR
    } else if msg.starts_with("lock error:") || msg.starts_with("repository error:") {
        EXIT_RESOLUTION_ERROR
    } else {
        EXIT_FAILURE
    }
}
