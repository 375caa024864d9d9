mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_MANIFEST_ERROR, EXIT_STORE_ERROR};
use loam_core::{install_signal_handler, Engine, LoamConfig};
use loam_runtime::ControllerRegistry;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "loam",
    version,
    about = "Reconciling orchestrator for local development environments"
)]
struct Cli {
    /// Path to the loam store directory [default: from config, else ~/.local/share/loam].
    #[arg(long, global = true)]
    store: Option<String>,

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

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or update a stack from a manifest and reconcile it.
    Apply {
        /// Path to the stack manifest.
        #[arg(default_value = "loam.toml")]
        manifest: PathBuf,
    },
    /// Reconcile a whole stack, or one of its components.
    Reconcile {
        /// Stack name or id.
        stack: String,
        /// Component name or id. Reconciles every top-level component if omitted.
        component: Option<String>,
    },
    /// Dispose a component and shut its subtree down.
    Rm {
        /// Stack name or id.
        stack: String,
        /// Component name or id.
        component: String,
    },
    /// Ask a component's controller to re-read its resources.
    Refresh {
        /// Stack name or id.
        stack: String,
        /// Component name or id.
        component: String,
    },
    /// List stacks, or the component tree of one stack.
    Ls {
        /// Stack name or id.
        stack: Option<String>,
    },
    /// Show the order in which a stack's top-level components are reconciled.
    Order {
        /// Stack name or id.
        stack: String,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let config = match LoamConfig::load_default() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let default_filter = if cli.trace {
        "trace".to_owned()
    } else if cli.verbose {
        "debug".to_owned()
    } else {
        config.log.clone().unwrap_or_else(|| "warn".to_owned())
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LOAM_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let result = run(cli, &config);

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("manifest error:")
                || msg.starts_with("failed to parse manifest")
                || msg.starts_with("failed to read manifest")
            {
                EXIT_MANIFEST_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("store lock:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli, config: &LoamConfig) -> Result<u8, String> {
    let Cli {
        store,
        json,
        verbose,
        command,
        ..
    } = cli;
    if let Commands::Completions { shell } = command {
        return commands::completions::run::<Cli>(shell);
    }

    let store_path = match store.or_else(|| std::env::var("LOAM_STORE").ok()) {
        Some(path) => expand_tilde(&path),
        None => config.store_root().map_err(|e| e.to_string())?,
    };
    debug!("using store at {}", store_path.display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start async runtime: {e}"))?;

    let cancel = CancellationToken::new();
    install_signal_handler(cancel.clone());
    let engine = Engine::open(&store_path, ControllerRegistry::builtin())
        .map_err(|e| e.to_string())?
        .with_cancellation(cancel);
    let ctx = commands::Context {
        engine: &engine,
        store_path: &store_path,
        json,
    };

    runtime.block_on(async {
        match command {
            Commands::Apply { manifest } => commands::apply::run(&ctx, &manifest).await,
            Commands::Reconcile { stack, component } => {
                commands::reconcile::run(&ctx, &stack, component.as_deref()).await
            }
            Commands::Rm { stack, component } => commands::rm::run(&ctx, &stack, &component).await,
            Commands::Refresh { stack, component } => {
                commands::refresh::run(&ctx, &stack, &component).await
            }
            Commands::Ls { stack } => commands::ls::run(&ctx, stack.as_deref()),
            Commands::Order { stack } => commands::order::run(&ctx, &stack, verbose),
            Commands::Completions { .. } => Ok(commands::EXIT_SUCCESS),
        }
    })
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
