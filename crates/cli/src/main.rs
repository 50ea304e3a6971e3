use clap::{Parser, Subcommand};
use std::path::PathBuf;

use taskgate::dispatch::{DispatchError, Dispatcher};
use taskgate::gateway::{ErrorKind, ErrorResponse, TaskResponse};
use taskgate::llm::CandidateCommand;

#[derive(Parser)]
#[command(name = "taskgate")]
#[command(about = "Taskgate CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config and the bundled scripts.
    Init {
        /// Config file path (default: TASKGATE_CONFIG_PATH or ~/.taskgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the HTTP gateway (task, read and liveness endpoints).
    Gateway {
        /// Config file path (default: TASKGATE_CONFIG_PATH or ~/.taskgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 8000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Run one task in-process and print the result as JSON.
    Run {
        /// Config file path (default: TASKGATE_CONFIG_PATH or ~/.taskgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Task description, e.g. "count the Fridays in /data/dates.txt and write it to /data/fridays.txt"
        task: String,
    },

    /// Check a candidate command against the sanitizer without running it.
    Sanitize {
        /// Config file path (default: TASKGATE_CONFIG_PATH or ~/.taskgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Candidate command text, as a model would produce it
        candidate: String,
    },

    /// Print the script catalog as it is shown to the model.
    Scripts {
        /// Config file path (default: TASKGATE_CONFIG_PATH or ~/.taskgate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("taskgate {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config, task }) => match run_task(config, task).await {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => {
                log::error!("run failed: {:#}", e);
                std::process::exit(1);
            }
        },
        Some(Commands::Sanitize { config, candidate }) => match run_sanitize(config, candidate) {
            Ok(true) => {}
            Ok(false) => std::process::exit(1),
            Err(e) => {
                log::error!("sanitize failed: {:#}", e);
                std::process::exit(1);
            }
        },
        Some(Commands::Scripts { config }) => {
            if let Err(e) = run_scripts(config) {
                log::error!("scripts failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(taskgate::config::default_config_path);
    let dir = taskgate::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = taskgate::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    taskgate::gateway::run_gateway(config, path).await
}

fn dispatcher(config_path: Option<PathBuf>) -> anyhow::Result<Dispatcher> {
    let (config, path) = taskgate::config::load_config(config_path)?;
    taskgate::init::require_initialized(&path, &config)?;
    Dispatcher::from_config(&config, &path)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints the same JSON the gateway would return. Ok(false) when the task did not succeed.
async fn run_task(config_path: Option<PathBuf>, task: String) -> anyhow::Result<bool> {
    let dispatcher = dispatcher(config_path)?;
    match dispatcher.run_task(&task).await {
        Ok(result) => {
            print_json(&TaskResponse::from(&result))?;
            Ok(result.outcome.is_success())
        }
        Err(e) => {
            let kind = match &e {
                DispatchError::EmptyTask => ErrorKind::InputError,
                DispatchError::Translation(_) => ErrorKind::TranslationError,
                DispatchError::Rejected(_) => ErrorKind::SanitizationRejection,
            };
            print_json(&ErrorResponse::new(kind, e.to_string()))?;
            Ok(false)
        }
    }
}

fn run_sanitize(config_path: Option<PathBuf>, candidate: String) -> anyhow::Result<bool> {
    let dispatcher = dispatcher(config_path)?;
    match dispatcher.sanitizer().sanitize(&CandidateCommand::new(candidate)) {
        Ok(cmd) => {
            println!("{}", cmd);
            Ok(true)
        }
        Err(rejection) => {
            eprintln!("rejected: {}", rejection);
            Ok(false)
        }
    }
}

fn run_scripts(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let dispatcher = dispatcher(config_path)?;
    let sanitizer = dispatcher.sanitizer();
    print!(
        "{}",
        sanitizer
            .registry()
            .render(sanitizer.scripts_dir(), sanitizer.data_root())
    );
    Ok(())
}
