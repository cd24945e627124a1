use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use pairview::app::{external_conversion, system_launcher};
use pairview::config::{self, Config};
use pairview::launcher::SECONDARY_ENV;
use pairview::status::{StatusRecord, StatusStore};
use pairview::sync::Role;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("PAIRVIEW_BUILD_GIT_HASH"),
    ", ",
    env!("PAIRVIEW_BUILD_PROFILE"),
    ")"
);

#[derive(Parser)]
#[command(
    name = "pairview",
    version,
    long_version = LONG_VERSION,
    about = "Terminal image viewer that shows an export next to its converted original",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Image to display
    image: Option<PathBuf>,

    /// Run as the secondary viewer (also enabled by PAIRVIEW_SECONDARY=1)
    #[arg(long)]
    secondary: bool,

    /// Directory for status files and sync sockets
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Directory for converted images
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Log output file path (enables logging in the viewer)
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Ask the running master to show SOURCE (converted) in a secondary window
    Request {
        /// Raw original
        source: PathBuf,

        /// Where the converted image should be written
        #[arg(long)]
        exported: Option<PathBuf>,
    },
    /// Convert SOURCE to a viewable image and print its path
    Convert {
        source: PathBuf,

        /// Output path (default: <scratch_dir>/<stem>_converted.jpg)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the master, secondary and source status records
    Status,
    /// Terminate every secondary viewer
    CloseSecondaries,
}

fn init_logger(cli: &Cli) -> Result<()> {
    let level = if cli.debug { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(level);
    if let Some(log_path) = &cli.log {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("failed to open log file {}", log_path.display()))?;
        env_logger::Builder::from_env(env)
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();
    } else if cli.command.is_some() {
        env_logger::Builder::from_env(env).init();
    }
    // viewer mode + no --log → logger not initialized (no log output)
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logger(&cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    // Load config file and merge CLI overrides
    let mut cfg = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    };
    cfg.merge_cli(cli.state_dir, cli.scratch_dir);
    let config = cfg.resolve();

    let result = match cli.command {
        Some(Command::Request { source, exported }) => cmd_request(&config, &source, exported),
        Some(Command::Convert { source, output }) => cmd_convert(&config, &source, output),
        Some(Command::Status) => cmd_status(&config),
        Some(Command::CloseSecondaries) => {
            let n = system_launcher(&config).terminate_all();
            println!("terminated {n} secondary viewer(s)");
            Ok(())
        }
        None => {
            let secondary =
                cli.secondary || std::env::var_os(SECONDARY_ENV).is_some_and(|v| v == "1");
            let role = if secondary {
                Role::Secondary
            } else {
                Role::Master
            };
            pairview::viewer::run(config, role, cli.image)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn cmd_request(config: &Config, source: &Path, exported: Option<PathBuf>) -> Result<()> {
    let source = std::path::absolute(source)?;
    if !source.exists() {
        anyhow::bail!("{} does not exist", source.display());
    }
    let exported = exported.map(std::path::absolute).transpose()?;
    let store = StatusStore::new(config.source_status_path());
    store.write(&StatusRecord::source_request(Some(source), exported))?;
    info!("cmd_request: wrote {}", store.path().display());
    println!("{}", store.path().display());
    Ok(())
}

fn cmd_convert(config: &Config, source: &Path, output: Option<PathBuf>) -> Result<()> {
    let service = external_conversion(config);
    let conversion = match &output {
        Some(output) => service.ensure_viewable_to(source, output)?,
        None => service.ensure_viewable(source)?,
    };
    let path = service.run_to_completion(conversion)?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let stores = [
        ("master", config.status_path(Role::Master)),
        ("secondary", config.status_path(Role::Secondary)),
        ("source", config.source_status_path()),
    ];
    for (label, path) in stores {
        let store = StatusStore::new(path);
        println!("# {label}: {}", store.path().display());
        match store.read() {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot.record)?),
            None => println!("(none)"),
        }
    }
    Ok(())
}
