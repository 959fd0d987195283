//! `brewlink` – chat-to-appliance bridge.
//!
//! Startup sequence:
//!
//! 1. Tracing (see `brewlink_runtime::telemetry`).
//! 2. Configuration: `--config <path>`, `$BREWLINK_CONFIG` or
//!    `~/.brewlink/config.toml`, then `BREWLINK_*` overrides, then
//!    validation. A bad file or invalid settings stop the process here.
//! 3. State store, event bus and status ingestion task.
//! 4. Broker transport. An unreachable broker is logged and retried in the
//!    background; it never stops startup.
//! 5. Conversational client, dispatcher and HTTP surface.
//!
//! Ctrl-C stops the HTTP surface, then the transport and ingestion tasks.
//!
//! `--init-config` writes the effective configuration to the config path
//! and exits.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use brewlink_cockpit::CockpitServer;
use brewlink_middleware::{EventBus, MqttTransport};
use brewlink_runtime::{ChatDriver, Dispatcher, init_tracing};
use brewlink_state::{MaintenancePolicy, StateStore, StatusIngestor};
use brewlink_types::BrewError;
use colored::Colorize;
use tracing::{error, info, warn};

use crate::config::Config;

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    init_config: bool,
    help: bool,
}

fn parse_args<I>(args: I) -> Result<Args, String>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().ok_or("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--init-config" => parsed.init_config = true,
            "--help" | "-h" => parsed.help = true,
            other => return Err(format!("unknown argument `{other}`")),
        }
    }
    Ok(parsed)
}

fn main() -> ExitCode {
    let guard = init_tracing("brewlink");
    if guard.is_exporting() {
        info!("exporting spans over OTLP");
    }

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_usage();
            return ExitCode::from(2);
        }
    };
    if args.help {
        print_usage();
        return ExitCode::SUCCESS;
    }

    print_banner();

    let path = config::config_path(args.config);
    let cfg = match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "refusing to start");
            eprintln!("  {} {e}", "✗".red().bold());
            return ExitCode::FAILURE;
        }
    };

    if args.init_config {
        return match config::save_to(&cfg, &path) {
            Ok(()) => {
                println!("  {} Config written to {}", "✓".green().bold(), path.display().to_string().bold());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("  {} {e}", "✗".red().bold());
                ExitCode::FAILURE
            }
        };
    }

    // Created after init_tracing: the OTLP exporter is built outside any runtime.
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => {
            println!("  {} brewlink stopped.", "✓".green().bold());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "fatal error");
            eprintln!("  {} {e}", "✗".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: &std::path::Path) -> Result<Config, BrewError> {
    let mut cfg = match config::load_from(path)? {
        Some(cfg) => {
            info!(path = %path.display(), "config loaded");
            cfg
        }
        None => {
            info!(path = %path.display(), "no config file; using defaults");
            Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

async fn run(cfg: Config) -> Result<(), BrewError> {
    let store = StateStore::new(MaintenancePolicy::from_thresholds(cfg.maintenance));
    let bus = EventBus::default();
    let ingestor = StatusIngestor::new(store.clone()).spawn(&bus);

    let settings = cfg.mqtt.settings();
    info!(
        host = %settings.host,
        port = settings.port,
        command_topic = %settings.command_topic,
        status_topic = %settings.status_topic,
        "connecting to broker"
    );
    let (transport, transport_task) = MqttTransport::connect(settings, bus)?;
    match transport.wait_connected(cfg.mqtt.connect_timeout()).await {
        Ok(()) => info!("broker connected"),
        Err(e) => warn!(error = %e, "broker not reachable yet; retrying in the background"),
    }

    if cfg.chat.api_key.is_empty() {
        warn!("chat.api_key is not set; conversational requests will likely be refused");
    }
    let chat = ChatDriver::new(
        cfg.chat.base_url.clone(),
        cfg.chat.api_key.clone(),
        cfg.chat.user.clone(),
        cfg.chat.timeout(),
    )
    .map_err(BrewError::from)?;

    let dispatcher = Arc::new(Dispatcher::new(
        cfg.commands.interpreter(),
        Arc::new(transport),
        Arc::new(chat),
        store,
    ));

    let server = CockpitServer::new(dispatcher)
        .with_bind(cfg.http.bind)
        .with_port(cfg.http.port);
    println!(
        "  {} Chat UI on {}  (Ctrl-C to stop)",
        "✓".green().bold(),
        format!("http://{}", server.addr()).bold().cyan()
    );
    let served = server.run(shutdown_signal()).await;

    transport_task.abort();
    ingestor.abort();
    served
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
            info!("shutdown requested");
        }
        Err(e) => {
            warn!(error = %e, "failed to install Ctrl-C handler; running until killed");
            std::future::pending::<()>().await;
        }
    }
}

fn print_usage() {
    println!("Usage: brewlink [--config <path>] [--init-config]");
    println!();
    println!("  -c, --config <path>  Config file (default: $BREWLINK_CONFIG or ~/.brewlink/config.toml)");
    println!("      --init-config    Write the effective config to the config path and exit");
    println!("  -h, --help           Show this help");
}

fn print_banner() {
    println!();
    println!("{}", r#"   __                    ___      __  "#.bold().yellow());
    println!("{}", r#"  / /  _______ _    __  / (_)__  / /__"#.bold().yellow());
    println!("{}", r#" / _ \/ __/ -_) |/|/ / / / / _ \/  '_/"#.bold().yellow());
    println!("{}", r#"/_.__/_/  \__/|__,__/ /_/_/_//_/_/\_\ "#.bold().yellow());
    println!();
    println!("  {} {}", "brewlink".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Chat-controlled coffee maker bridge");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, String> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn no_arguments_means_defaults() {
        assert_eq!(args(&[]).unwrap(), Args::default());
    }

    #[test]
    fn config_path_and_flags() {
        let parsed = args(&["--config", "/etc/brewlink.toml", "--init-config"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("/etc/brewlink.toml")));
        assert!(parsed.init_config);
        assert!(args(&["-h"]).unwrap().help);
    }

    #[test]
    fn bad_arguments_are_reported() {
        assert!(args(&["--config"]).is_err());
        assert!(args(&["--verbose"]).is_err());
    }

    #[test]
    fn invalid_config_file_stops_startup() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[mqtt]\nkeep_alive_secs = 1\n").unwrap();
        assert!(matches!(load_config(&path), Err(BrewError::Config(_))));
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.mqtt.command_topic, "cafeteira/comando");
    }
}
