//! `vigil` – command line entry point.
//!
//! ```text
//! vigil [hub]        run the liveness hub (default)
//! vigil node <id>    pulse as <id> and relay ORDER:<product>:<quantity> lines from stdin
//! vigil init         write ~/.vigil/config.toml with default values
//! ```
//!
//! Ctrl-C flips a shared shutdown flag; both modes stop cleanly on it.

mod config;
mod telemetry;

use std::process::ExitCode;

use colored::Colorize;
use tokio::io::BufReader;
use tokio::sync::watch;
use tracing::{error, info, warn};

use vigil_hub::HubServer;
use vigil_middleware::EventBus;
use vigil_node::{Node, NodeConfig};
use vigil_types::ClientId;

use crate::config::Config;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Hub,
    Node(ClientId),
    Init,
    Help,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command, String> {
    let mut args = args.into_iter();
    let command = match args.next().as_deref() {
        None | Some("hub") => Command::Hub,
        Some("node") => match args.next() {
            Some(id) => Command::Node(ClientId::parse(&id).map_err(|e| e.to_string())?),
            None => return Err("`node` requires a client id".to_string()),
        },
        Some("init") => Command::Init,
        Some("help" | "-h" | "--help") => Command::Help,
        Some(other) => return Err(format!("unknown command `{other}`")),
    };
    match args.next() {
        Some(extra) => Err(format!("unexpected argument `{extra}`")),
        None => Ok(command),
    }
}

fn main() -> ExitCode {
    let _otel_guard = telemetry::init_tracing("vigil");

    let command = match parse_args(std::env::args().skip(1)) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            print_usage();
            return ExitCode::from(2);
        }
    };

    if command == Command::Help {
        print_usage();
        return ExitCode::SUCCESS;
    }
    if command == Command::Init {
        return init_config();
    }

    print_banner();

    let cfg = match config::load_or_default() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_tx.send_replace(true);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; Ctrl-C will not shut down cleanly");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match command {
        Command::Node(id) => runtime.block_on(run_node(&cfg, id, shutdown_rx)),
        _ => runtime.block_on(run_hub(&cfg, shutdown_rx)),
    }
}

async fn run_hub(cfg: &Config, shutdown: watch::Receiver<bool>) -> ExitCode {
    println!(
        "  Hub on {}:{}  deadline {} ms  poll {} ms\n",
        cfg.bind_host,
        cfg.port.to_string().bold(),
        cfg.deadline_ms,
        cfg.poll_interval_ms
    );

    let mut server = HubServer::new(EventBus::default())
        .with_host(cfg.bind_host)
        .with_port(cfg.port)
        .with_monitor(cfg.monitor())
        .with_record_policy(cfg.record_policy);
    if let Some(max) = cfg.max_connections {
        server = server.with_max_connections(max);
    }

    match server.run_until(shutdown).await {
        Ok(()) => {
            println!("{}", "  ✓ Hub stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "hub failed");
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run_node(cfg: &Config, id: ClientId, shutdown: watch::Receiver<bool>) -> ExitCode {
    println!(
        "  Node {} → {}  pulse every {} ms",
        id.as_str().bold(),
        cfg.hub_addr,
        cfg.pulse_interval_ms
    );
    println!(
        "  Type {} lines to place orders.\n",
        "ORDER:<product>:<quantity>".bold().cyan()
    );

    let node = Node::new(NodeConfig {
        id,
        hub_addr: cfg.hub_addr.clone(),
        pulse_interval: cfg.pulse_interval(),
    });
    let orders = BufReader::new(tokio::io::stdin());

    match node.run(Some(orders), shutdown).await {
        Ok(stats) => {
            info!(
                pulses = stats.pulses,
                orders = stats.orders,
                rejected = stats.rejected,
                "node finished"
            );
            println!("{}", "  ✓ Node stopped.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "node failed");
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn init_config() -> ExitCode {
    let path = config::config_path();
    if path.exists() {
        println!("  Config already present at {}", path.display().to_string().bold());
        return ExitCode::SUCCESS;
    }
    match config::save(&Config::default()) {
        Ok(()) => {
            println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {e}", "Error saving config".red());
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    println!("{}", "Usage:".bold());
    println!("  vigil [hub]        run the liveness hub (default)");
    println!("  vigil node <id>    pulse as <id>, relay order lines from stdin");
    println!("  vigil init         write ~/.vigil/config.toml with defaults");
    println!("  vigil help         show this message");
}

fn print_banner() {
    println!();
    println!("{}", r#"         _       _ __"#.bold().cyan());
    println!("{}", r#"  _   __(_)___ _(_) /"#.bold().cyan());
    println!("{}", r#" | | / / / __ `/ / / "#.bold().cyan());
    println!("{}", r#" | |/ / / /_/ / / /  "#.bold().cyan());
    println!("{}", r#" |___/_/\__, /_/_/   "#.bold().cyan());
    println!("{}", r#"       /____/        "#.bold().cyan());
    println!();
    println!("  {}", "Liveness hub for connected producers".dimmed());
    println!();
}
