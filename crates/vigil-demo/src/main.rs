use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use vigil_config::{resolve_config_path, VigilConfig};
use vigil_debugger::{Debugger, DebuggerOptions};

mod shop;

use crate::shop::{Outcome, Shop};

/// Order-processing loop with Vigil probes.
///
/// Connect a WebSocket client to the printed address and send
/// `{"type":"add","file":...,"line":...,"expressions":["order.customer"]}`
/// for one of the logged probe sites to watch orders go by.
#[derive(Debug, Parser)]
#[command(name = "vigil-demo", version, about)]
struct Cli {
    /// Path to a TOML config file. Falls back to `VIGIL_CONFIG`, then to
    /// defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port for the control protocol; overrides the config.
    #[arg(long)]
    port: Option<u16>,

    /// Orders to process before exiting.
    #[arg(long, default_value_t = 1_000)]
    iterations: u64,

    /// Pause between orders, in milliseconds.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Seed for the order generator.
    #[arg(long, default_value_t = 17)]
    seed: u64,

    /// Probe site (`FILE:LINE`) to declare up front so that persisted
    /// breakpoints there are re-armed at startup. Repeatable.
    #[arg(long = "site", value_name = "FILE:LINE", value_parser = parse_site)]
    sites: Vec<(String, u32)>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config);
    vigil_debugger::hardening::init(&config);

    let mut options = DebuggerOptions::from_config(&config);
    if let Some(port) = cli.port {
        options.port = port;
    }
    for (file, line) in cli.sites {
        options = options.with_site(file, line);
    }
    let debugger = Debugger::start(options).context("failed to start the debugger")?;
    tracing::info!(target: "vigil.demo", addr = %debugger.local_addr(), "debugger listening");

    let mut shop = Shop::new(cli.seed);
    let interval = Duration::from_millis(cli.interval_ms);
    let (mut accepted, mut rejected) = (0u64, 0u64);
    for id in 0..cli.iterations {
        let order = shop.next_order(id);
        match shop.process(&debugger, &order) {
            Outcome::Accepted { .. } => accepted += 1,
            Outcome::Rejected => rejected += 1,
        }
        if id == 0 {
            for (file, line) in debugger.registry().sites() {
                tracing::info!(target: "vigil.demo", %file, line, "probe site");
            }
        }
        thread::sleep(interval);
    }

    debugger.shutdown();
    tracing::info!(target: "vigil.demo", accepted, rejected, "done");
    Ok(())
}

fn load_config(cli_path: Option<PathBuf>) -> VigilConfig {
    let mut config = match resolve_config_path(cli_path) {
        None => VigilConfig::default(),
        Some(path) => match VigilConfig::load_from_path(&path) {
            Ok(config) => config,
            Err(err) => {
                // Tracing is not initialized yet.
                eprintln!(
                    "vigil-demo: failed to load config from {}: {err}; continuing with defaults",
                    path.display()
                );
                VigilConfig::default()
            }
        },
    };
    config.apply_env_overrides();
    config
}

fn parse_site(text: &str) -> Result<(String, u32), String> {
    let (file, line) = text
        .rsplit_once(':')
        .ok_or_else(|| format!("expected FILE:LINE, got `{text}`"))?;
    let line = line
        .parse()
        .map_err(|_| format!("`{line}` is not a line number"))?;
    if file.is_empty() {
        return Err("file must not be empty".to_owned());
    }
    Ok((file.to_owned(), line))
}
