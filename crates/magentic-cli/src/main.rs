//! magentic: run JSON instruction batches against the host bridge

mod config;

use std::io::Read;

use anyhow::{bail, Context};
use magentic_services::{execute_all, parse_batch, Host, HttpHost, MemoryHost, Session};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: magentic [--offline] [FILE|-]";

struct Args {
    offline: bool,
    input: Option<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args { offline: false, input: None };
    for arg in args {
        match arg.as_str() {
            "--offline" => parsed.offline = true,
            "-h" | "--help" => bail!(USAGE),
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
            _ if parsed.input.is_some() => bail!("only one input file is accepted\n{USAGE}"),
            _ => parsed.input = Some(arg),
        }
    }
    Ok(parsed)
}

fn read_input(input: Option<&str>) -> anyhow::Result<String> {
    match input {
        None | Some("-") => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).context("reading instructions from stdin")?;
            Ok(text)
        }
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {path}")),
    }
}

/// Execute every instruction in order and print one JSON report per line.
/// Returns how many steps failed.
fn run<H: Host>(session: &Session<H>, text: &str) -> anyhow::Result<usize> {
    let batch = parse_batch(text).context("parsing instructions")?;
    let reports = execute_all(session, &batch);
    for report in &reports {
        println!("{}", serde_json::to_string(report)?);
    }
    Ok(reports.iter().filter(|r| !r.success).count())
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("magentic=debug".parse()?)
            .add_directive("ureq=warn".parse()?))
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    let config = config::load_config();
    let text = read_input(args.input.as_deref())?;

    let failed = if args.offline {
        tracing::info!("Running offline against an in-memory project");
        let host = MemoryHost::from_seed(config.offline.bpm, &config.offline.tracks);
        let session = Session::new(host).with_curve_steps(config.automation.curve_steps)?;
        run(&session, &text)?
    } else {
        let host = HttpHost::new(config.bridge_config());
        match host.status() {
            Ok(status) if status.reaper_connected => {
                tracing::info!("Bridge at {} connected (host {})", config.bridge.url, status.reaper_version)
            }
            Ok(status) => tracing::warn!("Bridge at {} has no host connection: {}", config.bridge.url, status.error),
            Err(e) => tracing::warn!("Bridge status check failed: {}", e),
        }
        let session = Session::new(host).with_curve_steps(config.automation.curve_steps)?;
        run(&session, &text)?
    };

    if failed > 0 {
        tracing::warn!("{} step(s) failed", failed);
        std::process::exit(1);
    }
    Ok(())
}
