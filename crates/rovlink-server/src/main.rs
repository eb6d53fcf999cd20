use std::process;

use anyhow::Context;
use rovlink::config::ENV_KEYS;
use rovlink::{BridgeConfig, ROVLINK_VERSION};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const USAGE: &str = "\
Usage: rovlink-server [options]

Every option overrides the matching ROVLINK_* environment variable.

Options:
  --bind-host <host>              Control socket address [default: 0.0.0.0]
  --control-port <port>           Control socket port [default: 8088]
  --telemetry-port <port|off>     Send telemetry to this port instead of the client's
  --serial-device <path>          Serial device [default: /dev/ttyAMA0]
  --baud-rate <rate>              Serial baud rate [default: 2000000]
  --rtscts <bool>                 RTS/CTS flow control [default: true]
  --handshake-byte <byte>         Peer readiness byte [default: 0xAA]
  --ack-byte <byte>               Acknowledgement byte [default: 0xAA]
  --handshake-timeout-ms <ms|off> Fail if the peer is not ready in time [default: off]
  --queue-capacity <n|off>        Bound each inbound queue [default: off]
  --shutdown-timeout-ms <ms>      Bound on graceful shutdown [default: 5000]
  --discard-stale-control <bool>  Drop control queued before the handshake [default: true]
  -h, --help                      Print this help
  -V, --version                   Print the version

Logging: RUST_LOG, or ROVLINK_LOG=trace|debug|info|warn|error; LOG_FORMAT=json.";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    /// Run with `(env key, value)` overrides in command-line order.
    Run(Vec<(String, String)>),
    Help,
    Version,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let overrides = match parse_args(&args) {
        Ok(Command::Run(overrides)) => overrides,
        Ok(Command::Help) => {
            println!("{USAGE}");
            return;
        }
        Ok(Command::Version) => {
            println!("rovlink-server {ROVLINK_VERSION}");
            return;
        }
        Err(msg) => {
            eprintln!("error: {msg}");
            eprintln!();
            eprintln!("{USAGE}");
            process::exit(2);
        }
    };

    init_tracing();

    if let Err(e) = run(&overrides) {
        tracing::error!(error = format!("{e:#}"), "rovlink-server failed");
        process::exit(1);
    }
}

fn run(overrides: &[(String, String)]) -> anyhow::Result<()> {
    let config = load_config(|key| std::env::var(key).ok(), overrides)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(rovlink::serve(config))
}

fn load_config<F>(lookup: F, overrides: &[(String, String)]) -> anyhow::Result<BridgeConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config =
        BridgeConfig::from_lookup(lookup).context("invalid environment configuration")?;
    for (key, value) in overrides {
        config
            .set(key, value)
            .with_context(|| format!("invalid command-line option for {key}"))?;
    }
    Ok(config)
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut overrides = Vec::new();

    let mut i = 1; // skip argv[0]
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-V" => return Ok(Command::Version),
            _ => {}
        }

        let Some(flag) = arg.strip_prefix("--") else {
            return Err(format!("unexpected argument: {arg}"));
        };
        let (name, inline_value) = match flag.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (flag, None),
        };

        let key = env_key(name).ok_or_else(|| format!("unknown flag: --{name}"))?;
        let value = match inline_value {
            Some(value) => value,
            None => {
                i += 1;
                args.get(i)
                    .ok_or_else(|| format!("--{name} requires a value"))?
                    .clone()
            }
        };
        overrides.push((key.to_string(), value));
        i += 1;
    }

    Ok(Command::Run(overrides))
}

/// `baud-rate` → `ROVLINK_BAUD_RATE`, if that is a known setting.
fn env_key(flag: &str) -> Option<&'static str> {
    let wanted = format!("ROVLINK_{}", flag.replace('-', "_").to_ascii_uppercase());
    ENV_KEYS.iter().copied().find(|key| *key == wanted)
}

/// Default filter directives when `RUST_LOG` is unset, from `ROVLINK_LOG`.
///
/// Per-datagram and per-frame events are trace-level, so the bridge stays quiet
/// under load unless `ROVLINK_LOG=trace` is asked for.
fn default_directives(level: Option<&str>) -> String {
    let level = match level.map(str::to_ascii_lowercase).as_deref() {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn" | "warning") => "warn",
        Some("error") => "error",
        _ => "info",
    };
    format!("rovlink={level},rovlink_server={level}")
}

fn init_tracing() {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(default_directives(
            std::env::var("ROVLINK_LOG").ok().as_deref(),
        )),
    };

    let output = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        _ => fmt::layer().with_writer(std::io::stderr).boxed(),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(output)
        .try_init();
}
