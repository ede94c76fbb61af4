//! Router bootstrap: entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args
//!   3. Load config
//!   4. Resolve effective log level (CLI `-v` flags > env > config)
//!   5. Init logger once
//!   6. Build router context and start the job queue
//!   7. Enqueue the identity bootstrap job and wait for boot to finish
//!   8. Run until Ctrl-C, then cancel and join

use std::path::PathBuf;

use tracing::info;

use router_bootstrap::{
    config, error::AppError,
    jobs::{JobQueue, LoadIdentityJob},
    logger,
    router::RouterContext,
    system::SystemVersion,
};

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<PathBuf>,
    exit_after_boot: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        router_name = %config.router_name,
        router_dir = %config.router_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let system = SystemVersion::detect();
    info!(
        os = system.os,
        arch = system.arch,
        slow = system.is_slow(),
        wrapper = system.wrapper_version.as_deref().unwrap_or("none"),
        "host detected"
    );

    let router = RouterContext::builder(config).build()?;
    info!(
        policy = %router.policy.current_exponent_policy(),
        "exponent policy resolved"
    );

    let ctrlc_token = router.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_token.cancel();
        }
    });

    let (queue, dispatcher) = JobQueue::start(router.clone());
    queue.enqueue(Box::new(LoadIdentityJob::new()))?;

    let booted = tokio::select! {
        res = router.state.wait_until_booted() => res,
        _ = router.shutdown.cancelled() => Err(AppError::Bootstrap("interrupted before boot completed".into())),
    };

    let router_hash = match booted {
        Ok(hash) => hash,
        Err(e) => {
            router.shutdown.cancel();
            dispatcher.await.ok();
            return Err(e);
        }
    };

    println!("✓ Router identity ready: {router_hash}");

    if !args.exit_after_boot {
        router.shutdown.cancelled().await;
    }

    router.shutdown.cancel();
    dispatcher.await.ok();
    Ok(())
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut exit_after_boot = false;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: router-bootstrap [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("      --exit-after-boot      Exit once the router identity is published");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--exit-after-boot" => exit_after_boot = true,
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => {
                eprintln!("error: unknown argument '{other}'");
                std::process::exit(1);
            }
        }
    }

    //   -v → warn, -vv → info, -vvv → debug, -vvvv+ → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path, exit_after_boot }
}
