use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use afk_rotator::config::{Config, ConfigError, NamesConfig};
use afk_rotator::error::{Error, RotatorErrorTrait};
use afk_rotator::health;
use afk_rotator::scheduler::Scheduler;
use afk_rotator::transport::LineTransport;
use afk_rotator::utils::format_duration;

#[derive(Parser)]
#[command(
    name = "afk-rotator",
    version,
    about = "Keeps one client session online, reconnecting and rotating its identity on a schedule",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML, or JSON when it ends in .json)
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to logging.format from the config
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and keep the session online (default)
    Run,

    /// Load and validate the configuration, then print a summary
    Check,

    /// Show the persisted rotation cursor and the next pool identity
    State {
        /// Delete the persisted cursor
        #[arg(long, default_value = "false")]
        reset: bool,
    },

    /// Preview synthetic identities
    Names {
        /// Number of names to generate
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,

        /// Fixed seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::Names { count, seed } = command {
        setup_tracing(cli.log_format.as_deref().unwrap_or("text"), "warn", cli.verbose)?;
        return names(&cli.config, count, seed);
    }

    // Initialize tracing/logging from the config when it loads, defaults otherwise
    let loaded = Config::load(&cli.config);
    let (level, format) = match &loaded {
        Ok(config) => (config.logging.level.clone(), config.logging.format.clone()),
        Err(_) => ("info".to_string(), "text".to_string()),
    };
    setup_tracing(cli.log_format.as_deref().unwrap_or(&format), &level, cli.verbose)?;

    let config = match loaded {
        Ok(config) => config,
        Err(e) => return report(e.into()),
    };

    let outcome = match command {
        Commands::Run => run(config).await,
        Commands::Check => {
            check(&config);
            Ok(())
        }
        Commands::State { reset } => state(&config, reset),
        Commands::Names { .. } => Ok(()),
    };

    match outcome {
        Ok(()) => Ok(()),
        Err(e) => report(e),
    }
}

/// Exit non-zero only for errors that cannot be recovered from
fn report(err: Error) -> Result<()> {
    if err.is_recoverable() {
        tracing::warn!(category = %err.category(), error = %err, "Command finished with errors");
        return Ok(());
    }
    tracing::error!(category = %err.category(), error = %err, "Fatal error");
    Err(err.into())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("afk_rotator=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("afk_rotator={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}

async fn run(config: Config) -> afk_rotator::error::Result<()> {
    tracing::info!(
        endpoint = %format!("{}:{}", config.endpoint.host, config.endpoint.port),
        rotation = config.rotation.enabled,
        "afk-rotator starting"
    );

    let mut transport = LineTransport::new();
    if let Some(pattern) = &config.session.kick_pattern {
        let pattern = regex::Regex::new(pattern)
            .map_err(|e| ConfigError::invalid("session.kick_pattern", e.to_string()))?;
        transport = transport.with_kick_pattern(pattern);
    }

    let scheduler = Scheduler::new(
        config.scheduler_config(),
        config.identity_provider(),
        Arc::new(transport),
        config.connect_template(),
        config.session_options(),
    )
    .with_auth(config.auth_sequencer()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let liveness = if config.liveness.enabled {
        let addr = config.liveness_addr()?;
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = health::serve(addr, wait_for_shutdown(rx)).await {
                tracing::error!(addr = %addr, error = %e, "Liveness endpoint failed");
            }
        }))
    } else {
        None
    };

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let status = scheduler.run(wait_for_shutdown(shutdown_rx)).await;

    if let Some(liveness) = liveness {
        let _ = liveness.await;
    }

    tracing::info!(
        starts = status.starts,
        rotations = status.rotations,
        reconnects = status.reconnects,
        "afk-rotator stopped"
    );
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn check(config: &Config) {
    let scheduler = config.scheduler_config();

    println!("Configuration OK");
    println!(
        "  Endpoint:        {}:{}",
        config.endpoint.host, config.endpoint.port
    );
    println!(
        "  Identity:        {}",
        scheduler.default_identity.as_deref().unwrap_or("(none)")
    );
    if config.rotation.enabled {
        let source = match &config.rotation.pool {
            Some(pool) => format!("pool of {}", pool.len()),
            None => format!("synthetic ({})", config.rotation.names.style),
        };
        println!(
            "  Rotation:        every {} from {}",
            format_duration(scheduler.interval),
            source
        );
    } else {
        println!("  Rotation:        disabled");
    }
    if scheduler.reconnect.enabled {
        println!(
            "  Reconnect:       {} base, {} max, x{}",
            format_duration(scheduler.reconnect.backoff.delay_for(1)),
            format_duration(std::time::Duration::from_millis(
                scheduler.reconnect.backoff.max_delay_ms
            )),
            scheduler.reconnect.backoff.multiplier
        );
    } else {
        println!("  Reconnect:       disabled");
    }
    println!(
        "  Auth sequence:   {}",
        if config.auth_sequence.enabled { "enabled" } else { "disabled" }
    );
    match &config.state.path {
        Some(path) => println!("  State file:      {}", path.display()),
        None => println!("  State file:      (in memory)"),
    }
    if config.liveness.enabled {
        println!("  Liveness:        http://{}/health/live", config.liveness.bind);
    }
}

fn state(config: &Config, reset: bool) -> afk_rotator::error::Result<()> {
    let mut store = config.state_store();

    if reset {
        store.reset()?;
        match store.path() {
            Some(path) => println!("Rotation state deleted: {}", path.display()),
            None => println!("Rotation state is kept in memory; nothing to delete"),
        }
        return Ok(());
    }

    let cursor = store.load();
    match store.path() {
        Some(path) => println!("State file:    {}", path.display()),
        None => println!("State file:    (in memory)"),
    }
    println!("Last index:    {}", cursor.last_index);
    if let Some(identity) = &cursor.last_identity {
        println!("Last identity: {identity}");
    }
    if let Some(updated_at) = cursor.updated_at {
        println!("Updated at:    {}", updated_at.to_rfc3339());
    }

    match &config.rotation.pool {
        Some(_) => {
            let provider = config.identity_provider();
            match provider.peek_pool_next() {
                Some(next) => println!("Next identity: {next}"),
                None => println!("Next identity: (pool is empty)"),
            }
        }
        None => println!("Next identity: (synthetic)"),
    }

    Ok(())
}

fn names(config_path: &Path, count: usize, seed: Option<u64>) -> Result<()> {
    let mut names = if config_path.exists() {
        Config::from_file(config_path)
            .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?
            .rotation
            .names
    } else {
        NamesConfig::default()
    };

    if seed.is_some() {
        names.seed = seed;
    }
    let mut generator = names.generator();

    for _ in 0..count {
        println!("{}", generator.generate());
    }
    Ok(())
}
