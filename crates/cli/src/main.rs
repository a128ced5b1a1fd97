use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    relais_config::{RelaisConfig, Severity},
    relais_dedup::{DedupCache, EvictionPolicy},
    relais_media::MediaStore,
    relais_routing::Router,
    relais_supervisor::Supervisor,
    relais_surface::{SidecarDriver, SurfaceDriver, SurfaceLock},
};

#[derive(Parser)]
#[command(name = "relais", about = "Relais — chat-surface AI relay")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (overrides discovery in ./ and ~/.config/relais/).
    #[arg(long, global = true, env = "RELAIS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay (default when no subcommand is provided).
    Run,
    /// Validate the configuration and exit.
    Validate,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load(cli: &Cli) -> anyhow::Result<RelaisConfig> {
    match &cli.config {
        Some(path) => relais_config::load_config(path),
        None => Ok(relais_config::discover_and_load()),
    }
}

fn validate(cli: &Cli) -> anyhow::Result<()> {
    let result = relais_config::validate(cli.config.as_deref());

    match &result.config_path {
        Some(path) => println!("Checked {}", path.display()),
        None => match relais_config::config_dir() {
            Some(dir) => println!(
                "No config file found in ./ or {}; defaults validated",
                dir.display()
            ),
            None => println!("No config file found; defaults validated"),
        },
    }
    for d in &result.diagnostics {
        println!("{} [{}] {}: {}", d.severity, d.category, d.path, d.message);
    }
    println!(
        "{} error(s), {} warning(s)",
        result.count(Severity::Error),
        result.count(Severity::Warning)
    );

    if result.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = load(cli)?;

    let result = relais_config::validate_config(&config);
    for d in &result.diagnostics {
        match d.severity {
            Severity::Error => anyhow::bail!("config error at {}: {}", d.path, d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
            Severity::Info => info!(path = %d.path, "{}", d.message),
        }
    }

    let driver: Arc<dyn SurfaceDriver> =
        Arc::new(SidecarDriver::new(&config.surface.sidecar_url).context("sidecar client")?);
    let lock = SurfaceLock::new(config.surface.lock_ceiling());
    let media = Arc::new(MediaStore::new(config.media.dir.clone()).await?);

    let cache_path = match &config.cache.path {
        Some(path) => path.clone(),
        None => relais_config::data_dir()
            .context("no data directory available; set cache.path explicitly")?
            .join("cache.json"),
    };
    let policy = EvictionPolicy {
        max_entries: config.cache.eviction.max_entries,
        max_age: config.cache.eviction.max_age_secs.map(Duration::from_secs),
    };
    let cache = Arc::new(DedupCache::open(cache_path, policy).await?);

    let router = Router::new(&config, Arc::clone(&driver), lock.clone(), Arc::clone(&media));
    for (group, reason) in router.skipped_groups() {
        warn!(group = %group, reason = %reason, "group disabled at startup");
    }
    if !config.groups.is_empty() && router.skipped_groups().len() == config.groups.len() {
        anyhow::bail!("no usable groups: every configured route failed to initialize");
    }

    let cancel = CancellationToken::new();
    let supervisor = Supervisor::new(
        config,
        driver,
        Arc::new(router),
        cache,
        media,
        lock,
        cancel.clone(),
    );
    let runner = tokio::spawn(supervisor.run());

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutdown requested");
    cancel.cancel();
    runner.await.context("supervisor task")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);
    info!(version = env!("CARGO_PKG_VERSION"), "relais starting");

    match cli.command {
        None | Some(Commands::Run) => run(&cli).await,
        Some(Commands::Validate) => validate(&cli),
    }
}
