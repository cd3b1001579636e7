//! JIO Network Monitor - Main entry point

use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info};
use jio_monitor::{
    api::ApiServer,
    cli::{self, Args, LogFormat},
    clock::{Clock, SystemClock},
    config::Config,
    database::Database,
    fetch::{ChainRpcClient, HttpDashboardSource, IpApiGeoProvider},
    poller::{PollOrchestrator, Sources},
    trackers::Trackers,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::parse_args();
    init_logging(&args);

    info!("Starting JIO Network Monitor");

    let mut config = match &args.config_path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_cli_overrides(&args);
    config.validate().context("invalid configuration")?;

    info!("Database path: {:?}", config.database.path);
    let database = Database::new(&config.database.path)
        .await
        .context("failed to open database")?;
    database.migrate().await.context("failed to apply schema")?;
    info!("Database schema ready");

    let sources = build_sources(&config)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let trackers = Trackers::new(&database, clock.clone(), config.alert_config());
    let orchestrator = PollOrchestrator::new(trackers.clone(), sources, clock, config.poll_config());

    if args.once {
        let report = orchestrator.run_cycle().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if config.api.enabled {
        let api_server = ApiServer::new(trackers, config.api.port);
        tokio::spawn(async move {
            if let Err(e) = api_server.start(shutdown_signal()).await {
                error!("API server error: {:?}", e);
            }
        });
    }

    orchestrator.run_until(shutdown_signal()).await;
    info!("JIO Network Monitor stopped");
    Ok(())
}

fn build_sources(config: &Config) -> anyhow::Result<Sources> {
    let timeout = config.fetch_timeout();
    let mut sources = Sources::default();

    match &config.sources.dashboard_url {
        Some(url) => {
            info!("Dashboard feed: {}", url);
            sources.dashboard = Some(Arc::new(HttpDashboardSource::new(url.clone(), timeout)?));
        }
        None => info!("No dashboard feed configured; reporting nodes will not be polled"),
    }

    match &config.sources.chain_url {
        Some(url) => {
            info!("Chain gateway: {}", url);
            sources.chain = Some(Arc::new(ChainRpcClient::new(url.clone())?));
        }
        None => info!("No chain gateway configured; validators and blocks will not be polled"),
    }

    if let Some(url) = &config.sources.geo_url {
        sources.geo = Some(Arc::new(IpApiGeoProvider::new(url.clone(), timeout)?));
    }

    Ok(sources)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

fn init_logging(args: &Args) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    match args.log_format {
        LogFormat::Json => fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).init(),
    }
}
