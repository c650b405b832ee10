use {
    clap::Parser,
    dstat::{
        config::{Cli, OutputMode, RuntimeConfig},
        fleet::{self, FleetPlan},
        gateway::{GatewayBotClient, GatewaySessionFactory},
        ui,
    },
    std::{
        io::{IsTerminal, Write},
        sync::Arc,
    },
    tokio::sync::watch,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let config = RuntimeConfig::load(cli, std::io::stdout().is_terminal())?;

    // Logs go to stderr so stdout stays clean for the summary or JSON report
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_filter()))
        .target(env_logger::Target::Stderr)
        .init();

    // NOTE: Workaround for rustls issue
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        log::debug!("rustls crypto provider already installed");
    }

    log::info!("🚀 Starting dstat...");
    log::info!("📊 Configuration:");
    log::info!("   API base: {}", config.api_base);
    log::info!("   Output: {:?}", config.output);
    log::info!("   Guild timeout: {:?}", config.fleet.guild_timeout);
    log::info!("   Ready timeout: {:?}", config.fleet.ready_timeout);

    let metadata = GatewayBotClient::new(&config.api_base, &config.token)?;
    let (plan, gateway) = FleetPlan::fetch(&metadata).await.map_err(|e| {
        log::error!("❌ Cannot plan the fleet: {}", e);
        e
    })?;
    log::info!(
        "🌐 Gateway {} recommends {} shards ({} session starts remaining, resets in {} ms)",
        gateway.url,
        gateway.shards,
        gateway.session_start_limit.remaining,
        gateway.session_start_limit.reset_after
    );

    let sessions = Arc::new(GatewaySessionFactory::new(&gateway.url, &config.token));
    let run = fleet::start(plan, config.fleet, sessions);

    let (finished_tx, finished_rx) = watch::channel(false);
    let dashboard = match config.output {
        OutputMode::Live => Some(tokio::spawn(ui::run_ui(
            run.aggregate().clone(),
            finished_rx,
            config.refresh_interval,
        ))),
        _ => None,
    };

    let snapshot = run.await_all().await;
    let _ = finished_tx.send(true);

    if let Some(dashboard) = dashboard {
        match dashboard.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("⚠️  Dashboard error: {}", e),
            Err(e) => log::warn!("⚠️  Dashboard task failed: {}", e),
        }
    }

    let mut stdout = std::io::stdout().lock();
    match config.output {
        OutputMode::Json => writeln!(stdout, "{}", ui::to_json(&snapshot)?)?,
        OutputMode::Live | OutputMode::Summary => ui::write_summary(&mut stdout, &snapshot)?,
    }
    stdout.flush()?;

    Ok(())
}
