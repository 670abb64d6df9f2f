// DANS : src/bin/pool_monitor.rs

use anyhow::{Context, Result, bail};
use arc_swap::ArcSwap;
use clap::{Parser, Subcommand, ValueEnum};
use pool_monitor::{
    PoolMonitorService,
    backup::{BackupManager, ExportFormat, ExportOptions},
    config::MonitorConfig,
    consistency::CrossDexMap,
    events::{EventBus, MonitorEvent},
    monitoring::{MetricsRegistry, logging},
    rpc::SolanaChainClient,
    state::PoolStore,
};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Surveillance des pools de liquidité Solana", long_about = None)]
struct Cli {
    /// `run` si absent.
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Lance le moniteur jusqu'à Ctrl-C.
    Run,
    /// Vérifie que le dernier backup est lisible et résume son contenu.
    RestoreCheck {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Exporte le dernier backup en JSON ou CSV.
    Export {
        #[arg(long, value_enum, default_value_t = FormatArg::Json)]
        format: FormatArg,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        dex: Option<String>,
        #[arg(long, default_value_t = false)]
        include_cross_dex: bool,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Json,
    Csv,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Json => ExportFormat::Json,
            FormatArg::Csv => ExportFormat::Csv,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::setup_logging();
    let cli = Cli::parse();
    let config = MonitorConfig::load().context("Configuration invalide")?;

    let task_result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::RestoreCheck { file } => restore_check(&config, file).await,
        Commands::Export { format, out, dex, include_cross_dex } => {
            let options = ExportOptions { format: format.into(), path: out, include_cross_dex, dex };
            export(&config, &options).await
        }
    };

    if let Err(e) = task_result {
        error!("[Main] La commande a échoué : {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: MonitorConfig) -> Result<()> {
    info!("[Main] Connexion à {} ...", config.rpc_url);
    let client = SolanaChainClient::connect(
        &config.rpc_url,
        &config.ws_url,
        config.retry.max_retries,
        config.retry.base_delay,
    )
    .await
    .context("Connexion RPC / WebSocket impossible")?;

    let service = PoolMonitorService::with_dexscreener(config, Arc::new(client))?;
    let events = service.subscribe_events();
    let printer = tokio::spawn(log_events(events));

    let report = service.init().await;
    if !report.failed_dexes.is_empty() {
        warn!("[Main] DEX sans abonnement : {:?}", report.failed_dexes);
    }

    tokio::signal::ctrl_c().await.context("Écoute de Ctrl-C impossible")?;
    info!("[Main] Ctrl-C reçu, arrêt en cours...");
    service.shutdown().await;
    printer.abort();
    Ok(())
}

/// Relais des événements vers les logs pour l'usage en ligne de commande.
async fn log_events(mut events: Receiver<MonitorEvent>) {
    loop {
        match events.recv().await {
            Ok(MonitorEvent::NewPool(pool)) => {
                info!("[Events] Nouveau pool {} sur {} ({} / {})", pool.address, pool.dex, pool.token_a_mint, pool.token_b_mint);
            }
            Ok(MonitorEvent::Alert(alert)) => warn!("[Events] Alerte {:?} : {}", alert.kind, alert.message),
            Ok(MonitorEvent::Error(err)) => warn!("[Events] Erreur {} : {}", err.context, err.message),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!("[Events] {} événements perdus (consommateur en retard).", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

fn offline_backup_manager(config: &MonitorConfig) -> Result<BackupManager> {
    Ok(BackupManager::new(
        &config.backup,
        Arc::new(PoolStore::new(config.cache_ttl)),
        Arc::new(ArcSwap::from_pointee(CrossDexMap::new())),
        Arc::new(MetricsRegistry::new()?),
        EventBus::new(config.event_capacity),
    ))
}

async fn restore_check(config: &MonitorConfig, file: Option<PathBuf>) -> Result<()> {
    let manager = offline_backup_manager(config)?;
    let Some(snapshot) = manager.restore_data(file).await? else {
        bail!("Aucun backup trouvé dans {}", manager.dir().display());
    };
    info!(
        "[Main] Backup du {} lisible : {} pools, {} entrées cross-dex, {} requêtes / {} erreurs enregistrées.",
        snapshot.timestamp,
        snapshot.pools.len(),
        snapshot.cross_dex_data.len(),
        snapshot.metrics.request_count,
        snapshot.metrics.error_count
    );
    Ok(())
}

async fn export(config: &MonitorConfig, options: &ExportOptions) -> Result<()> {
    let manager = offline_backup_manager(config)?;
    if manager.restore_data(None).await?.is_none() {
        bail!("Aucun backup à exporter dans {}", manager.dir().display());
    }
    let rows = manager.export_data(options).await?;
    info!("[Main] {} pools exportés vers {}.", rows, options.path.display());
    Ok(())
}
