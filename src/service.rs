// DANS : src/service.rs

use crate::{
    backup::BackupManager,
    config::MonitorConfig,
    consistency::{ConsistencyValidator, CrossDexMap, CrossSourceReconciler},
    data_pipeline::{DexDataClient, PoolDataSource, SharedResources, api_connectors::DexScreenerSource},
    discovery::{PoolDetector, StartReport, SubscriptionManager},
    error::Result,
    events::{EventBus, MonitorEvent, SystemEvent, SystemEventKind},
    monitoring::{AlertManager, MetricsRegistry, report_error},
    rpc::BlockchainClient,
    state::{PoolStore, TimerRegistry},
    throttle::{AdaptiveBatchController, SlidingWindowRateLimiter},
};
use arc_swap::ArcSwap;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Assemble tous les composants et porte le cycle de vie `init` / `shutdown`.
pub struct PoolMonitorService {
    config: MonitorConfig,
    store: Arc<PoolStore>,
    metrics: Arc<MetricsRegistry>,
    events: EventBus,
    timers: Arc<TimerRegistry>,
    alerts: Arc<AlertManager>,
    batch: Arc<AdaptiveBatchController>,
    subscriptions: Arc<SubscriptionManager>,
    data_clients: Vec<Arc<DexDataClient>>,
    validator: Arc<ConsistencyValidator>,
    reconciler: Arc<CrossSourceReconciler>,
    backup: Arc<BackupManager>,
    running: AtomicBool,
}

impl PoolMonitorService {
    pub fn new(
        config: MonitorConfig,
        client: Arc<dyn BlockchainClient>,
        sources: Vec<Arc<dyn PoolDataSource>>,
    ) -> Result<Self> {
        let store = Arc::new(PoolStore::new(config.cache_ttl));
        let metrics = Arc::new(MetricsRegistry::new()?);
        let events = EventBus::new(config.event_capacity);
        let timers = Arc::new(TimerRegistry::new());
        let alerts = Arc::new(AlertManager::new(config.alerts.clone(), metrics.clone(), events.clone()));
        let batch = Arc::new(AdaptiveBatchController::new(config.batch.clone(), metrics.clone()));
        let rate_limiter = Arc::new(SlidingWindowRateLimiter::new(
            config.rate_limit.max_requests,
            config.rate_limit.time_window,
        ));
        let cross_dex = Arc::new(ArcSwap::from_pointee(CrossDexMap::new()));

        let shared = SharedResources {
            store: store.clone(),
            metrics: metrics.clone(),
            events: events.clone(),
            rate_limiter,
            batch: batch.clone(),
            timers: timers.clone(),
        };
        let data_clients: Vec<Arc<DexDataClient>> = sources
            .into_iter()
            .map(|source| {
                Arc::new(DexDataClient::new(source, shared.clone(), &config.retry, config.changes, config.health))
            })
            .collect();

        let detector = Arc::new(PoolDetector::new(client.clone(), store.clone(), events.clone()));
        let subscriptions = Arc::new(SubscriptionManager::new(
            client,
            detector,
            config.dexes.clone(),
            timers.clone(),
            metrics.clone(),
            events.clone(),
        ));
        let validator = Arc::new(ConsistencyValidator::new(
            &data_clients,
            store.clone(),
            metrics.clone(),
            events.clone(),
            alerts.clone(),
            config.consistency,
            config.consistency_log_capacity,
        ));
        let reconciler = Arc::new(CrossSourceReconciler::new(
            data_clients.clone(),
            store.clone(),
            metrics.clone(),
            events.clone(),
            batch.clone(),
            config.cross_dex,
            cross_dex.clone(),
        ));
        let backup = Arc::new(BackupManager::new(
            &config.backup,
            store.clone(),
            cross_dex,
            metrics.clone(),
            events.clone(),
        ));

        Ok(Self {
            config,
            store,
            metrics,
            events,
            timers,
            alerts,
            batch,
            subscriptions,
            data_clients,
            validator,
            reconciler,
            backup,
            running: AtomicBool::new(false),
        })
    }

    /// Une source DexScreener par DEX activé.
    pub fn with_dexscreener(config: MonitorConfig, client: Arc<dyn BlockchainClient>) -> Result<Self> {
        let sources = config
            .enabled_dexes()
            .map(|dex| {
                DexScreenerSource::new(&dex.name, &dex.dexscreener_id)
                    .map(|source| Arc::new(source) as Arc<dyn PoolDataSource>)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(config, client, sources)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<PoolStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    pub fn backup(&self) -> &Arc<BackupManager> {
        &self.backup
    }

    pub fn validator(&self) -> &Arc<ConsistencyValidator> {
        &self.validator
    }

    pub fn reconciler(&self) -> &Arc<CrossSourceReconciler> {
        &self.reconciler
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn data_client(&self, dex: &str) -> Option<&Arc<DexDataClient>> {
        self.data_clients.iter().find(|client| client.dex() == dex)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Retire du registre les pools non touchés depuis deux TTL.
    pub fn optimize_storage(&self) -> usize {
        self.store.prune_stale(self.config.cache_ttl * 2)
    }

    /// Restaure le dernier backup puis démarre détection, monitoring et tâches périodiques.
    pub async fn init(&self) -> StartReport {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("[Service] init() appelé alors que le service tourne déjà.");
            return StartReport::default();
        }
        let intervals = &self.config.intervals;

        if self.config.backup.enabled && self.config.backup.restore_on_start {
            if let Err(e) = self.backup.restore_data(None).await {
                report_error(&self.metrics, &self.events, "Backup", &e);
            }
        }

        let report = self.subscriptions.start(intervals.full_scan).await;

        for client in &self.data_clients {
            client.start_monitoring(intervals.monitoring);
        }
        self.validator.start(&self.timers, intervals.consistency);
        self.reconciler.start(&self.timers, intervals.cross_dex);

        let batch = self.batch.clone();
        self.timers.spawn_periodic("batch-adjustment", intervals.batch_adjustment, move || {
            let batch = batch.clone();
            async move {
                batch.adjust();
            }
        });

        if self.config.backup.enabled {
            self.backup.start(&self.timers, intervals.backup);
        }

        let alerts = self.alerts.clone();
        self.timers.spawn_periodic("alert-check", intervals.alert_check, move || {
            let alerts = alerts.clone();
            async move {
                alerts.check_thresholds();
            }
        });

        let store = self.store.clone();
        let max_age = self.config.cache_ttl * 2;
        self.timers.spawn_periodic("storage-optimization", self.config.cache_ttl, move || {
            let store = store.clone();
            async move {
                store.prune_stale(max_age);
            }
        });

        info!(
            "[Service] Démarré : {} pools connus, {} abonnements, {} DEX en échec, {} tâches de fond.",
            self.store.len(),
            report.subscriptions,
            report.failed_dexes.len(),
            self.timers.len()
        );
        self.events.publish(MonitorEvent::System(SystemEvent::new(
            SystemEventKind::ServiceStarted,
            format!("{} pools", self.store.len()),
        )));
        report
    }

    /// Ferme les abonnements, arrête les boucles périodiques et tente un dernier backup.
    /// Un passage déjà lancé (monitoring, cohérence, cross-dex) va jusqu'au bout : ses requêtes ne sont pas coupées.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.subscriptions.stop().await;
        for client in &self.data_clients {
            client.stop();
        }
        let cancelled = self.timers.cancel_all();

        if self.config.backup.enabled {
            if let Err(e) = self.backup.backup_data().await {
                report_error(&self.metrics, &self.events, "Backup", &e);
            }
        }
        info!("[Service] Arrêté ({} tâches de fond stoppées).", cancelled);
        self.events.publish(MonitorEvent::System(SystemEvent::new(SystemEventKind::ServiceStopped, "")));
    }
}
