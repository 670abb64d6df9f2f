// DANS : src/discovery/subscriptions.rs

use super::detector::{DexTarget, PoolDetector};
use crate::{
    config::DexConfig,
    error::MonitorError,
    events::{EventBus, MonitorEvent, SystemEvent, SystemEventKind},
    monitoring::{MetricsRegistry, report_error},
    rpc::{BlockchainClient, RawNotification, RawUpdate, SubscriptionId},
    state::TimerRegistry,
};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const FORWARDER_PREFIX: &str = "subscription:";
const FULL_SCAN_TIMER: &str = "full-scan";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    Program,
    Logs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub dex: String,
    pub kind: SubscriptionKind,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StartReport {
    pub subscriptions: usize,
    pub failed_dexes: Vec<String>,
    pub loaded_pools: usize,
}

/// Double canal de détection : abonnements push + balayage complet périodique.
pub struct SubscriptionManager {
    client: Arc<dyn BlockchainClient>,
    detector: Arc<PoolDetector>,
    dexes: Vec<DexConfig>,
    timers: Arc<TimerRegistry>,
    metrics: Arc<MetricsRegistry>,
    events: EventBus,
    active: Mutex<Vec<Subscription>>,
}

impl SubscriptionManager {
    pub fn new(
        client: Arc<dyn BlockchainClient>,
        detector: Arc<PoolDetector>,
        dexes: Vec<DexConfig>,
        timers: Arc<TimerRegistry>,
        metrics: Arc<MetricsRegistry>,
        events: EventBus,
    ) -> Self {
        Self { client, detector, dexes, timers, metrics, events, active: Mutex::new(Vec::new()) }
    }

    pub fn active_subscriptions(&self) -> Vec<Subscription> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn enabled(&self) -> impl Iterator<Item = &DexConfig> {
        self.dexes.iter().filter(|dex| dex.enabled)
    }

    /// Abonne chaque DEX activé, charge les pools existants puis arme le balayage périodique.
    /// L'échec d'un DEX n'interrompt jamais les autres.
    pub async fn start(self: &Arc<Self>, scan_interval: Duration) -> StartReport {
        let mut report = StartReport::default();
        for dex in self.enabled() {
            match self.subscribe_dex(dex).await {
                Ok(count) => report.subscriptions += count,
                Err(e) => {
                    report_error(&self.metrics, &self.events, "Subscriptions", &e);
                    report.failed_dexes.push(dex.name.clone());
                }
            }
        }
        self.events.publish(MonitorEvent::System(SystemEvent::new(
            SystemEventKind::SubscriptionsStarted,
            format!("{} abonnements, {} DEX en échec", report.subscriptions, report.failed_dexes.len()),
        )));

        report.loaded_pools = self.load_existing_pools().await;
        self.start_periodic_check(scan_interval);
        report
    }

    /// Deux abonnements par DEX (comptes du programme + logs). Erreur seulement si les deux échouent.
    async fn subscribe_dex(&self, dex: &DexConfig) -> Result<usize, MonitorError> {
        let target = DexTarget::from_config(dex)?;
        let (sink, mut updates) = mpsc::unbounded_channel::<RawNotification>();

        let mut created = Vec::new();
        let mut failures = Vec::new();
        match self.client.subscribe_program(&target.program_id, sink.clone()).await {
            Ok(id) => created.push(Subscription { id, dex: dex.name.clone(), kind: SubscriptionKind::Program }),
            Err(e) => failures.push(format!("programme : {}", e)),
        }
        match self.client.subscribe_logs(&target.program_id, sink).await {
            Ok(id) => created.push(Subscription { id, dex: dex.name.clone(), kind: SubscriptionKind::Logs }),
            Err(e) => failures.push(format!("logs : {}", e)),
        }

        if created.is_empty() {
            return Err(MonitorError::SubscriptionSetup { dex: dex.name.clone(), reason: failures.join(" ; ") });
        }
        for failure in &failures {
            let partial = MonitorError::SubscriptionSetup { dex: dex.name.clone(), reason: failure.clone() };
            report_error(&self.metrics, &self.events, "Subscriptions", &partial);
        }

        let detector = self.detector.clone();
        let metrics = self.metrics.clone();
        let events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(raw) = updates.recv().await {
                match detector.process(&target, raw).await {
                    Ok(_) => {}
                    Err(MonitorError::InvalidData(reason)) => {
                        debug!("[Subscriptions] Notification {} ignorée : {}", target.name, reason);
                    }
                    Err(e) => report_error(&metrics, &events, "Detector", &e),
                }
            }
        });
        self.timers.register(format!("{}{}", FORWARDER_PREFIX, dex.name), forwarder);

        let count = created.len();
        info!("[Subscriptions] {} : {} abonnement(s) actif(s).", dex.name, count);
        self.active.lock().unwrap_or_else(PoisonError::into_inner).extend(created);
        Ok(count)
    }

    /// Balayage complet (`getProgramAccounts`) de chaque DEX activé. Retourne le nombre de nouveaux pools.
    pub async fn load_existing_pools(&self) -> usize {
        let mut detected = 0;
        for dex in self.enabled() {
            let target = match DexTarget::from_config(dex) {
                Ok(target) => target,
                Err(e) => {
                    warn!("[Subscriptions] Balayage de {} ignoré : {}", dex.name, e);
                    continue;
                }
            };
            let accounts = match self.client.get_program_accounts(&target.program_id).await {
                Ok(accounts) => accounts,
                Err(e) => {
                    report_error(&self.metrics, &self.events, "Subscriptions", &format!("balayage {} : {}", dex.name, e));
                    continue;
                }
            };
            let scanned = accounts.len();
            let mut found = 0;
            for account in accounts {
                let update = RawUpdate::Account { pubkey: account.pubkey, data: account.data, owner: account.owner };
                match self.detector.process_update(&target, update).await {
                    Ok(records) => found += records.len(),
                    Err(e) => report_error(&self.metrics, &self.events, "Detector", &e),
                }
            }
            debug!("[Subscriptions] {} : {} comptes balayés, {} nouveaux pools.", dex.name, scanned, found);
            detected += found;
        }
        info!("[Subscriptions] Balayage complet terminé : {} nouveaux pools.", detected);
        self.events.publish(MonitorEvent::System(SystemEvent::new(
            SystemEventKind::FullScanCompleted,
            format!("{} nouveaux pools", detected),
        )));
        detected
    }

    /// Arme le balayage périodique de secours. Sans effet s'il tourne déjà.
    pub fn start_periodic_check(self: &Arc<Self>, interval: Duration) -> bool {
        if self.timers.active_names().iter().any(|name| name == FULL_SCAN_TIMER) {
            return false;
        }
        let scanner = Arc::clone(self);
        self.timers.spawn_periodic(FULL_SCAN_TIMER, interval, move || {
            let scanner = scanner.clone();
            async move {
                scanner.load_existing_pools().await;
            }
        });
        true
    }

    /// Arrête le balayage et les relais, puis désabonne chaque handle.
    pub async fn stop(&self) {
        self.timers.cancel_prefix(FULL_SCAN_TIMER);
        let forwarders = self.timers.cancel_prefix(FORWARDER_PREFIX);
        let subscriptions: Vec<Subscription> =
            std::mem::take(&mut *self.active.lock().unwrap_or_else(PoisonError::into_inner));

        for subscription in &subscriptions {
            if let Err(e) = self.client.unsubscribe(subscription.id).await {
                warn!(
                    "[Subscriptions] Désabonnement #{} ({}, {:?}) en échec : {}",
                    subscription.id, subscription.dex, subscription.kind, e
                );
            }
        }
        info!(
            "[Subscriptions] Arrêt : {} relais annulés, {} abonnements fermés.",
            forwarders,
            subscriptions.len()
        );
    }
}
