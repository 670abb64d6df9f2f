// DANS : src/consistency/cross_source.rs

use super::relative_difference;
use crate::{
    config::DiffThresholds,
    data_pipeline::DexDataClient,
    events::{CrossDexInconsistency, DataType, EventBus, MonitorEvent},
    monitoring::{MetricsRegistry, report_error},
    state::{PoolKey, PoolRecord, PoolStore, TimerRegistry},
    throttle::AdaptiveBatchController,
};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

pub type CrossDexMap = HashMap<PoolKey, Vec<PoolRecord>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrossDexReport {
    pub pools: usize,
    pub comparisons: usize,
    pub inconsistencies: usize,
}

/// Compare chaque pool connu au même couple de tokens sur les autres DEX.
/// Purement consultatif : le registre principal n'est jamais modifié ici.
pub struct CrossSourceReconciler {
    clients: Vec<Arc<DexDataClient>>,
    store: Arc<PoolStore>,
    metrics: Arc<MetricsRegistry>,
    events: EventBus,
    batch: Arc<AdaptiveBatchController>,
    thresholds: DiffThresholds,
    cross_dex: Arc<ArcSwap<CrossDexMap>>,
}

impl CrossSourceReconciler {
    pub fn new(
        clients: Vec<Arc<DexDataClient>>,
        store: Arc<PoolStore>,
        metrics: Arc<MetricsRegistry>,
        events: EventBus,
        batch: Arc<AdaptiveBatchController>,
        thresholds: DiffThresholds,
        cross_dex: Arc<ArcSwap<CrossDexMap>>,
    ) -> Self {
        Self { clients, store, metrics, events, batch, thresholds, cross_dex }
    }

    pub fn cross_dex_data(&self) -> Arc<CrossDexMap> {
        self.cross_dex.load_full()
    }

    fn compare(&self, local: &PoolRecord, other: &PoolRecord, data_type: DataType, threshold: f64) -> bool {
        let (local_value, cross_dex_value) = match data_type {
            DataType::Price => (local.price, other.price),
            DataType::Volume => (local.volume_24h, other.volume_24h),
        };
        let difference = relative_difference(local_value, cross_dex_value);
        let exceeded = difference > threshold;
        self.metrics.record_cross_dex_check(exceeded);
        if exceeded {
            warn!(
                "[CrossDex] {:?} divergent pour {} : {} ({}) vs {} ({}), écart {:.4}",
                data_type, local.address, local_value, local.dex, cross_dex_value, other.dex, difference
            );
            self.events.publish(MonitorEvent::CrossDexInconsistency(CrossDexInconsistency {
                pool_address: local.address.to_string(),
                cross_dex: other.dex.clone(),
                data_type,
                local_value,
                cross_dex_value,
                difference,
            }));
        }
        exceeded
    }

    async fn reconcile_pool(&self, key: PoolKey, local: PoolRecord) -> (PoolKey, Vec<PoolRecord>, usize, usize) {
        let mut found = Vec::new();
        let (mut comparisons, mut inconsistencies) = (0, 0);

        for client in self.clients.iter().filter(|c| c.dex() != key.dex()) {
            match client.find_pair(&local.token_a_mint, &local.token_b_mint).await {
                // Deux DEX configurés sur le même `dexId` renvoient le pool lui-même.
                Ok(Some(snapshot)) if snapshot.address != local.address => {
                    let other = snapshot.to_record();
                    for (data_type, threshold) in
                        [(DataType::Price, self.thresholds.price), (DataType::Volume, self.thresholds.volume)]
                    {
                        comparisons += 1;
                        if self.compare(&local, &other, data_type, threshold) {
                            inconsistencies += 1;
                        }
                    }
                    found.push(other);
                }
                Ok(_) => debug!("[CrossDex] Pas de contrepartie {} pour {}.", client.dex(), key),
                Err(e) => report_error(&self.metrics, &self.events, "CrossDex", &format!("{} via {} : {}", key, client.dex(), e)),
            }
        }
        (key, found, comparisons, inconsistencies)
    }

    /// Reconstruit entièrement la table cross-dex.
    pub async fn run_check(&self) -> CrossDexReport {
        let pools: Vec<(PoolKey, PoolRecord)> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|(_, entry)| entry.has_metrics())
            .map(|(key, entry)| (key, entry.record))
            .collect();

        let results = self
            .batch
            .run_batched(pools, |(key, record)| self.reconcile_pool(key, record))
            .await;

        let mut report = CrossDexReport { pools: results.len(), ..Default::default() };
        let mut next = HashMap::new();
        for (key, found, comparisons, inconsistencies) in results {
            report.comparisons += comparisons;
            report.inconsistencies += inconsistencies;
            if !found.is_empty() {
                next.insert(key, found);
            }
        }
        self.cross_dex.store(Arc::new(next));
        info!(
            "[CrossDex] {} pools, {} comparaisons, {} divergences.",
            report.pools, report.comparisons, report.inconsistencies
        );
        report
    }

    pub fn start(self: &Arc<Self>, timers: &TimerRegistry, interval: Duration) {
        let reconciler = Arc::clone(self);
        timers.spawn_periodic("cross-dex", interval, move || {
            let reconciler = reconciler.clone();
            async move {
                reconciler.run_check().await;
            }
        });
    }
}
