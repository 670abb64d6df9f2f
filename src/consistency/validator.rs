// DANS : src/consistency/validator.rs

use super::{ConsistencyEvent, FieldDiff, FieldDiffs};
use crate::{
    config::DiffThresholds,
    data_pipeline::DexDataClient,
    error::{MonitorError, Result},
    events::{EventBus, MonitorEvent},
    monitoring::{AlertKind, AlertManager, MetricsRegistry, report_error},
    state::{PoolKey, PoolRecord, PoolSnapshot, PoolStore, TimerRegistry},
};
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tracing::{info, warn};

pub fn compare(cached: &PoolRecord, fresh: &PoolSnapshot, thresholds: &DiffThresholds) -> FieldDiffs {
    FieldDiffs {
        price: FieldDiff::compute(cached.price, fresh.price, thresholds.price),
        volume: FieldDiff::compute(cached.volume_24h, fresh.volume.h24, thresholds.volume),
        liquidity: FieldDiff::compute(
            cached.liquidity.to_f64().unwrap_or(0.0),
            fresh.liquidity.to_f64().unwrap_or(0.0),
            thresholds.liquidity,
        ),
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub checked: usize,
    pub inconsistent: usize,
    pub failed: usize,
}

/// Compare périodiquement le cache à un re-fetch de la source et corrige les écarts.
pub struct ConsistencyValidator {
    clients: HashMap<String, Arc<DexDataClient>>,
    store: Arc<PoolStore>,
    metrics: Arc<MetricsRegistry>,
    events: EventBus,
    alerts: Arc<AlertManager>,
    thresholds: DiffThresholds,
    log: Mutex<VecDeque<ConsistencyEvent>>,
    log_capacity: usize,
}

impl ConsistencyValidator {
    pub fn new(
        clients: &[Arc<DexDataClient>],
        store: Arc<PoolStore>,
        metrics: Arc<MetricsRegistry>,
        events: EventBus,
        alerts: Arc<AlertManager>,
        thresholds: DiffThresholds,
        log_capacity: usize,
    ) -> Self {
        Self {
            clients: clients.iter().map(|c| (c.dex().to_string(), c.clone())).collect(),
            store,
            metrics,
            events,
            alerts,
            thresholds,
            log: Mutex::new(VecDeque::with_capacity(log_capacity)),
            log_capacity: log_capacity.max(1),
        }
    }

    fn push_event(&self, event: ConsistencyEvent) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if log.len() == self.log_capacity {
            log.pop_front();
        }
        log.push_back(event);
    }

    /// Journal borné des incohérences, de la plus ancienne à la plus récente.
    pub fn recent_events(&self) -> Vec<ConsistencyEvent> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    /// Vérifie un pool. `Ok(Some(_))` quand un écart a été détecté et corrigé.
    pub async fn check_pool(&self, key: &PoolKey) -> Result<Option<ConsistencyEvent>> {
        let client = self
            .clients
            .get(key.dex())
            .ok_or_else(|| MonitorError::NotFound(format!("aucun client pour le DEX {}", key.dex())))?;
        let cached = self
            .store
            .get(key)
            .ok_or_else(|| MonitorError::NotFound(key.to_string()))?;

        // Un pool examiné compte comme une vérification, même si le re-fetch échoue.
        let fresh = match client.fetch_authoritative(key).await {
            Ok(fresh) => fresh,
            Err(e) => {
                self.metrics.record_consistency_check(false);
                return Err(e);
            }
        };
        let diffs = compare(&cached.record, &fresh, &self.thresholds);
        let inconsistent = diffs.any_exceeded();
        self.metrics.record_consistency_check(inconsistent);
        if !inconsistent {
            return Ok(None);
        }

        // La source fait foi : le cache est écrasé.
        self.store.apply_snapshot(key, &fresh);
        let event = ConsistencyEvent {
            timestamp: Utc::now(),
            pool_key: key.clone(),
            pool_address: cached.record.address.to_string(),
            field_diffs: diffs,
        };
        warn!(
            "[Consistency] Écart sur {} (prix {:.4}, volume {:.4}, liquidité {:.4}).",
            key,
            event.field_diffs.price.relative_difference,
            event.field_diffs.volume.relative_difference,
            event.field_diffs.liquidity.relative_difference
        );
        self.push_event(event.clone());
        self.events.publish(MonitorEvent::Inconsistency(event.clone()));
        let worst = [&event.field_diffs.price, &event.field_diffs.volume, &event.field_diffs.liquidity]
            .into_iter()
            .filter(|d| d.exceeded)
            .map(|d| (d.relative_difference, d.threshold))
            .fold((0.0_f64, 0.0_f64), |acc, d| if d.0 > acc.0 { d } else { acc });
        self.alerts.emit_alert(
            AlertKind::ConsistencyAlert,
            format!("Données incohérentes pour {}", key),
            worst.0,
            worst.1,
        );
        Ok(Some(event))
    }

    /// Un balayage complet des pools déjà rafraîchis au moins une fois.
    pub async fn run_check(&self) -> ConsistencyReport {
        let mut report = ConsistencyReport::default();
        let candidates: Vec<PoolKey> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|(key, entry)| entry.has_metrics() && self.clients.contains_key(key.dex()))
            .map(|(key, _)| key)
            .collect();

        for key in candidates {
            match self.check_pool(&key).await {
                Ok(found) => {
                    report.checked += 1;
                    if found.is_some() {
                        report.inconsistent += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    report_error(&self.metrics, &self.events, "Consistency", &format!("{} : {}", key, e));
                }
            }
        }
        info!(
            "[Consistency] Balayage terminé : {} vérifiés, {} incohérents, {} en échec.",
            report.checked, report.inconsistent, report.failed
        );
        report
    }

    pub fn start(self: &Arc<Self>, timers: &TimerRegistry, interval: Duration) {
        let validator = Arc::clone(self);
        timers.spawn_periodic("consistency", interval, move || {
            let validator = validator.clone();
            async move {
                validator.run_check().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VolumeWindows;
    use rust_decimal::Decimal;
    use solana_sdk::pubkey::Pubkey;

    #[test]
    fn compare_flags_only_exceeded_fields() {
        let mut cached = PoolRecord::detected("orca", Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique());
        cached.price = 100.0;
        cached.volume_24h = 1_000.0;
        cached.liquidity = Decimal::new(50_000, 0);
        let fresh = PoolSnapshot {
            address: cached.address,
            dex: "orca".into(),
            token_a_mint: cached.token_a_mint,
            token_b_mint: cached.token_b_mint,
            price: 110.0,
            volume: VolumeWindows { h24: 1_050.0, ..Default::default() },
            liquidity: Decimal::new(50_000, 0),
        };
        let diffs = compare(&cached, &fresh, &DiffThresholds::default());
        assert!(diffs.price.exceeded);
        assert!(!diffs.volume.exceeded);
        assert!(!diffs.liquidity.exceeded);
        assert!(diffs.any_exceeded());
    }
}
