// DANS : src/data_pipeline/dex_client.rs

use super::{retry::RetryPolicy, source::PoolDataSource};
use crate::{
    config::{ChangeThresholds, HealthConfig, RetryConfig},
    error::{MonitorError, Result},
    events::{
        EventBus, LiquidityChange, LiquidityHealthReport, MonitorEvent, PriceChange, SystemEvent, SystemEventKind,
        VolumeChange,
    },
    monitoring::{MetricsRegistry, report_error},
    state::{CachedPool, PoolKey, PoolSnapshot, PoolStore, Timeframe, TimerRegistry},
    throttle::{AdaptiveBatchController, SlidingWindowRateLimiter},
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LiquidityHealth {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityData {
    pub liquidity: Decimal,
    pub volume_24h: f64,
    pub volume_to_liquidity_ratio: f64,
    pub health: LiquidityHealth,
}

/// Classement de santé d'un pool, avec les raisons lisibles.
pub fn assess_liquidity(config: &HealthConfig, liquidity: Decimal, volume_24h: f64) -> (LiquidityHealth, f64, Vec<String>) {
    let liquidity_f = liquidity.to_f64().unwrap_or(0.0);
    let ratio = if liquidity_f > 0.0 { volume_24h / liquidity_f } else { 0.0 };
    let mut reasons = Vec::new();

    let mut health = if liquidity_f < config.critical_liquidity {
        reasons.push(format!("liquidité {:.2} sous le seuil critique {:.2}", liquidity_f, config.critical_liquidity));
        LiquidityHealth::Critical
    } else if liquidity_f < config.min_liquidity {
        reasons.push(format!("liquidité {:.2} sous le minimum {:.2}", liquidity_f, config.min_liquidity));
        LiquidityHealth::Warning
    } else {
        LiquidityHealth::Healthy
    };

    if liquidity_f > 0.0 {
        if ratio > config.max_volume_liquidity_ratio {
            reasons.push(format!("ratio volume/liquidité {:.3} au-dessus de {:.3}", ratio, config.max_volume_liquidity_ratio));
        } else if ratio < config.min_volume_liquidity_ratio {
            reasons.push(format!("ratio volume/liquidité {:.3} sous {:.3}", ratio, config.min_volume_liquidity_ratio));
        }
        if health == LiquidityHealth::Healthy && !reasons.is_empty() {
            health = LiquidityHealth::Warning;
        }
    }
    (health, ratio, reasons)
}

fn percent_change(old: f64, new: f64) -> Option<f64> {
    if old == 0.0 { None } else { Some((new - old) / old * 100.0) }
}

/// Dépendances partagées entre tous les clients (un client par DEX).
#[derive(Clone)]
pub struct SharedResources {
    pub store: Arc<PoolStore>,
    pub metrics: Arc<MetricsRegistry>,
    pub events: EventBus,
    pub rate_limiter: Arc<SlidingWindowRateLimiter>,
    pub batch: Arc<AdaptiveBatchController>,
    pub timers: Arc<TimerRegistry>,
}

/// Client de données d'un DEX : cache TTL devant une `PoolDataSource`,
/// boucle de monitoring, détection des variations et santé de liquidité.
pub struct DexDataClient {
    source: Arc<dyn PoolDataSource>,
    shared: SharedResources,
    retry: RetryPolicy,
    changes: ChangeThresholds,
    health: HealthConfig,
}

impl DexDataClient {
    pub fn new(
        source: Arc<dyn PoolDataSource>,
        shared: SharedResources,
        retry: &RetryConfig,
        changes: ChangeThresholds,
        health: HealthConfig,
    ) -> Self {
        Self { source, shared, retry: RetryPolicy::new(retry), changes, health }
    }

    pub fn dex(&self) -> &str {
        self.source.dex()
    }

    fn timer_name(&self) -> String {
        format!("monitoring:{}", self.dex())
    }

    // --- APPELS AMONT (rate limiter + retry + métriques) ---

    async fn upstream<T, F, Fut>(&self, label: &str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.retry
            .run(label, || async {
                self.shared.rate_limiter.acquire().await;
                let start = Instant::now();
                let result = call().await;
                self.shared.metrics.record_request(start.elapsed());
                result
            })
            .await
    }

    async fn fetch_snapshot(&self, address: &Pubkey) -> Result<PoolSnapshot> {
        let label = format!("{} fetch_pool {}", self.dex(), address);
        self.upstream(&label, || self.source.fetch_pool(address))
            .await?
            .ok_or_else(|| MonitorError::NotFound(format!("{}:{}", self.dex(), address)))
    }

    // --- LECTURES À TRAVERS LE CACHE ---

    async fn resolve_by_mint(&self, mint: &Pubkey) -> Result<CachedPool> {
        let known = self.shared.store.find_by_mint(self.dex(), mint);
        if let Some(entry) = known.as_ref().and_then(|key| self.shared.store.get_fresh(key)) {
            self.shared.metrics.record_cache_hit();
            return Ok(entry);
        }
        self.shared.metrics.record_cache_miss();

        let snapshot = match known.as_ref().and_then(|key| self.shared.store.record(key)) {
            Some(record) => self.fetch_snapshot(&record.address).await?,
            None => {
                let label = format!("{} find_pool_by_mint {}", self.dex(), mint);
                self.upstream(&label, || self.source.find_pool_by_mint(mint))
                    .await?
                    .ok_or_else(|| MonitorError::NotFound(format!("aucun pool {} pour le mint {}", self.dex(), mint)))?
            }
        };
        let key = PoolKey::new(self.dex(), &snapshot.address);
        self.shared.store.apply_snapshot(&key, &snapshot);
        self.shared
            .store
            .get(&key)
            .ok_or_else(|| MonitorError::NotFound(key.to_string()))
    }

    pub async fn get_token_price(&self, mint: &Pubkey) -> Result<f64> {
        Ok(self.resolve_by_mint(mint).await?.record.price)
    }

    pub async fn get_token_volume(&self, mint: &Pubkey, timeframe: Timeframe) -> Result<f64> {
        Ok(self.resolve_by_mint(mint).await?.volumes.get(timeframe))
    }

    pub async fn get_token_liquidity(&self, mint: &Pubkey) -> Result<LiquidityData> {
        let entry = self.resolve_by_mint(mint).await?;
        let (health, ratio, _) = assess_liquidity(&self.health, entry.record.liquidity, entry.record.volume_24h);
        Ok(LiquidityData {
            liquidity: entry.record.liquidity,
            volume_24h: entry.record.volume_24h,
            volume_to_liquidity_ratio: ratio,
            health,
        })
    }

    // --- RAFRAÎCHISSEMENT ---

    /// Re-fetch sans passer par le cache et sans l'écrire.
    pub async fn fetch_authoritative(&self, key: &PoolKey) -> Result<PoolSnapshot> {
        let record = self
            .shared
            .store
            .record(key)
            .ok_or_else(|| MonitorError::NotFound(key.to_string()))?;
        self.fetch_snapshot(&record.address).await
    }

    /// Rafraîchit un pool connu, puis émet les événements de variation et de santé.
    pub async fn refresh_pool(&self, key: &PoolKey) -> Result<CachedPool> {
        let snapshot = self.fetch_authoritative(key).await?;
        let previous = self.shared.store.apply_snapshot(key, &snapshot);
        let current = self
            .shared
            .store
            .get(key)
            .ok_or_else(|| MonitorError::NotFound(key.to_string()))?;

        if let Some(previous) = previous.filter(CachedPool::has_metrics) {
            self.emit_changes(key, &previous, &current);
        }
        self.emit_health(key, &current);
        Ok(current)
    }

    fn emit_changes(&self, key: &PoolKey, previous: &CachedPool, current: &CachedPool) {
        let (old, new) = (&previous.record, &current.record);
        let events = &self.shared.events;

        if let Some(pct) = percent_change(old.price, new.price).filter(|p| p.abs() >= self.changes.price_percent) {
            debug!("[DexClient] {} prix {:+.2}%", key, pct);
            events.publish(MonitorEvent::PriceChange(PriceChange {
                pool: key.clone(),
                old_price: old.price,
                new_price: new.price,
                price_change_percent: pct,
            }));
        }
        if let Some(pct) =
            percent_change(old.volume_24h, new.volume_24h).filter(|p| p.abs() >= self.changes.volume_percent)
        {
            events.publish(MonitorEvent::VolumeChange(VolumeChange {
                pool: key.clone(),
                old_volume: old.volume_24h,
                new_volume: new.volume_24h,
                volume_change_percent: pct,
            }));
        }
        let (old_liq, new_liq) = (old.liquidity.to_f64().unwrap_or(0.0), new.liquidity.to_f64().unwrap_or(0.0));
        if let Some(pct) = percent_change(old_liq, new_liq).filter(|p| p.abs() >= self.changes.liquidity_percent) {
            events.publish(MonitorEvent::LiquidityChange(LiquidityChange {
                pool: key.clone(),
                old_liquidity: old.liquidity,
                new_liquidity: new.liquidity,
                liquidity_change_percent: pct,
            }));
        }
    }

    fn emit_health(&self, key: &PoolKey, current: &CachedPool) {
        let (health, ratio, reasons) = assess_liquidity(&self.health, current.record.liquidity, current.record.volume_24h);
        if health != LiquidityHealth::Healthy {
            self.shared.events.publish(MonitorEvent::LiquidityHealth(LiquidityHealthReport {
                pool: key.clone(),
                health,
                liquidity: current.record.liquidity,
                volume_to_liquidity_ratio: ratio,
                reasons,
            }));
        }
    }

    /// Recherche cross-dex : le pool de ce DEX pour la paire donnée.
    pub async fn find_pair(&self, mint_a: &Pubkey, mint_b: &Pubkey) -> Result<Option<PoolSnapshot>> {
        let label = format!("{} find_pool_by_pair", self.dex());
        self.upstream(&label, || self.source.find_pool_by_pair(mint_a, mint_b)).await
    }

    // --- BOUCLE DE MONITORING ---

    async fn refresh_keys(&self, keys: Vec<PoolKey>) -> (usize, usize) {
        let results = self
            .shared
            .batch
            .run_batched(keys, |key| async move {
                let result = self.refresh_pool(&key).await;
                (key, result)
            })
            .await;

        let mut failed = 0;
        for (key, result) in &results {
            if let Err(e) = result {
                failed += 1;
                report_error(&self.shared.metrics, &self.shared.events, "DexClient", &format!("{} : {}", key, e));
            }
        }
        (results.len() - failed, failed)
    }

    /// Un passage complet sur tous les pools connus de ce DEX.
    pub async fn monitoring_pass(&self) -> (usize, usize) {
        let keys: Vec<PoolKey> = self
            .shared
            .store
            .snapshot_for_dex(self.dex())
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        if keys.is_empty() {
            return (0, 0);
        }
        let (ok, failed) = self.refresh_keys(keys).await;
        info!("[DexClient] {} : passage terminé, {} rafraîchis, {} en échec.", self.dex(), ok, failed);
        (ok, failed)
    }

    /// Ne rafraîchit que les pools dont les métriques sont sorties du TTL.
    pub async fn optimize_api_calls(&self) -> usize {
        let stale: Vec<PoolKey> = self
            .shared
            .store
            .snapshot_for_dex(self.dex())
            .into_iter()
            .filter(|(key, _)| self.shared.store.get_fresh(key).is_none())
            .map(|(key, _)| key)
            .collect();
        let skipped = self.shared.store.snapshot_for_dex(self.dex()).len().saturating_sub(stale.len());
        debug!("[DexClient] {} : {} pools à rafraîchir, {} encore frais.", self.dex(), stale.len(), skipped);
        let (ok, _) = self.refresh_keys(stale).await;
        ok
    }

    pub fn start_monitoring(self: &Arc<Self>, interval: Duration) {
        let client = Arc::clone(self);
        self.shared.timers.spawn_periodic(self.timer_name(), interval, move || {
            let client = client.clone();
            async move {
                client.monitoring_pass().await;
            }
        });
        info!("[DexClient] Monitoring de {} démarré (intervalle {:?}).", self.dex(), interval);
        self.shared.events.publish(MonitorEvent::System(SystemEvent::new(
            SystemEventKind::MonitoringStarted,
            self.dex(),
        )));
    }

    /// Arrête la boucle de monitoring et publie un dernier état des métriques.
    pub fn stop(&self) {
        self.shared.timers.cancel_prefix(&self.timer_name());
        let snapshot = self.shared.metrics.snapshot();
        info!(
            "[DexClient] {} arrêté. requêtes={} erreurs={} cache={:.2}",
            self.dex(),
            snapshot.request_count,
            snapshot.error_count,
            snapshot.cache_hit_rate()
        );
        let events = &self.shared.events;
        events.publish(MonitorEvent::System(SystemEvent::new(SystemEventKind::MonitoringStopped, self.dex())));
        events.publish(MonitorEvent::System(SystemEvent::new(
            SystemEventKind::MetricsFlushed,
            format!("{} requests={} errors={}", self.dex(), snapshot.request_count, snapshot.error_count),
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_rules() {
        let config = HealthConfig::default();
        let (health, _, reasons) = assess_liquidity(&config, Decimal::new(500, 0), 10.0);
        assert_eq!(health, LiquidityHealth::Critical);
        assert_eq!(reasons.len(), 1);

        let (health, _, _) = assess_liquidity(&config, Decimal::new(5_000, 0), 1_000.0);
        assert_eq!(health, LiquidityHealth::Warning);

        let (health, ratio, _) = assess_liquidity(&config, Decimal::new(100_000, 0), 50_000.0);
        assert_eq!(health, LiquidityHealth::Healthy);
        assert_eq!(ratio, 0.5);

        // Volume anormal par rapport à la liquidité.
        let (health, _, reasons) = assess_liquidity(&config, Decimal::new(100_000, 0), 1_000_000.0);
        assert_eq!(health, LiquidityHealth::Warning);
        assert!(reasons[0].contains("ratio"));

        // Pool quasi inactif.
        let (health, _, _) = assess_liquidity(&config, Decimal::new(100_000, 0), 10.0);
        assert_eq!(health, LiquidityHealth::Warning);
    }

    #[test]
    fn percent_change_ignores_zero_baseline() {
        assert_eq!(percent_change(0.0, 5.0), None);
        assert_eq!(percent_change(2.0, 3.0), Some(50.0));
        assert_eq!(percent_change(4.0, 3.0), Some(-25.0));
    }
}
