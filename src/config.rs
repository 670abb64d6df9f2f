// DANS : src/config.rs

use crate::error::{MonitorError, Result};
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use tracing::warn;

// --- PROGRAMMES DEX CONNUS ---
pub const RAYDIUM_AMM_V4_PROGRAM_ID: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";
pub const RAYDIUM_CPMM_PROGRAM_ID: &str = "CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C";
pub const RAYDIUM_CLMM_PROGRAM_ID: &str = "CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK";
pub const ORCA_WHIRLPOOL_PROGRAM_ID: &str = "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc";
pub const METEORA_DLMM_PROGRAM_ID: &str = "LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo";
pub const PUMP_AMM_PROGRAM_ID: &str = "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA";

const ENV_PREFIX: &str = "POOL_MONITOR_";

/// Un DEX surveillé. `program_id` reste une chaîne : un identifiant invalide
/// doit faire échouer l'abonnement de ce DEX seulement, pas le chargement de la config.
#[derive(Debug, Clone, PartialEq)]
pub struct DexConfig {
    pub name: String,
    pub program_id: String,
    pub enabled: bool,
    /// Identifiant `dexId` côté DexScreener.
    pub dexscreener_id: String,
}

impl DexConfig {
    pub fn new(name: &str, program_id: &str, dexscreener_id: &str) -> Self {
        Self {
            name: name.to_string(),
            program_id: program_id.to_string(),
            enabled: true,
            dexscreener_id: dexscreener_id.to_string(),
        }
    }
}

pub fn default_dexes() -> Vec<DexConfig> {
    vec![
        DexConfig::new("raydium-amm-v4", RAYDIUM_AMM_V4_PROGRAM_ID, "raydium"),
        DexConfig::new("raydium-cpmm", RAYDIUM_CPMM_PROGRAM_ID, "raydium"),
        DexConfig::new("raydium-clmm", RAYDIUM_CLMM_PROGRAM_ID, "raydium"),
        DexConfig::new("orca-whirlpool", ORCA_WHIRLPOOL_PROGRAM_ID, "orca"),
        DexConfig::new("meteora-dlmm", METEORA_DLMM_PROGRAM_ID, "meteora"),
        DexConfig::new("pump-amm", PUMP_AMM_PROGRAM_ID, "pumpswap"),
    ]
}

#[derive(Debug, Clone)]
pub struct IntervalConfig {
    pub full_scan: Duration,
    pub monitoring: Duration,
    pub consistency: Duration,
    pub cross_dex: Duration,
    pub batch_adjustment: Duration,
    pub backup: Duration,
    pub alert_check: Duration,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            full_scan: Duration::from_secs(300),
            monitoring: Duration::from_secs(60),
            consistency: Duration::from_secs(120),
            cross_dex: Duration::from_secs(600),
            batch_adjustment: Duration::from_secs(30),
            backup: Duration::from_secs(3600),
            alert_check: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Délai minimum entre deux échecs consécutifs vers la même source.
    pub failure_cooldown: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            failure_cooldown: Duration::from_secs(1),
        }
    }
}

/// Seuils de différence relative (0.05 = 5 %).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffThresholds {
    pub price: f64,
    pub volume: f64,
    pub liquidity: f64,
}

impl Default for DiffThresholds {
    fn default() -> Self {
        Self { price: 0.05, volume: 0.10, liquidity: 0.15 }
    }
}

/// Seuils (en pourcentage) des événements de variation émis par la boucle de monitoring.
#[derive(Debug, Clone, Copy)]
pub struct ChangeThresholds {
    pub price_percent: f64,
    pub volume_percent: f64,
    pub liquidity_percent: f64,
}

impl Default for ChangeThresholds {
    fn default() -> Self {
        Self { price_percent: 5.0, volume_percent: 20.0, liquidity_percent: 10.0 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    pub min_liquidity: f64,
    pub critical_liquidity: f64,
    pub max_volume_liquidity_ratio: f64,
    pub min_volume_liquidity_ratio: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            min_liquidity: 10_000.0,
            critical_liquidity: 1_000.0,
            max_volume_liquidity_ratio: 5.0,
            min_volume_liquidity_ratio: 0.01,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub error_rate: f64,
    pub response_time_ms: f64,
    pub cache_hit_rate: f64,
    pub consistency_error_rate: f64,
    /// Pas d'alerte de cache avant ce nombre de lectures.
    pub min_cache_samples: u64,
    pub cooldown: Duration,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.10,
            response_time_ms: 2_000.0,
            cache_hit_rate: 0.50,
            consistency_error_rate: 0.20,
            min_cache_samples: 20,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub min_batch_size: usize,
    pub max_batch_size: usize,
    pub initial_batch_size: usize,
    pub step: usize,
    pub max_parallel: usize,
    pub inter_batch_delay: Duration,
    pub high_error_rate: f64,
    pub fast_response_ms: f64,
    pub slow_response_ms: f64,
    pub high_load: f64,
    pub max_requests_per_second: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            min_batch_size: 5,
            max_batch_size: 50,
            initial_batch_size: 10,
            step: 5,
            max_parallel: 5,
            inter_batch_delay: Duration::from_millis(200),
            high_error_rate: 0.10,
            fast_response_ms: 500.0,
            slow_response_ms: 2_000.0,
            high_load: 0.80,
            max_requests_per_second: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub time_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 300, time_window: Duration::from_secs(60) }
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub retention: Duration,
    pub restore_on_start: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("backups"),
            retention: Duration::from_secs(7 * 24 * 3600),
            restore_on_start: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub rpc_url: String,
    pub ws_url: String,
    pub dexes: Vec<DexConfig>,
    pub intervals: IntervalConfig,
    pub cache_ttl: Duration,
    pub consistency_log_capacity: usize,
    pub event_capacity: usize,
    pub retry: RetryConfig,
    pub consistency: DiffThresholds,
    pub cross_dex: DiffThresholds,
    pub changes: ChangeThresholds,
    pub health: HealthConfig,
    pub alerts: AlertThresholds,
    pub batch: BatchConfig,
    pub rate_limit: RateLimitConfig,
    pub backup: BackupConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_url: "wss://api.mainnet-beta.solana.com".to_string(),
            dexes: default_dexes(),
            intervals: IntervalConfig::default(),
            cache_ttl: Duration::from_secs(300),
            consistency_log_capacity: 1_000,
            event_capacity: 4_096,
            retry: RetryConfig::default(),
            consistency: DiffThresholds::default(),
            cross_dex: DiffThresholds { price: 0.05, volume: 0.10, liquidity: 0.15 },
            changes: ChangeThresholds::default(),
            health: HealthConfig::default(),
            alerts: AlertThresholds::default(),
            batch: BatchConfig::default(),
            rate_limit: RateLimitConfig::default(),
            backup: BackupConfig::default(),
        }
    }
}

/// Variables d'environnement (préfixe `POOL_MONITOR_`), toutes optionnelles.
/// Chaque variable présente écrase la valeur par défaut correspondante.
#[derive(Deserialize, Debug, Default)]
pub struct EnvOverrides {
    pub rpc_url: Option<String>,
    pub ws_url: Option<String>,
    pub enabled_dexes: Option<Vec<String>>,
    /// Entrées `nom=program_id` ajoutées à la liste des DEX.
    pub extra_dexes: Option<Vec<String>>,
    pub cache_ttl_secs: Option<u64>,
    pub full_scan_interval_secs: Option<u64>,
    pub monitoring_interval_secs: Option<u64>,
    pub consistency_interval_secs: Option<u64>,
    pub cross_dex_interval_secs: Option<u64>,
    pub batch_adjustment_interval_secs: Option<u64>,
    pub backup_interval_secs: Option<u64>,
    pub alert_check_interval_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub price_threshold: Option<f64>,
    pub volume_threshold: Option<f64>,
    pub liquidity_threshold: Option<f64>,
    pub cross_dex_price_threshold: Option<f64>,
    pub cross_dex_volume_threshold: Option<f64>,
    pub alert_error_rate: Option<f64>,
    pub alert_response_time_ms: Option<f64>,
    pub alert_cache_hit_rate: Option<f64>,
    pub alert_consistency_error_rate: Option<f64>,
    pub alert_cooldown_secs: Option<u64>,
    pub min_batch_size: Option<usize>,
    pub max_batch_size: Option<usize>,
    pub rate_limit_max_requests: Option<usize>,
    pub rate_limit_window_secs: Option<u64>,
    pub backup_enabled: Option<bool>,
    pub backup_dir: Option<PathBuf>,
    pub backup_retention_days: Option<u64>,
    pub restore_on_start: Option<bool>,
}

impl MonitorConfig {
    /// Charge `.env` puis les variables `POOL_MONITOR_*` par-dessus les valeurs par défaut.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let overrides = envy::prefixed(ENV_PREFIX)
            .from_env::<EnvOverrides>()
            .map_err(|e| MonitorError::Config(e.to_string()))?;
        let config = Self::default().with_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn with_overrides(mut self, o: EnvOverrides) -> Self {
        fn secs(v: Option<u64>, target: &mut Duration) {
            if let Some(v) = v {
                *target = Duration::from_secs(v);
            }
        }
        fn set<T>(v: Option<T>, target: &mut T) {
            if let Some(v) = v {
                *target = v;
            }
        }

        set(o.rpc_url, &mut self.rpc_url);
        set(o.ws_url, &mut self.ws_url);

        if let Some(extra) = o.extra_dexes {
            for entry in extra {
                match entry.split_once('=') {
                    Some((name, program_id)) => {
                        self.dexes.push(DexConfig::new(name.trim(), program_id.trim(), name.trim()))
                    }
                    None => warn!("[Config] Entrée EXTRA_DEXES ignorée (format nom=program_id attendu) : {}", entry),
                }
            }
        }
        if let Some(enabled) = o.enabled_dexes {
            for dex in &mut self.dexes {
                dex.enabled = enabled.iter().any(|name| name.trim() == dex.name);
            }
        }

        secs(o.cache_ttl_secs, &mut self.cache_ttl);
        secs(o.full_scan_interval_secs, &mut self.intervals.full_scan);
        secs(o.monitoring_interval_secs, &mut self.intervals.monitoring);
        secs(o.consistency_interval_secs, &mut self.intervals.consistency);
        secs(o.cross_dex_interval_secs, &mut self.intervals.cross_dex);
        secs(o.batch_adjustment_interval_secs, &mut self.intervals.batch_adjustment);
        secs(o.backup_interval_secs, &mut self.intervals.backup);
        secs(o.alert_check_interval_secs, &mut self.intervals.alert_check);

        set(o.max_retries, &mut self.retry.max_retries);
        if let Some(ms) = o.retry_base_delay_ms {
            self.retry.base_delay = Duration::from_millis(ms);
        }

        set(o.price_threshold, &mut self.consistency.price);
        set(o.volume_threshold, &mut self.consistency.volume);
        set(o.liquidity_threshold, &mut self.consistency.liquidity);
        set(o.cross_dex_price_threshold, &mut self.cross_dex.price);
        set(o.cross_dex_volume_threshold, &mut self.cross_dex.volume);

        set(o.alert_error_rate, &mut self.alerts.error_rate);
        set(o.alert_response_time_ms, &mut self.alerts.response_time_ms);
        set(o.alert_cache_hit_rate, &mut self.alerts.cache_hit_rate);
        set(o.alert_consistency_error_rate, &mut self.alerts.consistency_error_rate);
        secs(o.alert_cooldown_secs, &mut self.alerts.cooldown);

        set(o.min_batch_size, &mut self.batch.min_batch_size);
        set(o.max_batch_size, &mut self.batch.max_batch_size);
        self.batch.initial_batch_size =
            self.batch.initial_batch_size.clamp(self.batch.min_batch_size, self.batch.max_batch_size.max(self.batch.min_batch_size));

        set(o.rate_limit_max_requests, &mut self.rate_limit.max_requests);
        secs(o.rate_limit_window_secs, &mut self.rate_limit.time_window);

        set(o.backup_enabled, &mut self.backup.enabled);
        set(o.backup_dir, &mut self.backup.dir);
        if let Some(days) = o.backup_retention_days {
            self.backup.retention = Duration::from_secs(days * 24 * 3600);
        }
        set(o.restore_on_start, &mut self.backup.restore_on_start);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.min_batch_size == 0 || self.batch.min_batch_size > self.batch.max_batch_size {
            return Err(MonitorError::Config(format!(
                "bornes de lot invalides : [{}, {}]",
                self.batch.min_batch_size, self.batch.max_batch_size
            )));
        }
        if self.rate_limit.max_requests == 0 || self.rate_limit.time_window.is_zero() {
            return Err(MonitorError::Config("rate limiter : max_requests et time_window doivent être > 0".into()));
        }
        if self.cache_ttl.is_zero() {
            return Err(MonitorError::Config("cache_ttl doit être > 0".into()));
        }
        // Chaque intervalle alimente un `tokio::time::interval`, qui refuse une période nulle.
        let intervals = &self.intervals;
        for (name, period) in [
            ("full_scan_interval", intervals.full_scan),
            ("monitoring_interval", intervals.monitoring),
            ("consistency_interval", intervals.consistency),
            ("cross_dex_interval", intervals.cross_dex),
            ("batch_adjustment_interval", intervals.batch_adjustment),
            ("backup_interval", intervals.backup),
            ("alert_check_interval", intervals.alert_check),
        ] {
            if period.is_zero() {
                return Err(MonitorError::Config(format!("{} doit être > 0", name)));
            }
        }
        for (name, value) in [
            ("price_threshold", self.consistency.price),
            ("volume_threshold", self.consistency.volume),
            ("liquidity_threshold", self.consistency.liquidity),
            ("cross_dex_price_threshold", self.cross_dex.price),
            ("cross_dex_volume_threshold", self.cross_dex.volume),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(MonitorError::Config(format!("{} doit être un nombre positif (reçu {})", name, value)));
            }
        }
        Ok(())
    }

    pub fn enabled_dexes(&self) -> impl Iterator<Item = &DexConfig> {
        self.dexes.iter().filter(|dex| dex.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.consistency, DiffThresholds { price: 0.05, volume: 0.10, liquidity: 0.15 });
        assert_eq!(config.backup.retention, Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn overrides_replace_only_present_fields() {
        let overrides = EnvOverrides {
            cache_ttl_secs: Some(60),
            price_threshold: Some(0.02),
            enabled_dexes: Some(vec!["orca-whirlpool".into()]),
            extra_dexes: Some(vec!["custom=11111111111111111111111111111111".into(), "broken".into()]),
            ..Default::default()
        };
        let config = MonitorConfig::default().with_overrides(overrides);

        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.consistency.price, 0.02);
        assert_eq!(config.consistency.volume, 0.10);
        let enabled: Vec<&str> = config.enabled_dexes().map(|d| d.name.as_str()).collect();
        assert_eq!(enabled, vec!["orca-whirlpool"]);
        assert!(config.dexes.iter().any(|d| d.name == "custom"));
    }

    #[test]
    fn inverted_batch_bounds_are_rejected() {
        let overrides = EnvOverrides { min_batch_size: Some(40), max_batch_size: Some(10), ..Default::default() };
        let config = MonitorConfig::default().with_overrides(overrides);
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
    }

    #[test]
    fn negative_thresholds_are_rejected() {
        let overrides = EnvOverrides { volume_threshold: Some(-1.0), ..Default::default() };
        let config = MonitorConfig::default().with_overrides(overrides);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let overrides = EnvOverrides { monitoring_interval_secs: Some(0), ..Default::default() };
        let config = MonitorConfig::default().with_overrides(overrides);
        assert!(matches!(config.validate(), Err(MonitorError::Config(msg)) if msg.contains("monitoring_interval")));

        let mut config = MonitorConfig::default();
        config.intervals.alert_check = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
