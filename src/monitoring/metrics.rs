// DANS : src/monitoring/metrics.rs

use crate::error::Result;
use chrono::{DateTime, Utc};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

// Compteurs monotones partagés par tous les composants, dans un `Registry` propre à l'instance
// (plusieurs services peuvent cohabiter dans un même processus, ex : les tests).
// Les taux ne sont jamais stockés : ils sont dérivés à la lecture (voir `MetricsSnapshot`).
pub struct MetricsRegistry {
    registry: Registry,
    request_count: IntCounter,
    error_count: IntCounter,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    consistency_checks: IntCounter,
    consistency_errors: IntCounter,
    cross_dex_checks: IntCounter,
    cross_dex_errors: IntCounter,
    backup_count: IntCounter,
    performance_alerts: IntCounter,
    total_response_time_ms: IntCounter,
    response_time: Histogram,
    last_error: RwLock<Option<ErrorStamp>>,
    last_alert_time: RwLock<Option<DateTime<Utc>>>,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Remet un compteur à une valeur sauvegardée.
fn set_counter(counter: &IntCounter, value: u64) {
    counter.reset();
    counter.inc_by(value);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStamp {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Photo des compteurs à un instant donné. C'est aussi la forme sauvegardée dans les backups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub consistency_checks: u64,
    pub consistency_errors: u64,
    pub cross_dex_checks: u64,
    pub cross_dex_errors: u64,
    pub backup_count: u64,
    pub performance_alerts: u64,
    pub total_response_time_ms: u64,
    pub last_error: Option<ErrorStamp>,
    pub last_alert_time: Option<DateTime<Utc>>,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 { 0.0 } else { numerator as f64 / denominator as f64 }
}

impl MetricsSnapshot {
    pub fn error_rate(&self) -> f64 {
        ratio(self.error_count, self.request_count)
    }

    pub fn average_response_time_ms(&self) -> f64 {
        ratio(self.total_response_time_ms, self.request_count)
    }

    pub fn cache_lookups(&self) -> u64 {
        self.cache_hits + self.cache_misses
    }

    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.cache_lookups())
    }

    pub fn consistency_error_rate(&self) -> f64 {
        ratio(self.consistency_errors, self.consistency_checks)
    }

    pub fn cross_dex_error_rate(&self) -> f64 {
        ratio(self.cross_dex_errors, self.cross_dex_checks)
    }

    /// Différence entre deux photos, pour raisonner sur une fenêtre récente
    /// plutôt que sur les totaux depuis le démarrage.
    pub fn delta_since(&self, earlier: &MetricsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            request_count: self.request_count.saturating_sub(earlier.request_count),
            error_count: self.error_count.saturating_sub(earlier.error_count),
            cache_hits: self.cache_hits.saturating_sub(earlier.cache_hits),
            cache_misses: self.cache_misses.saturating_sub(earlier.cache_misses),
            consistency_checks: self.consistency_checks.saturating_sub(earlier.consistency_checks),
            consistency_errors: self.consistency_errors.saturating_sub(earlier.consistency_errors),
            cross_dex_checks: self.cross_dex_checks.saturating_sub(earlier.cross_dex_checks),
            cross_dex_errors: self.cross_dex_errors.saturating_sub(earlier.cross_dex_errors),
            backup_count: self.backup_count.saturating_sub(earlier.backup_count),
            performance_alerts: self.performance_alerts.saturating_sub(earlier.performance_alerts),
            total_response_time_ms: self.total_response_time_ms.saturating_sub(earlier.total_response_time_ms),
            last_error: self.last_error.clone(),
            last_alert_time: self.last_alert_time,
        }
    }
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let response_time = Histogram::with_opts(HistogramOpts::new(
            "pool_monitor_response_time_seconds",
            "Distribution des temps de réponse des requêtes amont",
        ))?;
        registry.register(Box::new(response_time.clone()))?;

        Ok(Self {
            request_count: counter(&registry, "pool_monitor_requests_total", "Requêtes amont (réussies ou non)")?,
            error_count: counter(&registry, "pool_monitor_errors_total", "Erreurs signalées par les composants")?,
            cache_hits: counter(&registry, "pool_monitor_cache_hits_total", "Lectures servies par le cache")?,
            cache_misses: counter(&registry, "pool_monitor_cache_misses_total", "Lectures ayant nécessité un appel amont")?,
            consistency_checks: counter(&registry, "pool_monitor_consistency_checks_total", "Pools examinés par la vérification de cohérence")?,
            consistency_errors: counter(&registry, "pool_monitor_consistency_errors_total", "Incohérences cache / amont détectées")?,
            cross_dex_checks: counter(&registry, "pool_monitor_cross_dex_checks_total", "Comparaisons entre DEX")?,
            cross_dex_errors: counter(&registry, "pool_monitor_cross_dex_errors_total", "Écarts de prix entre DEX")?,
            backup_count: counter(&registry, "pool_monitor_backups_total", "Backups écrits")?,
            performance_alerts: counter(&registry, "pool_monitor_performance_alerts_total", "Alertes émises")?,
            total_response_time_ms: counter(&registry, "pool_monitor_response_time_ms_total", "Somme des temps de réponse (ms)")?,
            response_time,
            registry,
            last_error: RwLock::new(None),
            last_alert_time: RwLock::new(None),
        })
    }

    /// Une requête sortante (réussie ou non) et son temps de réponse.
    pub fn record_request(&self, elapsed: Duration) {
        self.request_count.inc();
        self.total_response_time_ms.inc_by(elapsed.as_millis() as u64);
        self.response_time.observe(elapsed.as_secs_f64());
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.error_count.inc();
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) =
            Some(ErrorStamp { message: message.into(), at: Utc::now() });
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.inc();
    }

    pub fn record_consistency_check(&self, inconsistent: bool) {
        self.consistency_checks.inc();
        if inconsistent {
            self.consistency_errors.inc();
        }
    }

    pub fn record_cross_dex_check(&self, inconsistent: bool) {
        self.cross_dex_checks.inc();
        if inconsistent {
            self.cross_dex_errors.inc();
        }
    }

    pub fn record_backup(&self) {
        self.backup_count.inc();
    }

    pub fn record_alert(&self) {
        self.performance_alerts.inc();
        *self.last_alert_time.write().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub fn backup_count(&self) -> u64 {
        self.backup_count.get()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            request_count: self.request_count.get(),
            error_count: self.error_count.get(),
            cache_hits: self.cache_hits.get(),
            cache_misses: self.cache_misses.get(),
            consistency_checks: self.consistency_checks.get(),
            consistency_errors: self.consistency_errors.get(),
            cross_dex_checks: self.cross_dex_checks.get(),
            cross_dex_errors: self.cross_dex_errors.get(),
            backup_count: self.backup_count.get(),
            performance_alerts: self.performance_alerts.get(),
            total_response_time_ms: self.total_response_time_ms.get(),
            last_error: self.last_error.read().unwrap_or_else(PoisonError::into_inner).clone(),
            last_alert_time: *self.last_alert_time.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Réinjecte des compteurs sauvegardés (restauration d'un backup).
    /// L'histogramme n'est pas sauvegardé : il repart de zéro.
    pub fn restore(&self, snapshot: &MetricsSnapshot) {
        set_counter(&self.request_count, snapshot.request_count);
        set_counter(&self.error_count, snapshot.error_count);
        set_counter(&self.cache_hits, snapshot.cache_hits);
        set_counter(&self.cache_misses, snapshot.cache_misses);
        set_counter(&self.consistency_checks, snapshot.consistency_checks);
        set_counter(&self.consistency_errors, snapshot.consistency_errors);
        set_counter(&self.cross_dex_checks, snapshot.cross_dex_checks);
        set_counter(&self.cross_dex_errors, snapshot.cross_dex_errors);
        set_counter(&self.backup_count, snapshot.backup_count);
        set_counter(&self.performance_alerts, snapshot.performance_alerts);
        set_counter(&self.total_response_time_ms, snapshot.total_response_time_ms);
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = snapshot.last_error.clone();
        *self.last_alert_time.write().unwrap_or_else(PoisonError::into_inner) = snapshot.last_alert_time;
    }

    /// Format texte Prometheus, pour un scrape ou un dump ponctuel.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
