// DANS : src/monitoring/alerts.rs

use super::metrics::MetricsRegistry;
use crate::{
    config::AlertThresholds,
    events::{EventBus, MonitorEvent},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertKind {
    ConsistencyAlert,
    HighErrorRate,
    HighResponseTime,
    LowCacheHitRate,
    HighConsistencyErrorRate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

/// Émet les alertes, avec un cooldown par type d'alerte.
pub struct AlertManager {
    thresholds: AlertThresholds,
    metrics: Arc<MetricsRegistry>,
    events: EventBus,
    last_emitted: Mutex<HashMap<AlertKind, Instant>>,
}

impl AlertManager {
    pub fn new(thresholds: AlertThresholds, metrics: Arc<MetricsRegistry>, events: EventBus) -> Self {
        Self { thresholds, metrics, events, last_emitted: Mutex::new(HashMap::new()) }
    }

    /// Retourne `false` si l'alerte a été absorbée par le cooldown de son type.
    pub fn emit_alert(&self, kind: AlertKind, message: impl Into<String>, value: f64, threshold: f64) -> bool {
        {
            let mut last = self.last_emitted.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if let Some(previous) = last.get(&kind) {
                if now.duration_since(*previous) < self.thresholds.cooldown {
                    debug!("[Alerts] {:?} ignorée (cooldown).", kind);
                    return false;
                }
            }
            last.insert(kind, now);
        }

        let alert = Alert { kind, message: message.into(), value, threshold, timestamp: Utc::now() };
        warn!("[Alerts] {:?} : {} (valeur {:.4}, seuil {:.4})", alert.kind, alert.message, value, threshold);
        self.metrics.record_alert();
        self.events.publish(MonitorEvent::Alert(alert));
        true
    }

    /// Compare les taux dérivés aux seuils. Retourne les alertes effectivement émises.
    pub fn check_thresholds(&self) -> Vec<AlertKind> {
        let snapshot = self.metrics.snapshot();
        let t = &self.thresholds;
        let mut emitted = Vec::new();

        let error_rate = snapshot.error_rate();
        if snapshot.request_count > 0
            && error_rate > t.error_rate
            && self.emit_alert(AlertKind::HighErrorRate, "Taux d'erreur élevé", error_rate, t.error_rate)
        {
            emitted.push(AlertKind::HighErrorRate);
        }

        let avg = snapshot.average_response_time_ms();
        if avg > t.response_time_ms
            && self.emit_alert(AlertKind::HighResponseTime, "Temps de réponse moyen élevé", avg, t.response_time_ms)
        {
            emitted.push(AlertKind::HighResponseTime);
        }

        let hit_rate = snapshot.cache_hit_rate();
        if snapshot.cache_lookups() >= t.min_cache_samples
            && hit_rate < t.cache_hit_rate
            && self.emit_alert(AlertKind::LowCacheHitRate, "Taux de succès du cache faible", hit_rate, t.cache_hit_rate)
        {
            emitted.push(AlertKind::LowCacheHitRate);
        }

        let consistency_rate = snapshot.consistency_error_rate();
        if snapshot.consistency_checks > 0
            && consistency_rate > t.consistency_error_rate
            && self.emit_alert(
                AlertKind::HighConsistencyErrorRate,
                "Taux d'incohérence élevé",
                consistency_rate,
                t.consistency_error_rate,
            )
        {
            emitted.push(AlertKind::HighConsistencyErrorRate);
        }

        emitted
    }
}
