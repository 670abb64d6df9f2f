// DANS : src/events.rs

use crate::{
    consistency::ConsistencyEvent,
    data_pipeline::LiquidityHealth,
    monitoring::alerts::Alert,
    state::{PoolKey, PoolRecord},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

// --- PROTOCOLE DES ÉVÉNEMENTS ÉMIS VERS LES CONSOMMATEURS EXTERNES ---
// Un type de payload par type d'événement, pas de dispatch par chaîne de caractères.

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum MonitorEvent {
    NewPool(PoolRecord),
    System(SystemEvent),
    PriceChange(PriceChange),
    VolumeChange(VolumeChange),
    LiquidityChange(LiquidityChange),
    LiquidityHealth(LiquidityHealthReport),
    Inconsistency(ConsistencyEvent),
    CrossDexInconsistency(CrossDexInconsistency),
    Alert(Alert),
    Error(ErrorEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SystemEventKind {
    PoolDetected,
    SubscriptionsStarted,
    FullScanCompleted,
    MonitoringStarted,
    MonitoringStopped,
    MetricsFlushed,
    BackupCompleted,
    RestoreCompleted,
    ServiceStarted,
    ServiceStopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    pub kind: SystemEventKind,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

impl SystemEvent {
    pub fn new(kind: SystemEventKind, details: impl Into<String>) -> Self {
        Self { kind, timestamp: Utc::now(), details: details.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub pool: PoolKey,
    pub old_price: f64,
    pub new_price: f64,
    pub price_change_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeChange {
    pub pool: PoolKey,
    pub old_volume: f64,
    pub new_volume: f64,
    pub volume_change_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityChange {
    pub pool: PoolKey,
    pub old_liquidity: Decimal,
    pub new_liquidity: Decimal,
    pub liquidity_change_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityHealthReport {
    pub pool: PoolKey,
    pub health: LiquidityHealth,
    pub liquidity: Decimal,
    pub volume_to_liquidity_ratio: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    Price,
    Volume,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossDexInconsistency {
    pub pool_address: String,
    pub cross_dex: String,
    pub data_type: DataType,
    pub local_value: f64,
    pub cross_dex_value: f64,
    pub difference: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    pub context: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Canal publish/subscribe typé, construit une fois et partagé par référence.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MonitorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publie sans bloquer. Sans abonné, l'événement est simplement perdu.
    pub fn publish(&self, event: MonitorEvent) {
        if self.sender.send(event).is_err() {
            trace!("[Events] Aucun abonné, événement ignoré.");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
