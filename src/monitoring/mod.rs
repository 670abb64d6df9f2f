pub mod alerts;
pub mod logging;
pub mod metrics;

pub use alerts::{Alert, AlertKind, AlertManager};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

use crate::events::{ErrorEvent, EventBus, MonitorEvent};
use chrono::Utc;
use std::fmt::Display;
use tracing::error;

/// Point de sortie commun des erreurs aux frontières d'opération :
/// log avec contexte, compteur d'erreurs, événement `Error`. Jamais fatal.
pub fn report_error(metrics: &MetricsRegistry, events: &EventBus, context: &str, err: &impl Display) {
    let message = err.to_string();
    error!("[{}] {}", context, message);
    metrics.record_error(format!("{}: {}", context, message));
    events.publish(MonitorEvent::Error(ErrorEvent {
        context: context.to_string(),
        message,
        timestamp: Utc::now(),
    }));
}
