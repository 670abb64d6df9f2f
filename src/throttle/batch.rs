// DANS : src/throttle/batch.rs

use crate::{
    config::BatchConfig,
    monitoring::{MetricsRegistry, MetricsSnapshot},
};
use futures_util::{StreamExt, stream};
use std::{
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, info};

const MIN_INTER_BATCH_DELAY: Duration = Duration::from_millis(25);
const MAX_INTER_BATCH_DELAY: Duration = Duration::from_secs(5);

/// Activité récente observée entre deux ajustements.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchObservation {
    pub error_rate: f64,
    pub average_response_ms: f64,
    pub requests_per_second: f64,
}

impl BatchObservation {
    fn from_delta(delta: &MetricsSnapshot, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        Self {
            error_rate: delta.error_rate(),
            average_response_ms: delta.average_response_time_ms(),
            requests_per_second: if secs > 0.0 { delta.request_count as f64 / secs } else { 0.0 },
        }
    }
}

/// Taille de lot adaptative et délai inter-lots, pilotés par les métriques récentes.
pub struct AdaptiveBatchController {
    config: BatchConfig,
    metrics: Arc<MetricsRegistry>,
    current_batch_size: AtomicUsize,
    inter_batch_delay_ms: AtomicU64,
    last_adjustment: Mutex<(MetricsSnapshot, Instant)>,
}

impl AdaptiveBatchController {
    pub fn new(config: BatchConfig, metrics: Arc<MetricsRegistry>) -> Self {
        let initial = config.initial_batch_size.clamp(config.min_batch_size, config.max_batch_size);
        let delay = config.inter_batch_delay.as_millis() as u64;
        let baseline = metrics.snapshot();
        Self {
            config,
            metrics,
            current_batch_size: AtomicUsize::new(initial),
            inter_batch_delay_ms: AtomicU64::new(delay),
            last_adjustment: Mutex::new((baseline, Instant::now())),
        }
    }

    pub fn current_batch_size(&self) -> usize {
        self.current_batch_size.load(Ordering::Relaxed)
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms.load(Ordering::Relaxed))
    }

    /// Score de charge composite dans [0, 1].
    pub fn system_load(&self, obs: &BatchObservation) -> f64 {
        let rps_part = if self.config.max_requests_per_second > 0.0 {
            (obs.requests_per_second / self.config.max_requests_per_second).min(1.0)
        } else {
            0.0
        };
        let latency_part = if self.config.slow_response_ms > 0.0 {
            (obs.average_response_ms / self.config.slow_response_ms).min(1.0)
        } else {
            0.0
        };
        0.4 * rps_part + 0.3 * obs.error_rate.min(1.0) + 0.3 * latency_part
    }

    /// Ajustement depuis les deltas de métriques accumulés depuis le dernier appel.
    pub fn adjust(&self) -> usize {
        let now_snapshot = self.metrics.snapshot();
        let observation = {
            let mut last = self.last_adjustment.lock().unwrap_or_else(PoisonError::into_inner);
            let delta = now_snapshot.delta_since(&last.0);
            let observation = BatchObservation::from_delta(&delta, last.1.elapsed());
            *last = (now_snapshot, Instant::now());
            observation
        };
        self.adjust_with(&observation)
    }

    /// Règles d'ajustement, sur une observation donnée. Retourne la nouvelle taille.
    pub fn adjust_with(&self, obs: &BatchObservation) -> usize {
        let c = &self.config;
        let load = self.system_load(obs);
        let current = self.current_batch_size();

        let next = if obs.error_rate > c.high_error_rate || load > c.high_load {
            current.saturating_sub(c.step)
        } else if obs.average_response_ms < c.fast_response_ms && load < c.high_load {
            current + c.step
        } else {
            current
        }
        .clamp(c.min_batch_size, c.max_batch_size);

        let delay = self.inter_batch_delay();
        let next_delay = if obs.error_rate > c.high_error_rate {
            (delay * 2).min(MAX_INTER_BATCH_DELAY)
        } else if obs.average_response_ms < c.fast_response_ms {
            (delay / 2).max(MIN_INTER_BATCH_DELAY)
        } else {
            delay
        };

        self.current_batch_size.store(next, Ordering::Relaxed);
        self.inter_batch_delay_ms.store(next_delay.as_millis() as u64, Ordering::Relaxed);
        if next != current {
            info!(
                "[Batch] Taille de lot {} -> {} (erreurs {:.2}, latence {:.0} ms, charge {:.2})",
                current, next, obs.error_rate, obs.average_response_ms, load
            );
        }
        next
    }

    /// Exécute `task` sur chaque élément, par lots de `current_batch_size`,
    /// avec au plus `max_parallel` tâches simultanées et une pause entre les lots.
    pub async fn run_batched<T, F, Fut>(&self, items: Vec<T>, task: F) -> Vec<Fut::Output>
    where
        F: Fn(T) -> Fut,
        Fut: Future,
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        let mut remaining = items.into_iter().peekable();
        let mut batch_index = 0;

        while remaining.peek().is_some() {
            let batch: Vec<T> = remaining.by_ref().take(self.current_batch_size()).collect();
            debug!("[Batch] Lot #{} : {} éléments.", batch_index, batch.len());
            let mut outputs: Vec<Fut::Output> = stream::iter(batch)
                .map(&task)
                .buffer_unordered(self.config.max_parallel.max(1))
                .collect()
                .await;
            results.append(&mut outputs);
            batch_index += 1;

            if remaining.peek().is_some() {
                tokio::time::sleep(self.inter_batch_delay()).await;
            }
        }
        results
    }
}
