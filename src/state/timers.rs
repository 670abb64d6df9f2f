// DANS : src/state/timers.rs

use std::{
    future::Future,
    sync::{Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::debug;

struct TimerEntry {
    name: String,
    handle: JoinHandle<()>,
    /// Présent pour les boucles périodiques : le lâcher arrête la boucle entre deux passages.
    stop: Option<watch::Sender<()>>,
}

impl TimerEntry {
    fn cancel(self) {
        debug!("[Timers] Annulation de '{}'.", self.name);
        match self.stop {
            // Le passage en cours va jusqu'au bout, seul le prochain tick est abandonné.
            Some(stop) => drop(stop),
            None => self.handle.abort(),
        }
    }
}

/// Registre unique de toutes les tâches de fond (timers périodiques, relais d'abonnements).
/// Après `cancel_all`, plus aucun passage ne démarre ; un passage déjà lancé se termine normalement.
#[derive(Default)]
pub struct TimerRegistry {
    entries: Mutex<Vec<TimerEntry>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lance `task` toutes les `period` (non nulle, garanti par `MonitorConfig::validate`).
    /// Le premier passage a lieu après une période complète.
    pub fn spawn_periodic<F, Fut>(&self, name: impl Into<String>, period: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (stop, mut stopped) = watch::channel(());
        let loop_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Le premier tick est immédiat, on le consomme.
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    _ = interval.tick() => {}
                }
                task().await;
            }
            debug!("[Timers] Boucle '{}' terminée.", loop_name);
        });
        self.push(TimerEntry { name, handle, stop: Some(stop) });
    }

    /// Enregistre une tâche déjà lancée (ex : relais d'un abonnement). Elle sera abandonnée à l'annulation.
    pub fn register(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.push(TimerEntry { name: name.into(), handle, stop: None });
    }

    fn push(&self, entry: TimerEntry) {
        debug!("[Timers] Enregistrement de la tâche '{}'.", entry.name);
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }

    /// Annule toutes les tâches dont le nom commence par `prefix`.
    pub fn cancel_prefix(&self, prefix: &str) -> usize {
        let cancelled: Vec<TimerEntry> = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let (matching, kept) = entries.drain(..).partition(|entry| entry.name.starts_with(prefix));
            *entries = kept;
            matching
        };
        let count = cancelled.len();
        cancelled.into_iter().for_each(TimerEntry::cancel);
        count
    }

    pub fn cancel_all(&self) -> usize {
        let cancelled: Vec<TimerEntry> =
            self.entries.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        let count = cancelled.len();
        cancelled.into_iter().for_each(TimerEntry::cancel);
        count
    }

    pub fn active_names(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| !entry.handle.is_finished())
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
