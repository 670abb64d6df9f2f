// DANS : src/state/pool_store.rs

use super::{PoolKey, PoolRecord, PoolSnapshot, VolumeWindows};
use solana_sdk::pubkey::Pubkey;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};
use tokio::time::Instant;
use tracing::debug;

/// Une entrée du registre : le `PoolRecord` plus les métadonnées de cache.
#[derive(Debug, Clone)]
pub struct CachedPool {
    pub record: PoolRecord,
    pub volumes: VolumeWindows,
    /// `None` tant que le pool n'a jamais été rafraîchi depuis une source.
    pub fetched_at: Option<Instant>,
    /// Dernière écriture (détection, rafraîchissement, restauration).
    pub touched_at: Instant,
}

impl CachedPool {
    fn is_valid(&self, ttl: Duration) -> bool {
        self.fetched_at.is_some_and(|at| at.elapsed() < ttl)
    }

    pub fn has_metrics(&self) -> bool {
        self.fetched_at.is_some()
    }
}

/// Registre des pools connus, doublé d'un cache TTL sur leurs métriques.
/// Les sections critiques sont synchrones : aucun verrou n'est tenu à travers un `.await`.
pub struct PoolStore {
    pools: RwLock<HashMap<PoolKey, CachedPool>>,
    ttl: Duration,
}

impl PoolStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<PoolKey, CachedPool>> {
        self.pools.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<PoolKey, CachedPool>> {
        self.pools.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insère un pool détecté s'il est inconnu. Retourne `false` s'il l'était déjà.
    /// Le test et l'insertion se font sous le même verrou d'écriture.
    pub fn insert_if_absent(&self, record: PoolRecord) -> bool {
        let key = record.key();
        let mut writer = self.write();
        if writer.contains_key(&key) {
            return false;
        }
        writer.insert(
            key,
            CachedPool {
                record,
                volumes: VolumeWindows::default(),
                fetched_at: None,
                touched_at: Instant::now(),
            },
        );
        true
    }

    pub fn contains(&self, key: &PoolKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn get(&self, key: &PoolKey) -> Option<CachedPool> {
        self.read().get(key).cloned()
    }

    /// Retourne l'entrée seulement si ses métriques sont encore dans le TTL.
    pub fn get_fresh(&self, key: &PoolKey) -> Option<CachedPool> {
        self.read().get(key).filter(|entry| entry.is_valid(self.ttl)).cloned()
    }

    pub fn record(&self, key: &PoolKey) -> Option<PoolRecord> {
        self.read().get(key).map(|entry| entry.record.clone())
    }

    /// Écrit des métriques fraîches (upsert). Retourne l'entrée précédente, si elle existait.
    /// Dernier écrivain gagnant : aucune résolution de conflit au-delà de l'ordre de complétion.
    pub fn apply_snapshot(&self, key: &PoolKey, snapshot: &PoolSnapshot) -> Option<CachedPool> {
        let now = Instant::now();
        let mut writer = self.write();
        match writer.get_mut(key) {
            Some(entry) => {
                let previous = entry.clone();
                entry.record.apply_snapshot(snapshot);
                entry.volumes = snapshot.volume;
                entry.fetched_at = Some(now);
                entry.touched_at = now;
                Some(previous)
            }
            None => {
                writer.insert(
                    key.clone(),
                    CachedPool {
                        record: snapshot.to_record(),
                        volumes: snapshot.volume,
                        fetched_at: Some(now),
                        touched_at: now,
                    },
                );
                None
            }
        }
    }

    /// Premier pool du DEX qui contient ce mint.
    pub fn find_by_mint(&self, dex: &str, mint: &Pubkey) -> Option<PoolKey> {
        let reader = self.read();
        let mut matches: Vec<&PoolKey> = reader
            .iter()
            .filter(|(key, entry)| key.dex() == dex && entry.record.involves_mint(mint))
            .map(|(key, _)| key)
            .collect();
        // Ordre stable, sinon deux appels peuvent viser deux pools différents.
        matches.sort();
        matches.first().map(|key| (*key).clone())
    }

    /// Copie de l'état courant, pour itérer sans tenir le verrou.
    pub fn snapshot(&self) -> Vec<(PoolKey, CachedPool)> {
        let mut entries: Vec<(PoolKey, CachedPool)> =
            self.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn snapshot_for_dex(&self, dex: &str) -> Vec<(PoolKey, CachedPool)> {
        self.snapshot().into_iter().filter(|(key, _)| key.dex() == dex).collect()
    }

    pub fn records(&self) -> Vec<(PoolKey, PoolRecord)> {
        self.snapshot().into_iter().map(|(key, entry)| (key, entry.record)).collect()
    }

    /// Remplace tout le registre (restauration d'un backup).
    /// Les métriques restaurées sont considérées périmées et seront rafraîchies.
    pub fn replace_all(&self, records: Vec<(PoolKey, PoolRecord)>) {
        let now = Instant::now();
        let mut writer = self.write();
        writer.clear();
        for (key, record) in records {
            let volumes = VolumeWindows { h24: record.volume_24h, ..VolumeWindows::default() };
            writer.insert(key, CachedPool { record, volumes, fetched_at: None, touched_at: now });
        }
    }

    /// Supprime les entrées non touchées depuis `max_age`. Retourne le nombre supprimé.
    pub fn prune_stale(&self, max_age: Duration) -> usize {
        let mut writer = self.write();
        let before = writer.len();
        writer.retain(|_, entry| entry.touched_at.elapsed() < max_age);
        let removed = before - writer.len();
        if removed > 0 {
            debug!("[Store] {} pools périmés retirés du registre.", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
