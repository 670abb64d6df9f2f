// DANS : src/backup.rs

use crate::{
    config::BackupConfig,
    consistency::CrossDexMap,
    error::{MonitorError, Result},
    events::{EventBus, MonitorEvent, SystemEvent, SystemEventKind},
    monitoring::{MetricsRegistry, MetricsSnapshot, report_error},
    state::{PoolKey, PoolRecord, PoolStore, TimerRegistry},
};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::{debug, info, warn};

const BACKUP_PREFIX: &str = "pool-backup-";
const BACKUP_SUFFIX: &str = ".json";

/// Contenu d'un fichier de backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSnapshot {
    pub timestamp: DateTime<Utc>,
    pub pools: Vec<(PoolKey, PoolRecord)>,
    #[serde(default)]
    pub cross_dex_data: Vec<(PoolKey, Vec<PoolRecord>)>,
    #[serde(default)]
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub path: PathBuf,
    pub include_cross_dex: bool,
    /// Restreint l'export à un seul DEX.
    pub dex: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportDocument<'a> {
    exported_at: DateTime<Utc>,
    pools: Vec<&'a PoolRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cross_dex_data: Option<Vec<(&'a PoolKey, &'a Vec<PoolRecord>)>>,
}

/// Une ligne de l'export CSV. L'en-tête est dérivé des noms de champs.
#[derive(Serialize)]
struct CsvRow<'a> {
    kind: &'a str,
    pool_key: String,
    dex: &'a str,
    address: String,
    token_a_mint: String,
    token_b_mint: String,
    price: f64,
    volume_24h: f64,
    liquidity: Decimal,
    last_update: DateTime<Utc>,
    first_detected_at: DateTime<Utc>,
}

impl<'a> CsvRow<'a> {
    fn new(kind: &'a str, key: &PoolKey, record: &'a PoolRecord) -> Self {
        Self {
            kind,
            pool_key: key.to_string(),
            dex: &record.dex,
            address: record.address.to_string(),
            token_a_mint: record.token_a_mint.to_string(),
            token_b_mint: record.token_b_mint.to_string(),
            price: record.price,
            volume_24h: record.volume_24h,
            liquidity: record.liquidity,
            last_update: record.last_update,
            first_detected_at: record.first_detected_at,
        }
    }
}

fn write_csv<'a>(rows: impl IntoIterator<Item = CsvRow<'a>>) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().map_err(|e| MonitorError::BackupIo(e.to_string()))
}

/// `pool-backup-<millis>.json`, puis `pool-backup-<millis>-<n>.json` si le nom est déjà pris.
fn backup_file_name(at: DateTime<Utc>, sequence: u32) -> String {
    match sequence {
        0 => format!("{}{}{}", BACKUP_PREFIX, at.timestamp_millis(), BACKUP_SUFFIX),
        n => format!("{}{}-{}{}", BACKUP_PREFIX, at.timestamp_millis(), n, BACKUP_SUFFIX),
    }
}

/// Horodatage (ms) et numéro de séquence encodés dans le nom, `None` si le fichier n'est pas un backup.
fn stamp_from_name(path: &Path) -> Option<(i64, u32)> {
    let name = path.file_name()?.to_str()?;
    let stamp = name.strip_prefix(BACKUP_PREFIX)?.strip_suffix(BACKUP_SUFFIX)?;
    match stamp.split_once('-') {
        Some((millis, sequence)) => Some((millis.parse().ok()?, sequence.parse().ok()?)),
        None => Some((stamp.parse().ok()?, 0)),
    }
}

fn millis_from_name(path: &Path) -> Option<i64> {
    stamp_from_name(path).map(|(millis, _)| millis)
}

async fn unique_backup_path(dir: &Path, at: DateTime<Utc>) -> Result<PathBuf> {
    let mut sequence = 0;
    let mut path = dir.join(backup_file_name(at, sequence));
    while tokio::fs::try_exists(&path).await? {
        sequence += 1;
        path = dir.join(backup_file_name(at, sequence));
    }
    Ok(path)
}

/// Écrit `<path>.tmp` puis renomme. En cas d'échec, le fichier temporaire est supprimé.
async fn write_atomically(path: &Path, body: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let written = match tokio::fs::write(&tmp, body).await {
        Ok(()) => tokio::fs::rename(&tmp, path).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
            debug!("[Backup] Fichier temporaire {} non supprimé : {}", tmp.display(), cleanup);
        }
        return Err(MonitorError::BackupIo(format!("{} : {}", path.display(), e)));
    }
    Ok(())
}

fn is_backup_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(BACKUP_SUFFIX))
}

/// Sauvegarde, restauration et export de l'état complet du moniteur.
pub struct BackupManager {
    dir: PathBuf,
    retention: Duration,
    store: Arc<PoolStore>,
    cross_dex: Arc<ArcSwap<CrossDexMap>>,
    metrics: Arc<MetricsRegistry>,
    events: EventBus,
}

impl BackupManager {
    pub fn new(
        config: &BackupConfig,
        store: Arc<PoolStore>,
        cross_dex: Arc<ArcSwap<CrossDexMap>>,
        metrics: Arc<MetricsRegistry>,
        events: EventBus,
    ) -> Self {
        Self { dir: config.dir.clone(), retention: config.retention, store, cross_dex, metrics, events }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn current_snapshot(&self) -> BackupSnapshot {
        let mut metrics = self.metrics.snapshot();
        // Le fichier compte la sauvegarde qu'il contient.
        metrics.backup_count += 1;
        let cross = self.cross_dex.load();
        let mut cross_dex_data: Vec<(PoolKey, Vec<PoolRecord>)> =
            cross.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        cross_dex_data.sort_by(|a, b| a.0.cmp(&b.0));
        BackupSnapshot { timestamp: Utc::now(), pools: self.store.records(), cross_dex_data, metrics }
    }

    /// Écrit `<dir>/pool-backup-<unix_millis>.json` (suffixé `-<n>` si le nom est pris) via un fichier temporaire.
    pub async fn backup_data(&self) -> Result<PathBuf> {
        let snapshot = self.current_snapshot();
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = unique_backup_path(&self.dir, snapshot.timestamp).await?;
        write_atomically(&path, &serde_json::to_vec_pretty(&snapshot)?).await?;

        self.metrics.record_backup();
        info!("[Backup] {} pools sauvegardés dans {}.", snapshot.pools.len(), path.display());
        self.events.publish(MonitorEvent::System(SystemEvent::new(
            SystemEventKind::BackupCompleted,
            path.display().to_string(),
        )));
        Ok(path)
    }

    async fn backup_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_backup_file(&path) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Supprime les backups plus vieux que la rétention. Retourne le nombre supprimé.
    pub async fn cleanup_old_backups(&self) -> Result<usize> {
        let now_ms = Utc::now().timestamp_millis();
        let retention_ms = self.retention.as_millis() as i64;
        let mut removed = 0;

        for path in self.backup_files().await? {
            let age_ms = match millis_from_name(&path) {
                Some(ms) => now_ms - ms,
                // Nom illisible : on se rabat sur la date de modification.
                None => {
                    let modified = tokio::fs::metadata(&path).await?.modified()?;
                    SystemTime::now()
                        .duration_since(modified)
                        .map(|d| d.as_millis() as i64)
                        .unwrap_or(0)
                }
            };
            if age_ms > retention_ms {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!("[Backup] Ancien backup supprimé : {}", path.display());
                        removed += 1;
                    }
                    Err(e) => warn!("[Backup] Suppression de {} impossible : {}", path.display(), e),
                }
            }
        }
        if removed > 0 {
            info!("[Backup] {} ancien(s) backup(s) supprimé(s).", removed);
        }
        Ok(removed)
    }

    pub async fn latest_backup(&self) -> Result<Option<PathBuf>> {
        let files = self.backup_files().await?;
        Ok(files
            .into_iter()
            .filter_map(|path| stamp_from_name(&path).map(|stamp| (stamp, path)))
            .max_by_key(|(stamp, _)| *stamp)
            .map(|(_, path)| path))
    }

    pub async fn load_snapshot(path: &Path) -> Result<BackupSnapshot> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| MonitorError::BackupIo(format!("{} : {}", path.display(), e)))?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Recharge le backup donné (ou le plus récent) dans le registre, la table cross-dex et les métriques.
    /// `Ok(None)` s'il n'existe aucun backup.
    pub async fn restore_data(&self, path: Option<PathBuf>) -> Result<Option<BackupSnapshot>> {
        let path = match path {
            Some(path) => path,
            None => match self.latest_backup().await? {
                Some(path) => path,
                None => {
                    info!("[Backup] Aucun backup à restaurer dans {}.", self.dir.display());
                    return Ok(None);
                }
            },
        };
        let snapshot = Self::load_snapshot(&path).await?;

        self.store.replace_all(snapshot.pools.clone());
        self.cross_dex.store(Arc::new(snapshot.cross_dex_data.iter().cloned().collect()));
        self.metrics.restore(&snapshot.metrics);

        info!(
            "[Backup] Restauration depuis {} : {} pools, {} entrées cross-dex.",
            path.display(),
            snapshot.pools.len(),
            snapshot.cross_dex_data.len()
        );
        self.events.publish(MonitorEvent::System(SystemEvent::new(
            SystemEventKind::RestoreCompleted,
            path.display().to_string(),
        )));
        Ok(Some(snapshot))
    }

    /// Export à la demande. Retourne le nombre de pools exportés.
    pub async fn export_data(&self, options: &ExportOptions) -> Result<usize> {
        let records: Vec<(PoolKey, PoolRecord)> = self
            .store
            .records()
            .into_iter()
            .filter(|(key, _)| options.dex.as_deref().is_none_or(|dex| key.dex() == dex))
            .collect();
        let cross = self.cross_dex.load_full();
        let mut cross_rows: Vec<(&PoolKey, &Vec<PoolRecord>)> = if options.include_cross_dex {
            records.iter().filter_map(|(key, _)| cross.get_key_value(key)).collect()
        } else {
            Vec::new()
        };
        cross_rows.sort_by(|a, b| a.0.cmp(b.0));

        let body = match options.format {
            ExportFormat::Json => {
                let document = ExportDocument {
                    exported_at: Utc::now(),
                    pools: records.iter().map(|(_, record)| record).collect(),
                    cross_dex_data: options.include_cross_dex.then(|| cross_rows.clone()),
                };
                serde_json::to_vec_pretty(&document)?
            }
            ExportFormat::Csv => {
                let pools = records.iter().map(|(key, record)| CsvRow::new("pool", key, record));
                let cross = cross_rows
                    .iter()
                    .flat_map(|(key, others)| others.iter().map(move |record| CsvRow::new("crossDex", key, record)));
                write_csv(pools.chain(cross))?
            }
        };

        if let Some(parent) = options.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&options.path, body).await?;
        info!("[Backup] Export {:?} de {} pools vers {}.", options.format, records.len(), options.path.display());
        Ok(records.len())
    }

    /// Backup + purge périodiques. Les erreurs sont signalées, jamais fatales.
    pub fn start(self: &Arc<Self>, timers: &TimerRegistry, interval: Duration) {
        let manager = Arc::clone(self);
        timers.spawn_periodic("backup", interval, move || {
            let manager = manager.clone();
            async move {
                if let Err(e) = manager.backup_data().await {
                    report_error(&manager.metrics, &manager.events, "Backup", &e);
                }
                if let Err(e) = manager.cleanup_old_backups().await {
                    report_error(&manager.metrics, &manager.events, "Backup", &e);
                }
            }
        });
    }
}
