// DANS : src/discovery/detector.rs

use super::classifier::{PoolClassifier, classifier_for};
use crate::{
    config::DexConfig,
    error::{MonitorError, Result},
    events::{EventBus, MonitorEvent, SystemEvent, SystemEventKind},
    rpc::{BlockchainClient, RawNotification, RawUpdate},
    state::{PoolKey, PoolRecord, PoolStore},
};
use solana_sdk::pubkey::Pubkey;
use std::{str::FromStr, sync::Arc};
use tracing::{debug, info, trace};

/// Un DEX prêt pour la détection : programme parsé + classifieur.
#[derive(Clone)]
pub struct DexTarget {
    pub name: String,
    pub program_id: Pubkey,
    pub classifier: Arc<dyn PoolClassifier>,
}

impl DexTarget {
    pub fn from_config(dex: &DexConfig) -> Result<Self> {
        let program_id = Pubkey::from_str(&dex.program_id).map_err(|e| MonitorError::SubscriptionSetup {
            dex: dex.name.clone(),
            reason: format!("program id invalide '{}' : {}", dex.program_id, e),
        })?;
        Ok(Self {
            name: dex.name.clone(),
            program_id,
            classifier: classifier_for(&dex.name, &dex.program_id),
        })
    }
}

/// Transforme les notifications brutes en pools nouvellement détectés.
pub struct PoolDetector {
    client: Arc<dyn BlockchainClient>,
    store: Arc<PoolStore>,
    events: EventBus,
}

impl PoolDetector {
    pub fn new(client: Arc<dyn BlockchainClient>, store: Arc<PoolStore>, events: EventBus) -> Self {
        Self { client, store, events }
    }

    /// Point d'entrée des abonnements : valide la forme, puis détecte.
    pub async fn process(&self, dex: &DexTarget, raw: RawNotification) -> Result<Vec<PoolRecord>> {
        let update = RawUpdate::try_from(raw)?;
        self.process_update(dex, update).await
    }

    pub async fn process_update(&self, dex: &DexTarget, update: RawUpdate) -> Result<Vec<PoolRecord>> {
        match update {
            RawUpdate::Account { pubkey, data, owner } => {
                Ok(self.detect_account(dex, &pubkey, &owner, &data).into_iter().collect())
            }
            RawUpdate::Logs { signature, lines } => self.detect_from_logs(dex, &signature, &lines).await,
        }
    }

    pub fn detect_account(&self, dex: &DexTarget, pubkey: &Pubkey, owner: &Pubkey, data: &[u8]) -> Option<PoolRecord> {
        if *owner != dex.program_id {
            trace!("[Detector] {} n'appartient pas au programme {}.", pubkey, dex.name);
            return None;
        }
        if self.store.contains(&PoolKey::new(&dex.name, pubkey)) {
            return None;
        }
        if !dex.classifier.is_pool_account(data) {
            return None;
        }
        let (mint_a, mint_b) = dex.classifier.extract_mints(data).unwrap_or_default();
        self.register(PoolRecord::detected(&dex.name, *pubkey, mint_a, mint_b))
    }

    async fn detect_from_logs(&self, dex: &DexTarget, signature: &str, lines: &[String]) -> Result<Vec<PoolRecord>> {
        if !dex.classifier.matches_logs(lines) {
            return Ok(Vec::new());
        }
        debug!("[Detector] Création possible sur {} (tx {}).", dex.name, signature);
        let Some(tx) = self.client.get_parsed_transaction(signature).await? else {
            debug!("[Detector] Transaction {} introuvable.", signature);
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for ix in tx.instructions.iter().filter(|ix| ix.program_id == dex.program_id) {
            let Some(pool) = dex.classifier.pool_from_instruction(&ix.accounts, &ix.data) else {
                continue;
            };
            if self.store.contains(&PoolKey::new(&dex.name, &pool.address)) {
                continue;
            }
            let record = PoolRecord::detected(&dex.name, pool.address, pool.token_a_mint, pool.token_b_mint);
            if let Some(record) = self.register(record) {
                found.push(record);
            }
        }
        Ok(found)
    }

    /// Insertion atomique puis événements. `None` si un autre chemin l'a déjà enregistré.
    fn register(&self, record: PoolRecord) -> Option<PoolRecord> {
        if !self.store.insert_if_absent(record.clone()) {
            return None;
        }
        info!("[Detector] Nouveau pool {} ({} / {}).", record.key(), record.token_a_mint, record.token_b_mint);
        self.events.publish(MonitorEvent::NewPool(record.clone()));
        self.events.publish(MonitorEvent::System(SystemEvent::new(
            SystemEventKind::PoolDetected,
            record.key().to_string(),
        )));
        Some(record)
    }
}
