// DANS : tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use pool_monitor::{
    config::{DexConfig, MonitorConfig, ORCA_WHIRLPOOL_PROGRAM_ID},
    data_pipeline::PoolDataSource,
    error::{MonitorError, Result},
    events::MonitorEvent,
    rpc::{
        BlockchainClient, InstructionSummary, KeyedAccount, RawNotification, SignatureInfo, SignatureQuery,
        SubscriptionId, TransactionSummary,
    },
    state::{PoolSnapshot, VolumeWindows},
};
use rust_decimal::Decimal;
use solana_sdk::pubkey::Pubkey;
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::{broadcast, mpsc::UnboundedSender};

pub const WHIRLPOOL_DISCRIMINATOR: [u8; 8] = [63, 149, 209, 12, 225, 128, 99, 9];
pub const WHIRLPOOL_INIT_TAG: [u8; 8] = [95, 180, 10, 172, 84, 174, 232, 40];

pub fn orca_program() -> Pubkey {
    Pubkey::from_str(ORCA_WHIRLPOOL_PROGRAM_ID).unwrap()
}

/// Compte Whirlpool minimal : discriminateur + mints aux bons offsets.
pub fn whirlpool_account(mint_a: &Pubkey, mint_b: &Pubkey) -> Vec<u8> {
    let mut data = vec![0u8; 653];
    data[..8].copy_from_slice(&WHIRLPOOL_DISCRIMINATOR);
    data[101..133].copy_from_slice(mint_a.as_ref());
    data[181..213].copy_from_slice(mint_b.as_ref());
    data
}

/// Config de test : intervalles longs (rien ne se déclenche tout seul), backup désactivé.
pub fn test_config(dexes: Vec<DexConfig>, backup_dir: Option<&Path>) -> MonitorConfig {
    let mut config = MonitorConfig { dexes, ..MonitorConfig::default() };
    let long = Duration::from_secs(3600);
    config.intervals.full_scan = long;
    config.intervals.monitoring = long;
    config.intervals.consistency = long;
    config.intervals.cross_dex = long;
    config.intervals.batch_adjustment = long;
    config.intervals.backup = long;
    config.intervals.alert_check = long;
    config.retry.max_retries = 0;
    config.retry.base_delay = Duration::from_millis(1);
    config.retry.failure_cooldown = Duration::ZERO;
    config.batch.inter_batch_delay = Duration::from_millis(1);
    match backup_dir {
        Some(dir) => {
            config.backup.enabled = true;
            config.backup.dir = dir.to_path_buf();
        }
        None => config.backup.enabled = false,
    }
    config
}

pub fn snapshot(dex: &str, address: Pubkey, mints: (Pubkey, Pubkey), price: f64, volume: f64, liquidity: i64) -> PoolSnapshot {
    PoolSnapshot {
        address,
        dex: dex.to_string(),
        token_a_mint: mints.0,
        token_b_mint: mints.1,
        price,
        volume: VolumeWindows { m5: volume / 288.0, h1: volume / 24.0, h6: volume / 4.0, h24: volume },
        liquidity: Decimal::from(liquidity),
    }
}

/// Vide les événements déjà publiés sans attendre.
pub fn drain(events: &mut broadcast::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Attend le premier événement qui satisfait `pred`.
pub async fn wait_for<F>(events: &mut broadcast::Receiver<MonitorEvent>, pred: F) -> Option<MonitorEvent>
where
    F: Fn(&MonitorEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

// --- CHAÎNE SIMULÉE ---

#[derive(Default)]
pub struct MockChain {
    accounts: Mutex<HashMap<Pubkey, Vec<KeyedAccount>>>,
    transactions: Mutex<HashMap<String, TransactionSummary>>,
    failing_program_subs: Mutex<HashSet<Pubkey>>,
    failing_logs_subs: Mutex<HashSet<Pubkey>>,
    sinks: Mutex<Vec<(SubscriptionId, Pubkey, UnboundedSender<RawNotification>)>>,
    unsubscribed: Mutex<Vec<SubscriptionId>>,
    next_id: AtomicU64,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_account(&self, program: Pubkey, pubkey: Pubkey, data: Vec<u8>) {
        self.accounts
            .lock()
            .unwrap()
            .entry(program)
            .or_default()
            .push(KeyedAccount { pubkey, owner: program, data });
    }

    pub fn add_creation_tx(&self, signature: &str, program: Pubkey, pool: Pubkey, mint_a: Pubkey, mint_b: Pubkey) {
        // Layout Whirlpool : mints aux indices 1 et 2, pool à l'indice 4.
        let accounts = vec![Pubkey::new_unique(), mint_a, mint_b, Pubkey::new_unique(), pool];
        let summary = TransactionSummary {
            signature: signature.to_string(),
            slot: 42,
            account_keys: accounts.clone(),
            instructions: vec![InstructionSummary { program_id: program, accounts, data: WHIRLPOOL_INIT_TAG.to_vec() }],
            log_messages: vec!["Program log: Instruction: InitializePool".to_string()],
        };
        self.transactions.lock().unwrap().insert(signature.to_string(), summary);
    }

    pub fn fail_program_subscription(&self, program: Pubkey) {
        self.failing_program_subs.lock().unwrap().insert(program);
    }

    pub fn fail_logs_subscription(&self, program: Pubkey) {
        self.failing_logs_subs.lock().unwrap().insert(program);
    }

    /// Pousse une notification vers tous les abonnements du programme.
    pub fn push(&self, program: &Pubkey, notification: RawNotification) -> usize {
        let sinks = self.sinks.lock().unwrap();
        sinks
            .iter()
            .filter(|(_, p, _)| p == program)
            .filter(|(_, _, sink)| sink.send(notification.clone()).is_ok())
            .count()
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.unsubscribed.lock().unwrap().clone()
    }

    fn subscribe(&self, program: &Pubkey, sink: UnboundedSender<RawNotification>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sinks.lock().unwrap().push((id, *program, sink));
        id
    }
}

#[async_trait]
impl BlockchainClient for MockChain {
    async fn subscribe_program(&self, program_id: &Pubkey, sink: UnboundedSender<RawNotification>) -> Result<SubscriptionId> {
        if self.failing_program_subs.lock().unwrap().contains(program_id) {
            return Err(MonitorError::TransientNetwork("programSubscribe refusé".into()));
        }
        Ok(self.subscribe(program_id, sink))
    }

    async fn subscribe_logs(&self, mentions: &Pubkey, sink: UnboundedSender<RawNotification>) -> Result<SubscriptionId> {
        if self.failing_logs_subs.lock().unwrap().contains(mentions) {
            return Err(MonitorError::TransientNetwork("logsSubscribe refusé".into()));
        }
        Ok(self.subscribe(mentions, sink))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.sinks.lock().unwrap().retain(|(sub, _, _)| *sub != id);
        self.unsubscribed.lock().unwrap().push(id);
        Ok(())
    }

    async fn get_program_accounts(&self, program_id: &Pubkey) -> Result<Vec<KeyedAccount>> {
        Ok(self.accounts.lock().unwrap().get(program_id).cloned().unwrap_or_default())
    }

    async fn get_parsed_transaction(&self, signature: &str) -> Result<Option<TransactionSummary>> {
        Ok(self.transactions.lock().unwrap().get(signature).cloned())
    }

    async fn get_slot(&self) -> Result<u64> {
        Ok(42)
    }

    async fn get_signatures_for_address(&self, _address: &Pubkey, _query: SignatureQuery) -> Result<Vec<SignatureInfo>> {
        Ok(Vec::new())
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .transactions
            .lock()
            .unwrap()
            .get(signature)
            .map(|tx| serde_json::json!({ "slot": tx.slot, "meta": { "logMessages": tx.log_messages } })))
    }
}

// --- SOURCE DE DONNÉES SIMULÉE ---

pub struct MockSource {
    dex: String,
    pools: Mutex<HashMap<Pubkey, PoolSnapshot>>,
    calls: AtomicU64,
    completed: AtomicU64,
    latency: Mutex<Duration>,
}

impl MockSource {
    pub fn new(dex: &str) -> Arc<Self> {
        Arc::new(Self {
            dex: dex.to_string(),
            pools: Mutex::new(HashMap::new()),
            calls: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            latency: Mutex::new(Duration::ZERO),
        })
    }

    /// Le pool disparaît de la source : `fetch_pool` renverra `None`.
    pub fn remove(&self, address: &Pubkey) {
        self.pools.lock().unwrap().remove(address);
    }

    /// Temps de réponse simulé de `fetch_pool`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Appels `fetch_pool` arrivés au bout.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn set(&self, snapshot: PoolSnapshot) {
        self.pools.lock().unwrap().insert(snapshot.address, snapshot);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn best<F: Fn(&PoolSnapshot) -> bool>(&self, pred: F) -> Option<PoolSnapshot> {
        self.pools
            .lock()
            .unwrap()
            .values()
            .filter(|s| pred(s))
            .max_by(|a, b| a.liquidity.cmp(&b.liquidity))
            .cloned()
    }
}

#[async_trait]
impl PoolDataSource for MockSource {
    fn dex(&self) -> &str {
        &self.dex
    }

    async fn fetch_pool(&self, address: &Pubkey) -> Result<Option<PoolSnapshot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(self.pools.lock().unwrap().get(address).cloned())
    }

    async fn find_pool_by_mint(&self, mint: &Pubkey) -> Result<Option<PoolSnapshot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.best(|s| s.token_a_mint == *mint || s.token_b_mint == *mint))
    }

    async fn find_pool_by_pair(&self, mint_a: &Pubkey, mint_b: &Pubkey) -> Result<Option<PoolSnapshot>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.best(|s| {
            (s.token_a_mint == *mint_a && s.token_b_mint == *mint_b)
                || (s.token_a_mint == *mint_b && s.token_b_mint == *mint_a)
        }))
    }
}
