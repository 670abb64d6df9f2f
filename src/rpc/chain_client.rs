// DANS : src/rpc/chain_client.rs

use super::{
    BlockchainClient, InstructionSummary, KeyedAccount, RawNotification, ResilientRpcClient, SignatureInfo,
    SignatureQuery, SubscriptionId, TransactionSummary,
};
use crate::error::{MonitorError, Result};
use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use solana_account_decoder::UiAccountEncoding;
use solana_client::{
    nonblocking::pubsub_client::PubsubClient,
    rpc_config::{
        RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcTransactionLogsConfig, RpcTransactionLogsFilter,
    },
};
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, UiLoadedAddresses, UiTransactionEncoding,
};
use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{mpsc::UnboundedSender, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

struct ActiveSubscription {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

enum SubscriptionTarget {
    Program(Pubkey),
    Logs(Pubkey),
}

/// Adaptateur `BlockchainClient` : RPC HTTP (avec ré-essais) + WebSocket PubSub.
pub struct SolanaChainClient {
    rpc: ResilientRpcClient,
    pubsub: Arc<PubsubClient>,
    next_id: AtomicU64,
    subscriptions: Mutex<HashMap<SubscriptionId, ActiveSubscription>>,
}

fn parse_signature(signature: &str) -> Result<Signature> {
    Signature::from_str(signature).map_err(|e| MonitorError::InvalidData(format!("signature '{}' : {}", signature, e)))
}

fn summarize(signature: &str, tx: EncodedConfirmedTransactionWithStatusMeta) -> Result<TransactionSummary> {
    let decoded = tx
        .transaction
        .transaction
        .decode()
        .ok_or_else(|| MonitorError::InvalidData(format!("transaction {} non décodable", signature)))?;

    let mut account_keys: Vec<Pubkey> = decoded.message.static_account_keys().to_vec();
    let mut log_messages = Vec::new();
    if let Some(meta) = tx.transaction.meta {
        // Les tables d'adresses (v0) ajoutent des comptes après les clés statiques.
        let loaded: Option<UiLoadedAddresses> = Option::from(meta.loaded_addresses);
        if let Some(loaded) = loaded {
            account_keys.extend(
                loaded
                    .writable
                    .iter()
                    .chain(loaded.readonly.iter())
                    .filter_map(|key| Pubkey::from_str(key).ok()),
            );
        }
        log_messages = Option::<Vec<String>>::from(meta.log_messages).unwrap_or_default();
    }

    let instructions = decoded
        .message
        .instructions()
        .iter()
        .filter_map(|ix| {
            let program_id = *account_keys.get(ix.program_id_index as usize)?;
            let accounts = ix
                .accounts
                .iter()
                .filter_map(|index| account_keys.get(*index as usize).copied())
                .collect();
            Some(InstructionSummary { program_id, accounts, data: ix.data.clone() })
        })
        .collect();

    Ok(TransactionSummary {
        signature: signature.to_string(),
        slot: tx.slot,
        account_keys,
        instructions,
        log_messages,
    })
}

impl SolanaChainClient {
    pub async fn connect(rpc_url: &str, ws_url: &str, max_retries: u32, base_delay: Duration) -> Result<Self> {
        let pubsub = PubsubClient::new(ws_url)
            .await
            .with_context(|| format!("Connexion WebSocket impossible vers {}", ws_url))?;
        info!("[RPC] Connecté à {} (WS {}).", rpc_url, ws_url);
        Ok(Self {
            rpc: ResilientRpcClient::new(rpc_url.to_string(), max_retries, base_delay),
            pubsub: Arc::new(pubsub),
            next_id: AtomicU64::new(1),
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    /// Lance la tâche de relais d'un abonnement. Le `Result` de mise en place
    /// revient par un oneshot, avant la première notification.
    async fn spawn_subscription(
        &self,
        target: SubscriptionTarget,
        sink: UnboundedSender<RawNotification>,
    ) -> Result<SubscriptionId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pubsub = self.pubsub.clone();
        let (ready_tx, ready_rx) = oneshot::channel::<std::result::Result<(), String>>();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            match target {
                SubscriptionTarget::Program(program_id) => {
                    let config = RpcProgramAccountsConfig {
                        account_config: RpcAccountInfoConfig {
                            encoding: Some(UiAccountEncoding::Base64),
                            commitment: Some(CommitmentConfig::confirmed()),
                            ..Default::default()
                        },
                        ..Default::default()
                    };
                    let (mut stream, unsubscribe) = match pubsub.program_subscribe(&program_id, Some(config)).await {
                        Ok(subscription) => subscription,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    loop {
                        tokio::select! {
                            _ = &mut cancel_rx => break,
                            item = stream.next() => match item {
                                Some(response) => {
                                    let keyed = response.value;
                                    let account: Option<Account> = keyed.account.decode();
                                    let notification = RawNotification::Account {
                                        pubkey: Some(keyed.pubkey),
                                        data: account.as_ref().map(|a| a.data.clone()),
                                        owner: Some(keyed.account.owner),
                                    };
                                    if sink.send(notification).is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    warn!("[RPC] Flux programme {} terminé par le nœud.", program_id);
                                    break;
                                }
                            }
                        }
                    }
                    unsubscribe().await;
                }
                SubscriptionTarget::Logs(mentions) => {
                    let filter = RpcTransactionLogsFilter::Mentions(vec![mentions.to_string()]);
                    let config = RpcTransactionLogsConfig { commitment: Some(CommitmentConfig::confirmed()) };
                    let (mut stream, unsubscribe) = match pubsub.logs_subscribe(filter, config).await {
                        Ok(subscription) => subscription,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e.to_string()));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    loop {
                        tokio::select! {
                            _ = &mut cancel_rx => break,
                            item = stream.next() => match item {
                                Some(response) => {
                                    // Les transactions échouées ne créent aucun pool.
                                    if response.value.err.is_some() {
                                        continue;
                                    }
                                    let notification = RawNotification::Logs {
                                        signature: Some(response.value.signature),
                                        logs: Some(response.value.logs),
                                    };
                                    if sink.send(notification).is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    warn!("[RPC] Flux de logs {} terminé par le nœud.", mentions);
                                    break;
                                }
                            }
                        }
                    }
                    unsubscribe().await;
                }
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(id, ActiveSubscription { cancel: cancel_tx, task });
                debug!("[RPC] Abonnement #{} actif.", id);
                Ok(id)
            }
            Ok(Err(reason)) => Err(MonitorError::TransientNetwork(reason)),
            Err(_) => Err(MonitorError::TransientNetwork("tâche d'abonnement interrompue".into())),
        }
    }
}

#[async_trait]
impl BlockchainClient for SolanaChainClient {
    async fn subscribe_program(&self, program_id: &Pubkey, sink: UnboundedSender<RawNotification>) -> Result<SubscriptionId> {
        self.spawn_subscription(SubscriptionTarget::Program(*program_id), sink).await
    }

    async fn subscribe_logs(&self, mentions: &Pubkey, sink: UnboundedSender<RawNotification>) -> Result<SubscriptionId> {
        self.spawn_subscription(SubscriptionTarget::Logs(*mentions), sink).await
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let active = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or_else(|| MonitorError::NotFound(format!("abonnement #{}", id)))?;
        if active.cancel.send(()).is_err() {
            // La tâche est déjà terminée (flux fermé par le nœud).
            active.task.abort();
        }
        Ok(())
    }

    async fn get_program_accounts(&self, program_id: &Pubkey) -> Result<Vec<KeyedAccount>> {
        let accounts = self.rpc.get_program_accounts(program_id).await?;
        Ok(accounts
            .into_iter()
            .map(|(pubkey, account)| KeyedAccount { pubkey, owner: account.owner, data: account.data })
            .collect())
    }

    async fn get_parsed_transaction(&self, signature: &str) -> Result<Option<TransactionSummary>> {
        let parsed = parse_signature(signature)?;
        match self.rpc.get_transaction(&parsed, UiTransactionEncoding::Base64).await {
            Ok(tx) => summarize(signature, tx).map(Some),
            // Le nœud renvoie `null` pour une signature inconnue.
            Err(MonitorError::InvalidData(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_slot(&self) -> Result<u64> {
        self.rpc.get_slot().await
    }

    async fn get_signatures_for_address(&self, address: &Pubkey, query: SignatureQuery) -> Result<Vec<SignatureInfo>> {
        let before = query.before.as_deref().map(parse_signature).transpose()?;
        let until = query.until.as_deref().map(parse_signature).transpose()?;
        let statuses = self.rpc.get_signatures_for_address(address, before, until, query.limit).await?;
        Ok(statuses
            .into_iter()
            .map(|status| SignatureInfo { signature: status.signature, slot: status.slot, failed: status.err.is_some() })
            .collect())
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<serde_json::Value>> {
        let parsed = parse_signature(signature)?;
        match self.rpc.get_transaction(&parsed, UiTransactionEncoding::Json).await {
            Ok(tx) => Ok(Some(serde_json::to_value(tx)?)),
            Err(MonitorError::InvalidData(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl Drop for SolanaChainClient {
    fn drop(&mut self) {
        let mut subscriptions = self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, active) in subscriptions.drain() {
            active.task.abort();
        }
    }
}
