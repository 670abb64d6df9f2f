// DANS : src/rpc/mod.rs

pub mod chain_client;
pub mod resilient_client;

pub use chain_client::SolanaChainClient;
pub use resilient_client::ResilientRpcClient;

use crate::error::{MonitorError, Result};
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tokio::sync::mpsc::UnboundedSender;

pub type SubscriptionId = u64;

/// Notification brute telle que reçue d'un abonnement. Aucun champ n'est garanti.
#[derive(Debug, Clone, PartialEq)]
pub enum RawNotification {
    Account {
        pubkey: Option<String>,
        data: Option<Vec<u8>>,
        owner: Option<String>,
    },
    Logs {
        signature: Option<String>,
        logs: Option<Vec<String>>,
    },
}

/// Notification validée, seule forme acceptée par le détecteur.
#[derive(Debug, Clone, PartialEq)]
pub enum RawUpdate {
    Account { pubkey: Pubkey, data: Vec<u8>, owner: Pubkey },
    Logs { signature: String, lines: Vec<String> },
}

fn parse_pubkey(field: &str, value: Option<String>) -> Result<Pubkey> {
    let value = value.ok_or_else(|| MonitorError::InvalidData(format!("champ '{}' manquant", field)))?;
    Pubkey::from_str(&value).map_err(|e| MonitorError::InvalidData(format!("{} invalide '{}' : {}", field, value, e)))
}

impl TryFrom<RawNotification> for RawUpdate {
    type Error = MonitorError;

    fn try_from(raw: RawNotification) -> Result<Self> {
        match raw {
            RawNotification::Account { pubkey, data, owner } => {
                let pubkey = parse_pubkey("pubkey", pubkey)?;
                let owner = parse_pubkey("owner", owner)?;
                let data = data.ok_or_else(|| MonitorError::InvalidData(format!("compte {} sans données", pubkey)))?;
                Ok(RawUpdate::Account { pubkey, data, owner })
            }
            RawNotification::Logs { signature, logs } => {
                let signature = signature
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| MonitorError::InvalidData("notification de logs sans signature".into()))?;
                let lines = logs.ok_or_else(|| MonitorError::InvalidData(format!("logs absents pour {}", signature)))?;
                Ok(RawUpdate::Logs { signature, lines })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyedAccount {
    pub pubkey: Pubkey,
    pub owner: Pubkey,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstructionSummary {
    pub program_id: Pubkey,
    pub accounts: Vec<Pubkey>,
    pub data: Vec<u8>,
}

/// Vue résolue d'une transaction : comptes et instructions de premier niveau.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSummary {
    pub signature: String,
    pub slot: u64,
    pub account_keys: Vec<Pubkey>,
    pub instructions: Vec<InstructionSummary>,
    pub log_messages: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SignatureQuery {
    pub before: Option<String>,
    pub until: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    pub failed: bool,
}

/// Interface étroite vers la chaîne, injectée dans le service.
#[async_trait]
pub trait BlockchainClient: Send + Sync {
    /// Abonnement aux changements de comptes d'un programme. Les notifications partent dans `sink`.
    async fn subscribe_program(&self, program_id: &Pubkey, sink: UnboundedSender<RawNotification>) -> Result<SubscriptionId>;

    /// Abonnement aux logs des transactions mentionnant `mentions`.
    async fn subscribe_logs(&self, mentions: &Pubkey, sink: UnboundedSender<RawNotification>) -> Result<SubscriptionId>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    async fn get_program_accounts(&self, program_id: &Pubkey) -> Result<Vec<KeyedAccount>>;

    /// `Ok(None)` si la transaction est inconnue du nœud.
    async fn get_parsed_transaction(&self, signature: &str) -> Result<Option<TransactionSummary>>;

    async fn get_slot(&self) -> Result<u64>;

    async fn get_signatures_for_address(&self, address: &Pubkey, query: SignatureQuery) -> Result<Vec<SignatureInfo>>;

    /// Transaction encodée brute (JSON du nœud).
    async fn get_transaction(&self, signature: &str) -> Result<Option<serde_json::Value>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_account_notification_is_accepted() {
        let (pubkey, owner) = (Pubkey::new_unique(), Pubkey::new_unique());
        let raw = RawNotification::Account {
            pubkey: Some(pubkey.to_string()),
            data: Some(vec![1, 2, 3]),
            owner: Some(owner.to_string()),
        };
        assert_eq!(RawUpdate::try_from(raw).unwrap(), RawUpdate::Account { pubkey, data: vec![1, 2, 3], owner });
    }

    #[test]
    fn malformed_notifications_are_rejected() {
        let missing_data = RawNotification::Account {
            pubkey: Some(Pubkey::new_unique().to_string()),
            data: None,
            owner: Some(Pubkey::new_unique().to_string()),
        };
        assert!(matches!(RawUpdate::try_from(missing_data), Err(MonitorError::InvalidData(_))));

        let bad_key = RawNotification::Account {
            pubkey: Some("pas-une-cle".into()),
            data: Some(vec![]),
            owner: Some(Pubkey::new_unique().to_string()),
        };
        assert!(RawUpdate::try_from(bad_key).is_err());

        let no_signature = RawNotification::Logs { signature: Some(String::new()), logs: Some(vec![]) };
        assert!(RawUpdate::try_from(no_signature).is_err());
    }
}
