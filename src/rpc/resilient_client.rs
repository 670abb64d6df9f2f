// DANS : src/rpc/resilient_client.rs

use crate::error::{MonitorError, Result};
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    nonblocking::rpc_client::RpcClient,
    rpc_client::GetConfirmedSignaturesForAddress2Config,
    rpc_config::{RpcAccountInfoConfig, RpcProgramAccountsConfig, RpcTransactionConfig},
    rpc_response::RpcConfirmedTransactionStatusWithSignature,
};
use solana_account_decoder::UiAccountEncoding;
use solana_sdk::{account::Account, commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::warn;

/// Un "wrapper" autour du RpcClient de Solana qui ajoute une logique de
/// ré-essai automatique pour les appels RPC qui échouent à cause d'erreurs réseau temporaires.
#[derive(Clone)]
pub struct ResilientRpcClient {
    client: Arc<RpcClient>,
    max_retries: u32,
    base_delay: Duration,
}

impl ResilientRpcClient {
    pub fn new(rpc_url: String, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed())),
            max_retries,
            base_delay,
        }
    }

    /// Détermine si une erreur du client est temporaire et si une nouvelle tentative doit être effectuée.
    fn is_retryable(error: &ClientError) -> bool {
        matches!(
            error.kind,
            ClientErrorKind::Reqwest(_) | ClientErrorKind::RpcError(_) | ClientErrorKind::Io(_)
        )
    }

    fn classify(error: ClientError, label: &str) -> MonitorError {
        let message = format!("{} : {}", label, error);
        if Self::is_retryable(&error) {
            MonitorError::TransientNetwork(message)
        } else if matches!(error.kind, ClientErrorKind::SerdeJson(_)) {
            MonitorError::InvalidData(message)
        } else {
            MonitorError::Upstream(message)
        }
    }

    /// Boucle de ré-essai commune, backoff exponentiel depuis `base_delay`.
    async fn with_retry<T, F, Fut>(&self, label: &str, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, ClientError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if Self::is_retryable(&e) && attempt < self.max_retries => {
                    let delay = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
                    warn!("[RPC] {} : tentative {} échouée ({}), nouvel essai dans {:?}.", label, attempt + 1, e, delay);
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(Self::classify(e, label)),
            }
        }
    }

    // --- MÉTHODES WRAPPÉES AVEC LOGIQUE DE RÉ-ESSAI ---

    pub async fn get_program_accounts(&self, program_id: &Pubkey) -> Result<Vec<(Pubkey, Account)>> {
        let config = RpcProgramAccountsConfig {
            account_config: RpcAccountInfoConfig {
                encoding: Some(UiAccountEncoding::Base64),
                ..Default::default()
            },
            ..Default::default()
        };
        let label = format!("get_program_accounts({})", program_id);
        self.with_retry(&label, || self.client.get_program_accounts_with_config(program_id, config.clone()))
            .await
    }

    pub async fn get_slot(&self) -> Result<u64> {
        self.with_retry("get_slot", || self.client.get_slot()).await
    }

    pub async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: Option<usize>,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
        let label = format!("get_signatures_for_address({})", address);
        self.with_retry(&label, || {
            self.client.get_signatures_for_address_with_config(
                address,
                GetConfirmedSignaturesForAddress2Config {
                    before,
                    until,
                    limit,
                    commitment: Some(CommitmentConfig::confirmed()),
                },
            )
        })
        .await
    }

    pub async fn get_transaction(
        &self,
        signature: &Signature,
        encoding: UiTransactionEncoding,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
        let config = RpcTransactionConfig {
            encoding: Some(encoding),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let label = format!("get_transaction({})", signature);
        self.with_retry(&label, || self.client.get_transaction_with_config(signature, config.clone()))
            .await
    }
}
