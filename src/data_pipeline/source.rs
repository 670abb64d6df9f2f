// DANS : src/data_pipeline/source.rs

use crate::{error::Result, state::PoolSnapshot};
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;

/// Source de métriques (prix, volume, liquidité) pour les pools d'un DEX.
/// `Ok(None)` signifie « inconnu de la source », pas une erreur.
#[async_trait]
pub trait PoolDataSource: Send + Sync {
    /// Nom du DEX tel qu'il apparaît dans les `PoolKey`.
    fn dex(&self) -> &str;

    async fn fetch_pool(&self, address: &Pubkey) -> Result<Option<PoolSnapshot>>;

    /// Pool le plus liquide de ce DEX contenant le mint.
    async fn find_pool_by_mint(&self, mint: &Pubkey) -> Result<Option<PoolSnapshot>>;

    /// Pool de ce DEX pour la paire, quel que soit l'ordre des mints.
    async fn find_pool_by_pair(&self, mint_a: &Pubkey, mint_b: &Pubkey) -> Result<Option<PoolSnapshot>>;
}
