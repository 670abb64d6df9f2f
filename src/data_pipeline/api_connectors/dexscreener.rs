// src/data_pipeline/api_connectors/dexscreener.rs

use crate::{
    data_pipeline::source::PoolDataSource,
    error::{MonitorError, Result},
    state::{PoolSnapshot, VolumeWindows},
};
use anyhow::Context;
use async_trait::async_trait;
use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use std::{str::FromStr, time::Duration};
use tracing::debug;

pub const DEXSCREENER_BASE_URL: &str = "https://api.dexscreener.com";

#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    // L'API renvoie `null` quand rien ne correspond.
    #[serde(default)]
    pub pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pair {
    pub chain_id: String,
    pub dex_id: String,
    pub pair_address: String,
    pub base_token: Token,
    pub quote_token: Token,
    pub price_usd: Option<String>,
    #[serde(default)]
    pub volume: Volume,
    #[serde(default)]
    pub liquidity: Liquidity,
}

#[derive(Debug, Deserialize)]
pub struct Token {
    pub address: String,
    #[serde(default)]
    pub symbol: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct Volume {
    #[serde(default)]
    pub h24: f64,
    #[serde(default)]
    pub h6: f64,
    #[serde(default)]
    pub h1: f64,
    #[serde(default)]
    pub m5: f64,
}

#[derive(Debug, Deserialize, Default)]
pub struct Liquidity {
    #[serde(default)]
    pub usd: f64,
}

impl Pair {
    fn involves(&self, mint: &str) -> bool {
        self.base_token.address == mint || self.quote_token.address == mint
    }

    /// Conversion vers notre snapshot. `None` si une adresse est invalide.
    fn to_snapshot(&self, dex: &str) -> Option<PoolSnapshot> {
        let address = Pubkey::from_str(&self.pair_address).ok()?;
        let token_a_mint = Pubkey::from_str(&self.base_token.address).ok()?;
        let token_b_mint = Pubkey::from_str(&self.quote_token.address).ok()?;
        let price = self
            .price_usd
            .as_deref()
            .and_then(|p| p.parse::<f64>().ok())
            .unwrap_or(0.0);
        let liquidity = Decimal::from_f64(self.liquidity.usd).unwrap_or_default().round_dp(2);

        Some(PoolSnapshot {
            address,
            dex: dex.to_string(),
            token_a_mint,
            token_b_mint,
            price,
            volume: VolumeWindows {
                m5: self.volume.m5,
                h1: self.volume.h1,
                h6: self.volume.h6,
                h24: self.volume.h24,
            },
            liquidity,
        })
    }
}

/// Source DexScreener pour un DEX donné (`dexId` côté API).
pub struct DexScreenerSource {
    dex: String,
    dexscreener_id: String,
    base_url: String,
    http: reqwest::Client,
}

impl DexScreenerSource {
    pub fn new(dex: &str, dexscreener_id: &str) -> Result<Self> {
        Self::with_base_url(dex, dexscreener_id, DEXSCREENER_BASE_URL)
    }

    pub fn with_base_url(dex: &str, dexscreener_id: &str, base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Construction du client HTTP DexScreener")?;
        Ok(Self {
            dex: dex.to_string(),
            dexscreener_id: dexscreener_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn get_pairs(&self, path: &str) -> Result<Vec<Pair>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("[DexScreener] GET {}", url);
        let response = self.http.get(&url).send().await?.error_for_status()?;
        let body = response.text().await?;
        let api_response: ApiResponse = serde_json::from_str(&body)
            .map_err(|e| MonitorError::InvalidData(format!("JSON DexScreener invalide ({}) : {}", url, e)))?;
        Ok(api_response
            .pairs
            .unwrap_or_default()
            .into_iter()
            .filter(|pair| pair.chain_id == "solana" && pair.dex_id == self.dexscreener_id)
            .collect())
    }

    fn most_liquid<'a>(&self, pairs: impl Iterator<Item = &'a Pair>) -> Option<PoolSnapshot> {
        pairs
            .filter_map(|pair| pair.to_snapshot(&self.dex).map(|snapshot| (pair.liquidity.usd, snapshot)))
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, snapshot)| snapshot)
    }
}

#[async_trait]
impl PoolDataSource for DexScreenerSource {
    fn dex(&self) -> &str {
        &self.dex
    }

    async fn fetch_pool(&self, address: &Pubkey) -> Result<Option<PoolSnapshot>> {
        let pairs = self.get_pairs(&format!("/latest/dex/pairs/solana/{}", address)).await?;
        let wanted = address.to_string();
        Ok(pairs
            .iter()
            .find(|pair| pair.pair_address == wanted)
            .and_then(|pair| pair.to_snapshot(&self.dex)))
    }

    async fn find_pool_by_mint(&self, mint: &Pubkey) -> Result<Option<PoolSnapshot>> {
        let pairs = self.get_pairs(&format!("/latest/dex/tokens/{}", mint)).await?;
        let mint = mint.to_string();
        Ok(self.most_liquid(pairs.iter().filter(|pair| pair.involves(&mint))))
    }

    async fn find_pool_by_pair(&self, mint_a: &Pubkey, mint_b: &Pubkey) -> Result<Option<PoolSnapshot>> {
        let pairs = self.get_pairs(&format!("/latest/dex/tokens/{}", mint_a)).await?;
        let (a, b) = (mint_a.to_string(), mint_b.to_string());
        Ok(self.most_liquid(pairs.iter().filter(|pair| pair.involves(&a) && pair.involves(&b))))
    }
}
