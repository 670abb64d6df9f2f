// DANS : src/state/mod.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;

pub mod pool_store;
pub mod timers;

pub use pool_store::{CachedPool, PoolStore};
pub use timers::TimerRegistry;

/// Clé composite `dex:address`, unique pour un pool donné sur un DEX donné.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolKey(String);

impl PoolKey {
    pub fn new(dex: &str, address: &Pubkey) -> Self {
        Self(format!("{}:{}", dex, address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Nom du DEX, partie gauche de la clé.
    pub fn dex(&self) -> &str {
        self.0.split_once(':').map(|(dex, _)| dex).unwrap_or(&self.0)
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Un pool de liquidité sur un DEX.
/// Les champs non dérivables à la détection (prix, volume, liquidité) valent zéro
/// jusqu'au premier rafraîchissement par le `DexDataClient`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolRecord {
    #[serde(with = "serde_pubkey")]
    pub address: Pubkey,
    pub dex: String,
    #[serde(with = "serde_pubkey")]
    pub token_a_mint: Pubkey,
    #[serde(with = "serde_pubkey")]
    pub token_b_mint: Pubkey,
    pub liquidity: Decimal,
    pub volume_24h: f64,
    pub price: f64,
    pub last_update: DateTime<Utc>,
    pub first_detected_at: DateTime<Utc>,
}

impl PoolRecord {
    /// Enregistre un pool fraîchement détecté, sans métriques.
    pub fn detected(dex: &str, address: Pubkey, token_a_mint: Pubkey, token_b_mint: Pubkey) -> Self {
        let now = Utc::now();
        Self {
            address,
            dex: dex.to_string(),
            token_a_mint,
            token_b_mint,
            liquidity: Decimal::ZERO,
            volume_24h: 0.0,
            price: 0.0,
            last_update: now,
            first_detected_at: now,
        }
    }

    pub fn key(&self) -> PoolKey {
        PoolKey::new(&self.dex, &self.address)
    }

    pub fn involves_mint(&self, mint: &Pubkey) -> bool {
        self.token_a_mint == *mint || self.token_b_mint == *mint
    }

    /// Vrai si la paire de tokens est la même, quel que soit l'ordre.
    pub fn same_pair(&self, mint_a: &Pubkey, mint_b: &Pubkey) -> bool {
        (self.token_a_mint == *mint_a && self.token_b_mint == *mint_b)
            || (self.token_a_mint == *mint_b && self.token_b_mint == *mint_a)
    }

    /// Applique des métriques fraîches. `first_detected_at` ne bouge jamais.
    pub fn apply_snapshot(&mut self, snapshot: &PoolSnapshot) {
        if snapshot.token_a_mint != Pubkey::default() {
            self.token_a_mint = snapshot.token_a_mint;
            self.token_b_mint = snapshot.token_b_mint;
        }
        self.price = snapshot.price;
        self.volume_24h = snapshot.volume.h24;
        self.liquidity = snapshot.liquidity;
        self.last_update = Utc::now();
    }
}

/// Fenêtre de volume demandée par `get_token_volume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M5,
    H1,
    H6,
    H24,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeWindows {
    pub m5: f64,
    pub h1: f64,
    pub h6: f64,
    pub h24: f64,
}

impl VolumeWindows {
    pub fn get(&self, timeframe: Timeframe) -> f64 {
        match timeframe {
            Timeframe::M5 => self.m5,
            Timeframe::H1 => self.h1,
            Timeframe::H6 => self.h6,
            Timeframe::H24 => self.h24,
        }
    }
}

/// Métriques d'un pool telles que renvoyées par une source de données.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSnapshot {
    pub address: Pubkey,
    pub dex: String,
    pub token_a_mint: Pubkey,
    pub token_b_mint: Pubkey,
    pub price: f64,
    pub volume: VolumeWindows,
    pub liquidity: Decimal,
}

impl PoolSnapshot {
    /// Vue `PoolRecord` d'un snapshot venant d'une autre source (table cross-dex).
    pub fn to_record(&self) -> PoolRecord {
        let mut record = PoolRecord::detected(&self.dex, self.address, self.token_a_mint, self.token_b_mint);
        record.apply_snapshot(self);
        record
    }
}

/// (Dé)sérialise une `Pubkey` en base58 plutôt qu'en tableau d'octets.
pub mod serde_pubkey {
    use serde::{Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S>(pubkey: &Pubkey, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(pubkey)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Pubkey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Pubkey::from_str(&s).map_err(serde::de::Error::custom)
    }
}
