// DANS : src/discovery/classifier.rs

use crate::config::{
    METEORA_DLMM_PROGRAM_ID, ORCA_WHIRLPOOL_PROGRAM_ID, PUMP_AMM_PROGRAM_ID, RAYDIUM_AMM_V4_PROGRAM_ID,
    RAYDIUM_CLMM_PROGRAM_ID, RAYDIUM_CPMM_PROGRAM_ID,
};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;

/// Pool extrait d'une instruction de création.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedPool {
    pub address: Pubkey,
    pub token_a_mint: Pubkey,
    pub token_b_mint: Pubkey,
}

/// Décide si un compte / une instruction correspond à un pool.
/// Fonctions pures sur les octets : une heuristique, pas une preuve.
pub trait PoolClassifier: Send + Sync {
    fn is_pool_account(&self, data: &[u8]) -> bool;

    /// Mints (a, b) lus dans les données du compte, si le layout est connu.
    fn extract_mints(&self, data: &[u8]) -> Option<(Pubkey, Pubkey)>;

    /// Mots-clés de log qui signalent une création de pool.
    fn creation_keywords(&self) -> &[&'static str];

    fn pool_from_instruction(&self, accounts: &[Pubkey], data: &[u8]) -> Option<DetectedPool>;

    fn matches_logs(&self, lines: &[String]) -> bool {
        lines
            .iter()
            .any(|line| self.creation_keywords().iter().any(|keyword| line.contains(keyword)))
    }
}

/// Instruction de création : préfixe des données et indices des comptes utiles.
#[derive(Debug, Clone, Copy)]
pub struct CreationInstruction {
    pub tag: &'static [u8],
    pub pool_index: usize,
    pub mint_a_index: usize,
    pub mint_b_index: usize,
}

/// Classifieur déclaratif : discriminateur, taille et offsets des mints.
#[derive(Debug, Clone)]
pub struct LayoutClassifier {
    pub discriminator: Option<[u8; 8]>,
    pub account_len: Option<usize>,
    pub min_len: usize,
    pub mint_offsets: Option<(usize, usize)>,
    pub keywords: &'static [&'static str],
    pub creations: &'static [CreationInstruction],
}

fn read_pubkey(data: &[u8], offset: usize) -> Option<Pubkey> {
    let bytes: [u8; 32] = data.get(offset..offset + 32)?.try_into().ok()?;
    Some(Pubkey::new_from_array(bytes))
}

impl PoolClassifier for LayoutClassifier {
    fn is_pool_account(&self, data: &[u8]) -> bool {
        if data.len() < self.min_len {
            return false;
        }
        if self.account_len.is_some_and(|len| data.len() != len) {
            return false;
        }
        match &self.discriminator {
            Some(discriminator) => data.get(..8) == Some(discriminator.as_slice()),
            None => true,
        }
    }

    fn extract_mints(&self, data: &[u8]) -> Option<(Pubkey, Pubkey)> {
        let (a, b) = self.mint_offsets?;
        let mints = (read_pubkey(data, a)?, read_pubkey(data, b)?);
        // Des mints nuls trahissent un compte qui n'est pas (encore) un pool.
        (mints.0 != Pubkey::default() && mints.1 != Pubkey::default()).then_some(mints)
    }

    fn creation_keywords(&self) -> &[&'static str] {
        self.keywords
    }

    fn pool_from_instruction(&self, accounts: &[Pubkey], data: &[u8]) -> Option<DetectedPool> {
        let creation = self.creations.iter().find(|c| data.starts_with(c.tag))?;
        Some(DetectedPool {
            address: *accounts.get(creation.pool_index)?,
            token_a_mint: *accounts.get(creation.mint_a_index)?,
            token_b_mint: *accounts.get(creation.mint_b_index)?,
        })
    }
}

const GENERIC_KEYWORDS: &[&str] = &["InitializePool", "CreatePool", "Initialize2", "InitializeLbPair"];

// --- LAYOUTS DES DEX CONNUS ---

const ANCHOR_POOL_STATE: [u8; 8] = [247, 237, 227, 245, 215, 195, 222, 70];

pub fn raydium_amm_v4() -> LayoutClassifier {
    LayoutClassifier {
        discriminator: None,
        account_len: Some(752),
        min_len: 752,
        mint_offsets: Some((400, 432)),
        keywords: &["initialize2", "Initialize2"],
        creations: &[
            CreationInstruction { tag: &[0], pool_index: 3, mint_a_index: 7, mint_b_index: 8 },
            CreationInstruction { tag: &[1], pool_index: 4, mint_a_index: 8, mint_b_index: 9 },
        ],
    }
}

pub fn raydium_cpmm() -> LayoutClassifier {
    LayoutClassifier {
        discriminator: Some(ANCHOR_POOL_STATE),
        account_len: Some(637),
        min_len: 232,
        mint_offsets: Some((168, 200)),
        keywords: &["Instruction: Initialize", "InitializeWithPermission"],
        creations: &[
            CreationInstruction {
                tag: &[175, 175, 109, 31, 13, 152, 155, 237],
                pool_index: 3,
                mint_a_index: 4,
                mint_b_index: 5,
            },
            CreationInstruction {
                tag: &[63, 55, 254, 65, 49, 178, 89, 121],
                pool_index: 4,
                mint_a_index: 5,
                mint_b_index: 6,
            },
        ],
    }
}

pub fn raydium_clmm() -> LayoutClassifier {
    LayoutClassifier {
        discriminator: Some(ANCHOR_POOL_STATE),
        account_len: Some(1544),
        min_len: 137,
        mint_offsets: Some((73, 105)),
        keywords: &["Instruction: CreatePool"],
        creations: &[CreationInstruction {
            tag: &[233, 146, 209, 142, 207, 104, 64, 188],
            pool_index: 2,
            mint_a_index: 3,
            mint_b_index: 4,
        }],
    }
}

pub fn orca_whirlpool() -> LayoutClassifier {
    LayoutClassifier {
        discriminator: Some([63, 149, 209, 12, 225, 128, 99, 9]),
        account_len: Some(653),
        min_len: 213,
        mint_offsets: Some((101, 181)),
        keywords: &["Instruction: InitializePool"],
        creations: &[CreationInstruction {
            tag: &[95, 180, 10, 172, 84, 174, 232, 40],
            pool_index: 4,
            mint_a_index: 1,
            mint_b_index: 2,
        }],
    }
}

pub fn meteora_dlmm() -> LayoutClassifier {
    LayoutClassifier {
        discriminator: Some([33, 11, 49, 98, 181, 101, 177, 13]),
        account_len: Some(904),
        min_len: 152,
        mint_offsets: Some((88, 120)),
        keywords: &["Instruction: InitializeLbPair", "Instruction: InitializePermissionLbPair", "InitializeCustomizablePermissionlessLbPair"],
        creations: &[
            CreationInstruction {
                tag: &[45, 154, 237, 210, 221, 15, 166, 92],
                pool_index: 0,
                mint_a_index: 2,
                mint_b_index: 3,
            },
            CreationInstruction {
                tag: &[108, 102, 213, 85, 251, 3, 53, 21],
                pool_index: 0,
                mint_a_index: 2,
                mint_b_index: 3,
            },
        ],
    }
}

pub fn pump_amm() -> LayoutClassifier {
    LayoutClassifier {
        discriminator: Some([241, 154, 109, 4, 17, 177, 109, 188]),
        account_len: None,
        min_len: 107,
        mint_offsets: Some((43, 75)),
        keywords: &["Instruction: CreatePool"],
        creations: &[CreationInstruction {
            tag: &[233, 146, 209, 142, 207, 104, 64, 188],
            pool_index: 0,
            mint_a_index: 3,
            mint_b_index: 4,
        }],
    }
}

/// Classifieur de repli pour un DEX sans layout connu : tout compte assez gros du programme.
pub fn generic() -> LayoutClassifier {
    LayoutClassifier {
        discriminator: None,
        account_len: None,
        min_len: 300,
        mint_offsets: None,
        keywords: GENERIC_KEYWORDS,
        creations: &[],
    }
}

/// Classifieur associé à un DEX, d'abord par programme puis par nom.
pub fn classifier_for(name: &str, program_id: &str) -> Arc<dyn PoolClassifier> {
    let layout = match program_id {
        RAYDIUM_AMM_V4_PROGRAM_ID => raydium_amm_v4(),
        RAYDIUM_CPMM_PROGRAM_ID => raydium_cpmm(),
        RAYDIUM_CLMM_PROGRAM_ID => raydium_clmm(),
        ORCA_WHIRLPOOL_PROGRAM_ID => orca_whirlpool(),
        METEORA_DLMM_PROGRAM_ID => meteora_dlmm(),
        PUMP_AMM_PROGRAM_ID => pump_amm(),
        _ => match name {
            "raydium-amm-v4" => raydium_amm_v4(),
            "raydium-cpmm" => raydium_cpmm(),
            "raydium-clmm" => raydium_clmm(),
            "orca-whirlpool" => orca_whirlpool(),
            "meteora-dlmm" => meteora_dlmm(),
            "pump-amm" => pump_amm(),
            _ => generic(),
        },
    };
    Arc::new(layout)
}
