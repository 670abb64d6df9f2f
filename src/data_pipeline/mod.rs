// src/data_pipeline/mod.rs

// Tout ce qui va chercher les métriques des pools hors de la chaîne.
pub mod api_connectors;
pub mod dex_client;
pub mod retry;
pub mod source;

pub use dex_client::{DexDataClient, LiquidityData, LiquidityHealth, SharedResources, assess_liquidity};
pub use retry::RetryPolicy;
pub use source::PoolDataSource;
