pub mod dexscreener;

pub use dexscreener::DexScreenerSource;
