// src/lib.rs

// On déclare tous nos modules principaux pour les rendre publics et
// utilisables par le binaire (pool_monitor.rs) et les tests d'intégration.
pub mod backup;
pub mod config;
pub mod consistency;
pub mod data_pipeline;
pub mod discovery;
pub mod error;
pub mod events;
pub mod monitoring;
pub mod rpc;
pub mod service;
pub mod state;
pub mod throttle;

pub use error::{MonitorError, Result};
pub use service::PoolMonitorService;
