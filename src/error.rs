// DANS : src/error.rs

use thiserror::Error;

/// Taxonomie des erreurs du moniteur.
/// Aucune n'est fatale : chaque frontière d'opération les journalise et continue.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Erreur réseau temporaire, la seule qui déclenche un ré-essai.
    #[error("erreur réseau temporaire : {0}")]
    TransientNetwork(String),

    /// Payload de compte/log mal formé. Journalisé puis ignoré.
    #[error("données invalides : {0}")]
    InvalidData(String),

    /// Échec d'abonnement limité à un seul DEX.
    #[error("échec d'abonnement pour le DEX {dex} : {reason}")]
    SubscriptionSetup { dex: String, reason: String },

    #[error("erreur d'E/S de backup : {0}")]
    BackupIo(String),

    /// L'amont a répondu, mais avec une réponse inutilisable (4xx, JSON inattendu...).
    #[error("réponse amont rejetée : {0}")]
    Upstream(String),

    #[error("configuration invalide : {0}")]
    Config(String),

    #[error("introuvable : {0}")]
    NotFound(String),

    /// Création ou enregistrement d'un collecteur Prometheus refusé.
    #[error("métriques : {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MonitorError {
    /// Détermine si l'erreur est temporaire et si une nouvelle tentative doit être effectuée.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MonitorError::TransientNetwork(_))
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(e: std::io::Error) -> Self {
        MonitorError::BackupIo(e.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(e: serde_json::Error) -> Self {
        MonitorError::InvalidData(e.to_string())
    }
}

impl From<csv::Error> for MonitorError {
    fn from(e: csv::Error) -> Self {
        MonitorError::BackupIo(e.to_string())
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return MonitorError::TransientNetwork(e.to_string());
        }
        match e.status() {
            Some(status) if status.is_server_error() || status.as_u16() == 429 => {
                MonitorError::TransientNetwork(e.to_string())
            }
            Some(_) => MonitorError::Upstream(e.to_string()),
            None if e.is_decode() => MonitorError::InvalidData(e.to_string()),
            None => MonitorError::TransientNetwork(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
