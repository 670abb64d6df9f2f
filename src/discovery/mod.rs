// DANS : src/discovery/mod.rs

// Détection des nouveaux pools : classification, pipeline de détection, abonnements.
pub mod classifier;
pub mod detector;
pub mod subscriptions;

pub use classifier::{DetectedPool, LayoutClassifier, PoolClassifier, classifier_for};
pub use detector::{DexTarget, PoolDetector};
pub use subscriptions::{StartReport, Subscription, SubscriptionKind, SubscriptionManager};
