/*
[INPUT]:  Public API exports for the gdax-ticker-feed crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod catalog;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod feed;
pub mod reconcile;
pub mod retry;
pub mod sequence;
pub mod settings;

// Re-export main types for convenience
pub use catalog::ProductCatalog;
pub use config::FeedConfig;
pub use connection::ConnectionState;
pub use feed::{Feed, PriceFeed};
pub use reconcile::ActiveSnapshot;
pub use settings::{JsonSettingsStore, SettingsStore, restore_subscriptions};
