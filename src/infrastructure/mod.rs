//! Adapters implementing the domain's trait seams against concrete
//! external systems: Bybit REST/WS, SQLite persistence, Telegram
//! notifications, and push-based observability.

pub mod exchange;
pub mod http_client_factory;
pub mod notifier;
pub mod observability;
pub mod persistence;
