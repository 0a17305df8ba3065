//! A perpetual-futures trading engine: Heiken-Ashi flip detection drives
//! entries, an ATR-derived ladder takes profit in steps, a trailing stop
//! protects what's left, and an 8-slot capital allocator bounds exposure.
//!
//! `domain` holds the types and trait seams every other layer depends on.
//! `engine` implements the strategy against those seams. `infrastructure`
//! adapts them to Bybit, SQLite and Telegram. `application` wires the two
//! together and drives the process-lifetime event loop.

pub mod application;
pub mod config;
pub mod domain;
pub mod engine;
pub mod infrastructure;
