//! Wires every domain port to its concrete adapter and drives the
//! process-lifetime event loop: boot sequence, WS dispatch, and the
//! kill-switch / coin-refresh / daily-summary / metrics timers.

mod bootstrap;

pub use bootstrap::Application;
