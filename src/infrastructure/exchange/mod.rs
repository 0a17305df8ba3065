pub mod bybit_rest;
pub mod bybit_ws;

pub use bybit_rest::BybitRest;
pub use bybit_ws::BybitWs;
