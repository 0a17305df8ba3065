mod database;
mod repositories;

pub use database::Database;
pub use repositories::{SqliteSlotRepository, SqliteStateRepository, SqliteTradeRepository};
