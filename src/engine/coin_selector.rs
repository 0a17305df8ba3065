use crate::domain::coin::CoinInfo;
use crate::domain::errors::EngineResult;
use crate::domain::ports::ExchangeRest;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Maintains the top-N-by-24h-turnover tradeable universe.
pub struct CoinSelector {
    num_coins: usize,
    excluded_stablecoins: HashSet<String>,
    coins: HashMap<String, CoinInfo>,
}

impl CoinSelector {
    pub fn new(num_coins: usize, excluded_stablecoins: Vec<String>) -> Self {
        Self {
            num_coins,
            excluded_stablecoins: excluded_stablecoins.into_iter().collect(),
            coins: HashMap::new(),
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.coins.keys().cloned().collect()
    }

    pub fn is_in_trade(&self, symbol: &str) -> bool {
        self.coins
            .get(symbol)
            .map(|c| c.in_active_trade)
            .unwrap_or(false)
    }

    pub fn mark_in_trade(&mut self, symbol: &str, in_trade: bool) {
        if let Some(c) = self.coins.get_mut(symbol) {
            c.in_active_trade = in_trade;
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&CoinInfo> {
        self.coins.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.coins.contains_key(symbol)
    }

    /// Fetches tickers + instrument specs, filters to USDT perps not in the
    /// stablecoin exclusion set, sorts by 24h turnover descending, truncates
    /// to top-N. Preserves `in_active_trade` flags across refreshes. Never
    /// drops a symbol with `in_active_trade = true`.
    pub async fn refresh(
        &mut self,
        rest: &dyn ExchangeRest,
    ) -> EngineResult<(Vec<String>, Vec<String>)> {
        let tickers = rest.get_tickers().await?;
        let instruments = rest.get_instruments().await?;
        let specs: HashMap<&str, &crate::domain::ports::InstrumentSpec> =
            instruments.iter().map(|i| (i.symbol.as_str(), i)).collect();

        let mut candidates: Vec<(&crate::domain::ports::TickerSnapshot, &crate::domain::ports::InstrumentSpec)> =
            tickers
                .iter()
                .filter_map(|t| {
                    if !t.symbol.ends_with("USDT") {
                        return None;
                    }
                    let spec = specs.get(t.symbol.as_str())?;
                    if self.excluded_stablecoins.contains(&spec.base_asset) {
                        return None;
                    }
                    Some((t, *spec))
                })
                .collect();

        candidates.sort_by(|a, b| b.0.turnover_24h.cmp(&a.0.turnover_24h));
        candidates.truncate(self.num_coins);

        let mut new_universe: HashMap<String, CoinInfo> = candidates
            .into_iter()
            .map(|(t, spec)| {
                let mut info = CoinInfo::new(
                    t.symbol.clone(),
                    spec.base_asset.clone(),
                    t.turnover_24h,
                    spec.min_qty,
                    spec.qty_step,
                    spec.tick_size,
                );
                if let Some(old) = self.coins.get(&t.symbol) {
                    info.in_active_trade = old.in_active_trade;
                }
                (t.symbol.clone(), info)
            })
            .collect();

        // Never drop a symbol currently in an active trade, even if it fell
        // out of the top-N universe this cycle.
        for (symbol, info) in &self.coins {
            if info.in_active_trade && !new_universe.contains_key(symbol) {
                new_universe.insert(symbol.clone(), info.clone());
            }
        }

        let old_keys: HashSet<String> = self.coins.keys().cloned().collect();
        let new_keys: HashSet<String> = new_universe.keys().cloned().collect();

        let added: Vec<String> = new_keys.difference(&old_keys).cloned().collect();
        let removed: Vec<String> = old_keys.difference(&new_keys).cloned().collect();

        if added.is_empty() && removed.is_empty() {
            warn!("coin selector refresh produced no universe change");
        }

        self.coins = new_universe;
        Ok((added, removed))
    }
}
