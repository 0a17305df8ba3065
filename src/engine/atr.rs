use crate::domain::candle::Candle;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};

/// Rolling ATR (SMA of True Range) over confirmed 15-minute candles.
/// Bounded to `period + 20` retained candles. Undefined until at least
/// `period + 1` candles have been observed.
pub struct AtrEngine {
    period: usize,
    buffers: HashMap<String, VecDeque<Candle>>,
}

impl AtrEngine {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            buffers: HashMap::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.period + 20
    }

    /// Seeds the buffer from history (bootstrap path). `candles` oldest-first.
    pub fn initialize(&mut self, symbol: &str, candles: &[Candle]) {
        let cap = self.capacity();
        let mut buf = VecDeque::with_capacity(cap);
        for c in candles.iter().rev().take(cap).rev() {
            buf.push_back(*c);
        }
        self.buffers.insert(symbol.to_string(), buf);
    }

    pub fn update(&mut self, symbol: &str, confirmed: Candle) {
        let cap = self.capacity();
        let buf = self.buffers.entry(symbol.to_string()).or_default();
        if buf.len() == cap {
            buf.pop_front();
        }
        buf.push_back(confirmed);
    }

    pub fn remove_symbol(&mut self, symbol: &str) {
        self.buffers.remove(symbol);
    }

    /// `None` until at least `period + 1` candles are available.
    pub fn atr(&self, symbol: &str) -> Option<Decimal> {
        let buf = self.buffers.get(symbol)?;
        if buf.len() < self.period + 1 {
            return None;
        }

        let trs: Vec<Decimal> = buf
            .iter()
            .collect::<Vec<_>>()
            .windows(2)
            .map(|w| {
                let (prev, curr) = (w[0], w[1]);
                let a = curr.high - curr.low;
                let b = (curr.high - prev.close).abs();
                let c = (curr.low - prev.close).abs();
                a.max(b).max(c)
            })
            .collect();

        let last_n = &trs[trs.len() - self.period..];
        let sum: Decimal = last_n.iter().copied().sum();
        Some(sum / Decimal::from(self.period as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(h: f64, l: f64, c: f64) -> Candle {
        Candle {
            timestamp_ms: 0,
            open: dec!(0),
            high: Decimal::try_from(h).unwrap(),
            low: Decimal::try_from(l).unwrap(),
            close: Decimal::try_from(c).unwrap(),
            volume: dec!(0),
            confirmed: true,
        }
    }

    #[test]
    fn undefined_until_period_plus_one() {
        let mut atr = AtrEngine::new(3);
        for _ in 0..3 {
            atr.update("BTCUSDT", candle(101.0, 99.0, 100.0));
        }
        assert!(atr.atr("BTCUSDT").is_none());
        atr.update("BTCUSDT", candle(101.0, 99.0, 100.0));
        assert!(atr.atr("BTCUSDT").is_some());
    }

    #[test]
    fn flat_candles_give_flat_range_atr() {
        let mut atr = AtrEngine::new(2);
        atr.update("BTCUSDT", candle(101.0, 99.0, 100.0));
        atr.update("BTCUSDT", candle(102.0, 98.0, 100.0));
        atr.update("BTCUSDT", candle(103.0, 97.0, 100.0));
        // TR per step: (102-98)=4 vs |102-100|=2 vs |98-100|=2 -> 4; then (103-97)=6 -> 6
        // ATR(period=2) = mean(4, 6) = 5
        assert_eq!(atr.atr("BTCUSDT"), Some(dec!(5)));
    }
}
