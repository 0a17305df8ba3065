use crate::domain::candle::{Candle, HACandle};
use crate::domain::signal::{Side, Signal};
use std::collections::{HashMap, VecDeque};

const MAX_RETAINED: usize = 50;

fn ha_close(c: &Candle) -> rust_decimal::Decimal {
    (c.open + c.high + c.low + c.close) / rust_decimal::Decimal::from(4)
}

fn ha_open_from_prev(prev: &HACandle) -> rust_decimal::Decimal {
    (prev.ha_open + prev.ha_close) / rust_decimal::Decimal::from(2)
}

fn ha_candle_from(c: &Candle, ha_open: rust_decimal::Decimal) -> HACandle {
    let close = ha_close(c);
    HACandle {
        timestamp_ms: c.timestamp_ms,
        ha_open,
        ha_close: close,
        ha_high: c.high.max(ha_open).max(close),
        ha_low: c.low.min(ha_open).min(close),
    }
}

fn flip_signal(symbol: &str, prev: &HACandle, curr: &HACandle) -> Option<Signal> {
    let side = if prev.is_bearish() && curr.is_bullish() {
        Side::Long
    } else if prev.is_bullish() && curr.is_bearish() {
        Side::Short
    } else {
        return None;
    };
    Some(Signal {
        symbol: symbol.to_string(),
        side,
        detected_at: chrono::Utc::now(),
        ha_candle: *curr,
    })
}

/// Stateful per-symbol Heiken-Ashi series keeper and flip detector.
#[derive(Default)]
pub struct HaEngine {
    series: HashMap<String, VecDeque<HACandle>>,
    previous: HashMap<String, HACandle>,
}

impl HaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// `candles` must be sorted oldest-first.
    pub fn build_from_history(&mut self, symbol: &str, candles: &[Candle]) {
        let mut deque = VecDeque::with_capacity(MAX_RETAINED);
        let mut prev: Option<HACandle> = None;

        for c in candles {
            let ha_open = match &prev {
                None => (c.open + c.close) / rust_decimal::Decimal::from(2),
                Some(p) => ha_open_from_prev(p),
            };
            let ha = ha_candle_from(c, ha_open);
            if deque.len() == MAX_RETAINED {
                deque.pop_front();
            }
            deque.push_back(ha);
            prev = Some(ha);
        }

        if let Some(p) = prev {
            self.previous.insert(symbol.to_string(), p);
        }
        self.series.insert(symbol.to_string(), deque);
    }

    /// Appends a confirmed candle, detecting a flip against the previous
    /// confirmed HA candle, and updates the chain root.
    pub fn update(&mut self, symbol: &str, confirmed: &Candle) -> (HACandle, Option<Signal>) {
        let prev = self.previous.get(symbol).copied();
        let ha_open = match &prev {
            None => (confirmed.open + confirmed.close) / rust_decimal::Decimal::from(2),
            Some(p) => ha_open_from_prev(p),
        };
        let ha = ha_candle_from(confirmed, ha_open);

        let signal = prev.as_ref().and_then(|p| flip_signal(symbol, p, &ha));

        let deque = self.series.entry(symbol.to_string()).or_default();
        if deque.len() == MAX_RETAINED {
            deque.pop_front();
        }
        deque.push_back(ha);
        self.previous.insert(symbol.to_string(), ha);

        (ha, signal)
    }

    /// Read-only: computes the HA candle for a live (unconfirmed) candle
    /// using the stored previous-confirmed HA as chain root. Does not
    /// mutate any stored state.
    pub fn calc_live(&self, symbol: &str, live: &Candle) -> Option<(HACandle, Option<Signal>)> {
        let prev = self.previous.get(symbol)?;
        let ha_open = ha_open_from_prev(prev);
        let ha = ha_candle_from(live, ha_open);
        let signal = flip_signal(symbol, prev, &ha);
        Some((ha, signal))
    }

    pub fn remove_symbol(&mut self, symbol: &str) {
        self.series.remove(symbol);
        self.previous.remove(symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(ts: i64, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            timestamp_ms: ts,
            open: rust_decimal::Decimal::try_from(o).unwrap(),
            high: rust_decimal::Decimal::try_from(h).unwrap(),
            low: rust_decimal::Decimal::try_from(l).unwrap(),
            close: rust_decimal::Decimal::try_from(c).unwrap(),
            volume: dec!(0),
            confirmed: true,
        }
    }

    #[test]
    fn flip_detection_bearish_to_bullish_is_long() {
        let mut engine = HaEngine::new();
        // Seed candle whose HA comes out bearish (ha_close=96.75 < ha_open=97.5).
        engine.build_from_history("BTCUSDT", &[candle(0, 100.0, 103.0, 89.0, 95.0)]);

        // Next candle's HA is bullish against the chained ha_open (97.125).
        let (_, signal) = engine.update("BTCUSDT", &candle(1, 95.0, 110.0, 94.0, 109.0));
        let signal = signal.expect("expected a flip signal");
        assert_eq!(signal.side, Side::Long);
    }

    #[test]
    fn no_signal_on_first_candle() {
        let mut engine = HaEngine::new();
        let (_, signal) = engine.update("BTCUSDT", &candle(0, 100.0, 101.0, 99.0, 100.5));
        assert!(signal.is_none());
    }

    #[test]
    fn calc_live_does_not_mutate_state() {
        let mut engine = HaEngine::new();
        engine.build_from_history("BTCUSDT", &[candle(0, 100.0, 101.0, 95.0, 96.0)]);

        let before = engine.previous.get("BTCUSDT").copied();
        let live = candle(1, 96.0, 110.0, 95.0, 109.0);
        let _ = engine.calc_live("BTCUSDT", &live);
        let after = engine.previous.get("BTCUSDT").copied();

        assert_eq!(before, after);
    }

    #[test]
    fn ha_round_trip_equivalence() {
        let history = vec![
            candle(0, 100.0, 102.0, 98.0, 101.0),
            candle(1, 101.0, 103.0, 99.0, 102.0),
            candle(2, 102.0, 104.0, 100.0, 99.0),
        ];
        let next = candle(3, 99.0, 105.0, 97.0, 104.0);

        let mut incremental = HaEngine::new();
        incremental.build_from_history("BTCUSDT", &history[..2]);
        incremental.update("BTCUSDT", &history[2]);
        let (incremental_final, _) = incremental.update("BTCUSDT", &next);

        let mut full = HaEngine::new();
        let mut all = history.clone();
        all.push(next);
        full.build_from_history("BTCUSDT", &all);
        let full_final = *full.series.get("BTCUSDT").unwrap().back().unwrap();

        assert_eq!(incremental_final, full_final);
    }
}
