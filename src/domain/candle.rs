use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single OHLCV candle. `timestamp_ms` is the start-of-interval instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub confirmed: bool,
}

/// A Heiken-Ashi candle derived from a confirmed or live `Candle`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HACandle {
    pub timestamp_ms: i64,
    pub ha_open: Decimal,
    pub ha_close: Decimal,
    pub ha_high: Decimal,
    pub ha_low: Decimal,
}

impl HACandle {
    pub fn is_bullish(&self) -> bool {
        self.ha_close > self.ha_open
    }

    pub fn is_bearish(&self) -> bool {
        self.ha_close < self.ha_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn bullish_bearish_neither() {
        let bull = HACandle {
            timestamp_ms: 0,
            ha_open: dec!(100),
            ha_close: dec!(101),
            ha_high: dec!(101),
            ha_low: dec!(100),
        };
        assert!(bull.is_bullish());
        assert!(!bull.is_bearish());

        let flat = HACandle {
            ha_open: dec!(100),
            ha_close: dec!(100),
            ..bull
        };
        assert!(!flat.is_bullish());
        assert!(!flat.is_bearish());
    }
}
