use rust_decimal::Decimal;

/// Tradeable instrument metadata as maintained by the Coin Selector.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinInfo {
    pub symbol: String,
    pub base_asset: String,
    pub volume_24h: Decimal,
    pub min_qty: Decimal,
    pub qty_step: Decimal,
    pub tick_size: Decimal,
    pub in_active_trade: bool,
}

impl CoinInfo {
    pub fn new(
        symbol: impl Into<String>,
        base_asset: impl Into<String>,
        volume_24h: Decimal,
        min_qty: Decimal,
        qty_step: Decimal,
        tick_size: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            base_asset: base_asset.into(),
            volume_24h,
            min_qty,
            qty_step,
            tick_size,
            in_active_trade: false,
        }
    }
}
