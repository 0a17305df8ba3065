//! Tick/lot rounding policies shared by the Order Executor and Risk Manager.
//!
//! Every price the engine pushes to the exchange is rounded to the symbol's
//! `tick_size`; every quantity is rounded down to `qty_step`. Direction of
//! rounding (favorable vs conservative) is always the caller's decision —
//! these helpers only do the arithmetic.

use rust_decimal::Decimal;

/// Round `price` to the nearest multiple of `tick` below or at it, or above
/// or at it, depending on `round_up`. `tick` must be strictly positive.
pub fn round_to_tick(price: Decimal, tick: Decimal, round_up: bool) -> Decimal {
    debug_assert!(tick > Decimal::ZERO, "tick_size must be positive");
    let units = price / tick;
    let rounded_units = if round_up { units.ceil() } else { units.floor() };
    rounded_units * tick
}

/// `floor(notional / price / qty_step) * qty_step`. Returns `None` if the
/// resulting quantity is below `min_qty`.
pub fn round_qty(
    notional: Decimal,
    price: Decimal,
    qty_step: Decimal,
    min_qty: Decimal,
) -> Option<Decimal> {
    debug_assert!(qty_step > Decimal::ZERO, "qty_step must be positive");
    if price <= Decimal::ZERO {
        return None;
    }
    let raw_qty = notional / price;
    let steps = (raw_qty / qty_step).floor();
    let qty = steps * qty_step;
    if qty < min_qty { None } else { Some(qty) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_to_tick_down_and_up() {
        assert_eq!(round_to_tick(dec!(100.37), dec!(0.1), false), dec!(100.3));
        assert_eq!(round_to_tick(dec!(100.37), dec!(0.1), true), dec!(100.4));
        assert_eq!(round_to_tick(dec!(100.30), dec!(0.1), false), dec!(100.3));
    }

    #[test]
    fn round_qty_floors_to_step_and_enforces_min() {
        let qty = round_qty(dec!(80), dec!(100), dec!(0.001), dec!(0.001)).unwrap();
        assert_eq!(qty, dec!(0.800));

        assert!(round_qty(dec!(1), dec!(100000), dec!(0.001), dec!(0.001)).is_none());
    }
}
