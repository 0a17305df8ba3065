//! Prometheus metric definitions. All metrics use the `haflip_` prefix and
//! are written only by the owning loop that observes the underlying event.

use prometheus::{
    CounterVec, Gauge, Opts, Registry,
    core::GenericGauge,
};
use prometheus::core::AtomicF64;
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub total_equity_usd: GenericGauge<AtomicF64>,
    pub slots_available: GenericGauge<AtomicF64>,
    pub slots_in_trade: GenericGauge<AtomicF64>,
    pub tracked_coins: GenericGauge<AtomicF64>,
    pub signals_total: CounterVec,
    pub trades_total: CounterVec,
    pub kill_switch_triggered: GenericGauge<AtomicF64>,
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let total_equity_usd =
            Gauge::with_opts(Opts::new("haflip_total_equity_usd", "Slot balances plus unrealised P&L"))?;
        registry.register(Box::new(total_equity_usd.clone()))?;

        let slots_available =
            Gauge::with_opts(Opts::new("haflip_slots_available", "Number of AVAILABLE slots"))?;
        registry.register(Box::new(slots_available.clone()))?;

        let slots_in_trade =
            Gauge::with_opts(Opts::new("haflip_slots_in_trade", "Number of IN_TRADE slots"))?;
        registry.register(Box::new(slots_in_trade.clone()))?;

        let tracked_coins =
            Gauge::with_opts(Opts::new("haflip_tracked_coins", "Size of the current coin universe"))?;
        registry.register(Box::new(tracked_coins.clone()))?;

        let signals_total = CounterVec::new(
            Opts::new("haflip_signals_total", "HA flip signals acted on, by side"),
            &["side"],
        )?;
        registry.register(Box::new(signals_total.clone()))?;

        let trades_total = CounterVec::new(
            Opts::new("haflip_trades_total", "Trades closed, by exit reason"),
            &["exit_reason"],
        )?;
        registry.register(Box::new(trades_total.clone()))?;

        let kill_switch_triggered = Gauge::with_opts(Opts::new(
            "haflip_kill_switch_triggered",
            "1 if the kill switch has fired this process lifetime, else 0",
        ))?;
        registry.register(Box::new(kill_switch_triggered.clone()))?;

        let uptime_seconds =
            Gauge::with_opts(Opts::new("haflip_uptime_seconds", "Process uptime in seconds"))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            total_equity_usd,
            slots_available,
            slots_in_trade,
            tracked_coins,
            signals_total,
            trades_total,
            kill_switch_triggered,
            uptime_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_duplicate_collector_error() {
        let metrics = Metrics::new().expect("metrics should register cleanly");
        metrics.total_equity_usd.set(42.0);
        assert_eq!(metrics.total_equity_usd.get(), 42.0);
    }

    #[test]
    fn counters_are_labeled_independently() {
        let metrics = Metrics::new().unwrap();
        metrics.signals_total.with_label_values(&["long"]).inc();
        metrics.signals_total.with_label_values(&["short"]).inc();
        assert_eq!(metrics.signals_total.with_label_values(&["long"]).get(), 1.0);
        assert_eq!(metrics.signals_total.with_label_values(&["short"]).get(), 1.0);
    }
}
