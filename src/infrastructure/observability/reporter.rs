//! Periodic JSON snapshot of engine health, output to stdout so it can be
//! picked up by any log shipper. No HTTP server, no incoming requests —
//! this only ever sends data.

use crate::engine::slot_manager::SlotStatusSummary;
use crate::infrastructure::observability::metrics::Metrics;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub slots: SlotsSnapshot,
    pub tracked_coins: usize,
    pub kill_switch_triggered: bool,
}

#[derive(Serialize)]
pub struct SlotsSnapshot {
    pub available: usize,
    pub in_trade: usize,
    pub cooldown: usize,
    pub frozen: usize,
    pub total_balance_usd: f64,
    pub total_pnl_usd: f64,
}

/// Drives the `Metrics` gauges from a point-in-time view of engine state and
/// logs a JSON snapshot. Called on a fixed interval by the orchestrator's
/// own event loop — there is no dedicated reporter task, since slot/trade
/// state is owned by that loop and never shared behind a lock.
pub struct MetricsReporter {
    metrics: Metrics,
    start_time: Instant,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics, start_time: Instant::now() }
    }

    pub fn record_cycle(
        &self,
        summary: &SlotStatusSummary,
        tracked_coins: usize,
        unrealised_pnl: Decimal,
        kill_switch_triggered: bool,
    ) {
        let uptime = self.start_time.elapsed();
        let equity = summary.total_balance + unrealised_pnl;

        self.metrics.total_equity_usd.set(equity.to_f64().unwrap_or(0.0));
        self.metrics.slots_available.set(summary.available as f64);
        self.metrics.slots_in_trade.set(summary.in_trade as f64);
        self.metrics.tracked_coins.set(tracked_coins as f64);
        self.metrics
            .kill_switch_triggered
            .set(if kill_switch_triggered { 1.0 } else { 0.0 });
        self.metrics.uptime_seconds.set(uptime.as_secs() as f64);

        let snapshot = self.build_snapshot(summary, tracked_coins, uptime, kill_switch_triggered);
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                println!("METRICS_JSON:{json}");
                info!(
                    equity_usd = %equity,
                    available = summary.available,
                    in_trade = summary.in_trade,
                    uptime_seconds = uptime.as_secs(),
                    "engine health snapshot"
                );
            }
            Err(e) => warn!(error = %e, "failed to serialize metrics snapshot"),
        }
    }

    fn build_snapshot(
        &self,
        summary: &SlotStatusSummary,
        tracked_coins: usize,
        uptime: Duration,
        kill_switch_triggered: bool,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime.as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            slots: SlotsSnapshot {
                available: summary.available,
                in_trade: summary.in_trade,
                cooldown: summary.cooldown,
                frozen: summary.frozen,
                total_balance_usd: summary.total_balance.to_f64().unwrap_or(0.0),
                total_pnl_usd: summary.total_pnl.to_f64().unwrap_or(0.0),
            },
            tracked_coins,
            kill_switch_triggered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn summary() -> SlotStatusSummary {
        SlotStatusSummary {
            num_slots: 8,
            available: 6,
            in_trade: 2,
            cooldown: 0,
            frozen: 0,
            total_balance: dec!(80),
            total_pnl: dec!(5),
        }
    }

    #[test]
    fn record_cycle_updates_gauges() {
        let reporter = MetricsReporter::new(Metrics::new().unwrap());
        reporter.record_cycle(&summary(), 20, dec!(1.5), false);
        assert_eq!(reporter.metrics.total_equity_usd.get(), 81.5);
        assert_eq!(reporter.metrics.slots_available.get(), 6.0);
    }
}
