//! Periodic equity sampler and global shutdown routine.

use crate::domain::errors::EngineResult;
use crate::domain::ports::{ExchangeRest, Notifier};
use crate::domain::repositories::StateRepository;
use crate::engine::order_executor::OrderExecutor;
use crate::engine::risk_manager::RiskManager;
use crate::engine::slot_manager::SlotManager;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const KILL_SWITCH_STATE_KEY: &str = "kill_switch_triggered";

pub struct KillSwitch {
    threshold: Decimal,
    triggered: bool,
    state_repo: Arc<dyn StateRepository>,
}

impl KillSwitch {
    pub fn new(threshold: Decimal, state_repo: Arc<dyn StateRepository>) -> Self {
        Self {
            threshold,
            triggered: false,
            state_repo,
        }
    }

    /// Boot-time safety check: the persisted flag refuses to clear itself,
    /// so a restart after a kill-switch event must not silently resume
    /// trading.
    pub async fn is_triggered_on_disk(state_repo: &dyn StateRepository) -> EngineResult<bool> {
        Ok(state_repo
            .get(KILL_SWITCH_STATE_KEY)
            .await?
            .map(|v| v == "true")
            .unwrap_or(false))
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// One monitoring cycle. Sums unrealised P&L over all open positions,
    /// adds it to the slot table's total balance, and shuts the whole
    /// engine down the first time equity drops below `threshold`.
    pub async fn run_cycle(
        &mut self,
        rest: &dyn ExchangeRest,
        slot_manager: &SlotManager,
        risk_manager: &mut RiskManager,
        order_executor: &OrderExecutor,
        notifier: &dyn Notifier,
    ) -> EngineResult<bool> {
        if self.triggered {
            return Ok(true);
        }

        let positions = rest.get_positions().await?;
        let unrealised: Decimal = positions.iter().map(|p| p.unrealised_pnl).sum();
        let equity = slot_manager.get_total_balance() + unrealised;

        if equity >= self.threshold {
            return Ok(false);
        }

        error!(%equity, threshold = %self.threshold, "kill switch threshold breached, shutting down");
        self.shutdown(rest, &positions, risk_manager, order_executor, notifier)
            .await?;
        Ok(true)
    }

    async fn shutdown(
        &mut self,
        rest: &dyn ExchangeRest,
        positions: &[crate::domain::ports::PositionSnapshot],
        risk_manager: &mut RiskManager,
        order_executor: &OrderExecutor,
        notifier: &dyn Notifier,
    ) -> EngineResult<()> {
        for position in positions {
            if let Err(e) = rest.cancel_all_orders(&position.symbol).await {
                warn!(symbol = %position.symbol, error = %e, "kill switch: cancel_all_orders failed");
            }
            if let Err(e) = order_executor
                .market_close(rest, &position.symbol, position.side, position.size)
                .await
            {
                warn!(symbol = %position.symbol, error = %e, "kill switch: market_close failed");
            }
        }

        let closed = risk_manager.force_close_all(Utc::now()).await?;
        info!(count = closed.len(), "kill switch: marked active trades closed");

        self.state_repo
            .set(KILL_SWITCH_STATE_KEY, "true")
            .await?;
        self.triggered = true;

        notifier
            .send_bot_status(
                "CRITICAL: kill switch triggered. All positions closed. Manual restart required.",
            )
            .await;
        Ok(())
    }
}
