//! Managed positions: stop-loss / take-profit / trailing-stop exits
//!
//! Each managed position is a small state machine that goes from `Open` to
//! exactly one terminal state. Exit rules are evaluated per price tick in a
//! fixed priority order and at most one rule fires:
//! stop-loss > take-profit > trailing stop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::broker::types::Fill;
use crate::error::InvariantViolation;
use crate::types::{Money, Side, Symbol};

/// Lifecycle of a managed position. Terminal states fire exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Open,
    StoppedOut,
    TookProfit,
    TrailedOut,
    ManualClose,
}

/// Why an exit fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop loss"),
            ExitReason::TakeProfit => write!(f, "take profit"),
            ExitReason::TrailingStop => write!(f, "trailing stop"),
            ExitReason::Manual => write!(f, "manual close"),
        }
    }
}

impl ExitReason {
    fn terminal_status(self) -> PositionStatus {
        match self {
            ExitReason::StopLoss => PositionStatus::StoppedOut,
            ExitReason::TakeProfit => PositionStatus::TookProfit,
            ExitReason::TrailingStop => PositionStatus::TrailedOut,
            ExitReason::Manual => PositionStatus::ManualClose,
        }
    }
}

/// A long holding wrapped with exit rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedPosition {
    pub symbol: Symbol,
    pub quantity: Money,
    pub entry_price: Money,
    pub entry_time: DateTime<Utc>,
    pub stop_price: Money,
    pub target_price: Money,
    /// Giveback from the highest price, in (0, 1)
    pub trail_pct: Money,
    /// Highest price seen since entry; monotonically non-decreasing
    pub highest_price: Money,
    pub status: PositionStatus,
}

impl ManagedPosition {
    /// Open a managed position around an entry fill
    pub fn open(
        entry: &Fill,
        stop_loss_pct: f64,
        take_profit_pct: f64,
        trailing_stop_pct: f64,
    ) -> Self {
        let entry_price = entry.exec_price;
        let one = Money::ONE;
        ManagedPosition {
            symbol: entry.symbol.clone(),
            quantity: entry.quantity,
            entry_price,
            entry_time: entry.timestamp,
            stop_price: entry_price * (one - Money::from_f64(stop_loss_pct)),
            target_price: entry_price * (one + Money::from_f64(take_profit_pct)),
            trail_pct: Money::from_f64(trailing_stop_pct),
            highest_price: entry_price,
            status: PositionStatus::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Evaluate exit rules against one price tick.
    ///
    /// Priority: stop-loss, then take-profit, then trailing. The trailing
    /// high-water mark ratchets before the trailing check, and exactly one
    /// rule fires per tick. Returns the reason without transitioning; the
    /// transition happens in [`ManagedPosition::close`] once the exit order
    /// has actually filled.
    pub fn check_exit(&mut self, price: Money) -> Option<ExitReason> {
        if !self.is_open() {
            return None;
        }

        if price <= self.stop_price {
            return Some(ExitReason::StopLoss);
        }

        if price >= self.target_price {
            return Some(ExitReason::TakeProfit);
        }

        self.highest_price = self.highest_price.max(price);
        let trail_floor = self.highest_price * (Money::ONE - self.trail_pct);
        if price <= trail_floor {
            return Some(ExitReason::TrailingStop);
        }

        None
    }

    /// Transition to the terminal state for `reason`, recording the exit
    /// fill. Closing twice is an invariant violation.
    pub fn close(
        &mut self,
        reason: ExitReason,
        exit: &Fill,
        realized_pnl: Money,
    ) -> Result<CloseRecord, InvariantViolation> {
        if !self.is_open() {
            return Err(InvariantViolation::AlreadyClosed(self.symbol.clone()));
        }
        self.status = reason.terminal_status();

        let entry_notional = self.entry_price * self.quantity;
        let net_pnl = realized_pnl - exit.fee;
        let pnl_pct = if entry_notional.is_zero() {
            0.0
        } else {
            (realized_pnl / entry_notional).to_f64() * 100.0
        };

        info!(
            symbol = %self.symbol,
            reason = %reason,
            exit_price = %exit.exec_price,
            pnl = %realized_pnl,
            "managed position closed"
        );

        Ok(CloseRecord {
            symbol: self.symbol.clone(),
            side: Side::Buy,
            quantity: self.quantity,
            entry_price: self.entry_price,
            exit_price: exit.exec_price,
            pnl: realized_pnl,
            fee: exit.fee,
            net_pnl,
            pnl_pct,
            reason,
            entry_time: self.entry_time,
            exit_time: exit.timestamp,
        })
    }
}

/// Plain-data record of a completed managed round trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseRecord {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Money,
    pub entry_price: Money,
    pub exit_price: Money,
    /// Gross realized P&L from the ledger's average basis
    pub pnl: Money,
    /// Exit-side commission
    pub fee: Money,
    pub net_pnl: Money,
    pub pnl_pct: f64,
    pub reason: ExitReason,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
}
