//! Simulated brokerage
//!
//! Orders come in, exactly one Fill or one Rejection comes out, and the
//! cash/position ledger stays exact:
//! - Fill simulation with slippage and commission in basis points
//! - Average-cost position ledger with realized P&L on reductions
//! - Portfolio equity/unrealized views that are total functions of prices
//! - Managed positions with stop-loss/take-profit/trailing-stop exits

pub mod execution;
pub mod ledger;
pub mod managed;
pub mod portfolio;
pub mod types;

pub use execution::FillSimulator;
pub use ledger::{Position, PositionLedger};
pub use managed::{CloseRecord, ExitReason, ManagedPosition, PositionStatus};
pub use portfolio::Portfolio;
pub use types::{ExecutionOutcome, Fill, Order, OrderType, RejectReason, Rejection};
