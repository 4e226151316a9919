//! Fill simulator
//!
//! Turns an order plus the current mark price into exactly one fill or one
//! rejection. Admission checks run in a fixed order and the first failure
//! wins, so resubmitting an identical order against unchanged state always
//! yields the same reason.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::broker::types::{Fill, Order, OrderType, RejectReason};
use crate::config::FeeConfig;
use crate::types::{Money, Side};

/// Stateless order-to-fill evaluator under a transaction-cost model
#[derive(Debug, Clone)]
pub struct FillSimulator {
    fees: FeeConfig,
}

impl FillSimulator {
    pub fn new(fees: FeeConfig) -> Self {
        Self { fees }
    }

    /// Evaluate an order against the current mark and portfolio state.
    ///
    /// Pure: mutation is the caller's job, applied atomically from the
    /// returned fill. Check order (first failure wins):
    /// 1. quantity positive
    /// 2. mark price present
    /// 3. limit orders marketable
    /// 4. buys covered by free cash (notional + fee)
    /// 5. sells covered by held quantity
    pub fn evaluate(
        &self,
        order: &Order,
        mark: Option<Money>,
        free_cash: Money,
        held_qty: Money,
        timestamp: DateTime<Utc>,
    ) -> Result<Fill, RejectReason> {
        if !order.quantity.is_positive() {
            return Err(RejectReason::QtyNotPositive);
        }

        let mark = mark.ok_or(RejectReason::MissingMarkPrice)?;

        if order.order_type == OrderType::Limit {
            let limit = order.limit_price.ok_or(RejectReason::LimitPriceRequired)?;
            let marketable = match order.side {
                Side::Buy => limit >= mark,
                Side::Sell => limit <= mark,
            };
            if !marketable {
                return Err(RejectReason::NotMarketable);
            }
        }

        // Slippage always worsens the fill relative to the mark
        let slip = mark * Money::bps(self.fees.slippage_bps);
        let exec_price = match order.side {
            Side::Buy => mark + slip,
            Side::Sell => mark - slip,
        };

        let notional = exec_price * order.quantity;
        let fee = self
            .fees
            .min_fee
            .max(notional * Money::bps(self.fees.commission_bps));

        match order.side {
            Side::Buy => {
                if free_cash < notional + fee {
                    return Err(RejectReason::InsufficientCash);
                }
            }
            Side::Sell => {
                if held_qty.abs() < order.quantity {
                    return Err(RejectReason::InsufficientPosition);
                }
            }
        }

        debug!(
            symbol = %order.symbol,
            side = %order.side,
            qty = %order.quantity,
            mark = %mark,
            exec = %exec_price,
            fee = %fee,
            "order accepted"
        );

        Ok(Fill {
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            exec_price,
            fee,
            slippage: slip * order.quantity,
            timestamp,
        })
    }
}
