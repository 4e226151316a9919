//! Order, fill, and rejection types
//!
//! Orders are immutable once created and consumed exactly once; every
//! submission produces either one [`Fill`] or one [`Rejection`], never both
//! and never a partial.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recovery::TradeBlock;
use crate::types::{Money, Side, Symbol};

/// Order type - determines execution logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Execute immediately at the current mark price (plus slippage)
    Market,

    /// Execute only if marketable against the current mark
    /// Buy limit: marketable when limit_price >= mark
    /// Sell limit: marketable when limit_price <= mark
    Limit,
}

/// An order request against the simulated brokerage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Money,
    /// Required for limit orders, ignored for market orders
    pub limit_price: Option<Money>,
}

impl Order {
    /// Market order at the current mark
    pub fn market(symbol: Symbol, side: Side, quantity: Money) -> Self {
        Order {
            symbol,
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
        }
    }

    /// Limit order; fills only if marketable at submission time
    pub fn limit(symbol: Symbol, side: Side, quantity: Money, limit_price: Money) -> Self {
        Order {
            symbol,
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(limit_price),
        }
    }
}

/// Immutable execution record for one accepted order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Money,
    /// Mark price adjusted by slippage
    pub exec_price: Money,
    /// Commission charged on top of notional
    pub fee: Money,
    /// Total adverse price adjustment versus the mark, in cash terms
    pub slippage: Money,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Cash value of the fill before fees
    pub fn notional(&self) -> Money {
        self.exec_price * self.quantity
    }
}

/// Why an order was refused. Always a returned value, never an `Err`.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum RejectReason {
    #[error("qty must be positive")]
    QtyNotPositive,

    #[error("missing mark price")]
    MissingMarkPrice,

    #[error("limit price required")]
    LimitPriceRequired,

    #[error("not marketable")]
    NotMarketable,

    #[error("insufficient cash")]
    InsufficientCash,

    #[error("insufficient position")]
    InsufficientPosition,

    #[error("max positions reached")]
    MaxPositions,

    #[error("trading blocked: {0}")]
    Blocked(TradeBlock),
}

/// Terminal refusal of an order. No state was mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub order: Order,
    pub reason: RejectReason,
    pub timestamp: DateTime<Utc>,
}

/// The single terminal outcome of a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionOutcome {
    Filled(Fill),
    Rejected(Rejection),
}

impl ExecutionOutcome {
    pub fn is_fill(&self) -> bool {
        matches!(self, ExecutionOutcome::Filled(_))
    }

    pub fn fill(&self) -> Option<&Fill> {
        match self {
            ExecutionOutcome::Filled(fill) => Some(fill),
            ExecutionOutcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ExecutionOutcome::Filled(_) => None,
            ExecutionOutcome::Rejected(rejection) => Some(rejection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_order_has_no_limit() {
        let order = Order::market(Symbol::new("AAPL"), Side::Buy, Money::from_i64(100));
        assert_eq!(order.order_type, OrderType::Market);
        assert!(order.limit_price.is_none());
    }

    #[test]
    fn test_limit_order_carries_price() {
        let order = Order::limit(
            Symbol::new("AAPL"),
            Side::Sell,
            Money::from_i64(10),
            Money::from_i64(155),
        );
        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.limit_price, Some(Money::from_i64(155)));
    }

    #[test]
    fn test_reject_reason_messages() {
        assert_eq!(RejectReason::QtyNotPositive.to_string(), "qty must be positive");
        assert_eq!(RejectReason::MissingMarkPrice.to_string(), "missing mark price");
        assert_eq!(RejectReason::NotMarketable.to_string(), "not marketable");
        assert_eq!(RejectReason::InsufficientCash.to_string(), "insufficient cash");
        assert_eq!(
            RejectReason::InsufficientPosition.to_string(),
            "insufficient position"
        );
    }

    #[test]
    fn test_fill_notional() {
        let fill = Fill {
            symbol: Symbol::new("AAPL"),
            side: Side::Buy,
            quantity: Money::from_i64(100),
            exec_price: Money::from_f64(150.75),
            fee: Money::from_f64(15.075),
            slippage: Money::from_i64(75),
            timestamp: Utc::now(),
        };
        assert_eq!(fill.notional(), Money::from_i64(15_075));
    }
}
