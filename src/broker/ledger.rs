//! Position ledger with average-cost P&L accounting
//!
//! One position per symbol: signed quantity, average entry price, and
//! realized P&L. Additions re-weight the average; reductions book realized
//! P&L against the pre-fill average. Positions are created on first fill and
//! never physically deleted, so realized history survives going flat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::broker::types::Fill;
use crate::error::InvariantViolation;
use crate::types::{Money, Side, Symbol};

/// Per-symbol holding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Signed quantity: positive long, negative short
    pub quantity: Money,
    /// Average cost basis; defined only while quantity != 0
    pub avg_price: Option<Money>,
    /// Cumulative realized P&L, booked only on quantity-reducing fills
    pub realized_pnl: Money,
    pub last_update: DateTime<Utc>,
}

impl Position {
    fn new(symbol: Symbol, timestamp: DateTime<Utc>) -> Self {
        Position {
            symbol,
            quantity: Money::ZERO,
            avg_price: None,
            realized_pnl: Money::ZERO,
            last_update: timestamp,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.is_zero()
    }

    /// Unrealized P&L at the given price; zero while flat
    pub fn unrealized_pnl(&self, price: Money) -> Money {
        match self.avg_price {
            Some(avg) => self.quantity * (price - avg),
            None => Money::ZERO,
        }
    }

    /// Signed cash value of the holding at the given price
    pub fn market_value(&self, price: Money) -> Money {
        self.quantity * price
    }
}

/// What a fill did to the ledger
#[derive(Debug, Clone, Copy)]
pub struct FillEffect {
    /// Quantity that reduced an existing holding
    pub closed_qty: Money,
    /// Realized P&L booked by this fill (gross of fees)
    pub realized_delta: Money,
}

/// All positions for one portfolio
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionLedger {
    positions: HashMap<Symbol, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Signed held quantity; zero when the symbol has never traded
    pub fn held_qty(&self, symbol: &Symbol) -> Money {
        self.positions
            .get(symbol)
            .map(|p| p.quantity)
            .unwrap_or(Money::ZERO)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Symbol, &Position)> {
        self.positions.iter()
    }

    /// Count of positions with non-zero quantity
    pub fn open_count(&self) -> usize {
        self.positions.values().filter(|p| !p.is_flat()).count()
    }

    /// Apply one fill. Additions re-weight the average cost; reductions book
    /// realized P&L from the pre-fill average. A reduction larger than the
    /// holding refuses the mutation: admission checks make it unreachable.
    pub fn apply(&mut self, fill: &Fill) -> Result<FillEffect, InvariantViolation> {
        let position = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::new(fill.symbol.clone(), fill.timestamp));

        let delta = match fill.side {
            Side::Buy => fill.quantity,
            Side::Sell => -fill.quantity,
        };

        let adding = position.quantity.is_zero()
            || position.quantity.signum() == delta.signum();

        let effect = if adding {
            let old_qty = position.quantity.abs();
            let old_avg = position.avg_price.unwrap_or(Money::ZERO);
            let new_qty = old_qty + fill.quantity;

            position.avg_price =
                Some((old_avg * old_qty + fill.exec_price * fill.quantity) / new_qty);
            position.quantity += delta;

            FillEffect {
                closed_qty: Money::ZERO,
                realized_delta: Money::ZERO,
            }
        } else {
            if fill.quantity > position.quantity.abs() {
                return Err(InvariantViolation::NegativeQuantity {
                    symbol: fill.symbol.clone(),
                    qty: position.quantity,
                    reduction: fill.quantity,
                });
            }

            let avg = position
                .avg_price
                .expect("non-zero position always has an average price");
            let sign = position.quantity.signum();
            let realized = (fill.exec_price - avg) * fill.quantity * sign;

            position.realized_pnl += realized;
            position.quantity += delta;
            if position.quantity.is_zero() {
                position.avg_price = None;
            }

            FillEffect {
                closed_qty: fill.quantity,
                realized_delta: realized,
            }
        };

        position.last_update = fill.timestamp;
        Ok(effect)
    }

    /// Sum of signed market values. Missing prices contribute zero: equity
    /// queries are total functions.
    pub fn market_value(&self, prices: &HashMap<Symbol, Money>) -> Money {
        self.positions
            .values()
            .map(|p| match prices.get(&p.symbol) {
                Some(&price) => p.market_value(price),
                None => Money::ZERO,
            })
            .sum()
    }

    /// Sum of unrealized P&L. Missing prices contribute zero.
    pub fn unrealized_pnl(&self, prices: &HashMap<Symbol, Money>) -> Money {
        self.positions
            .values()
            .map(|p| match prices.get(&p.symbol) {
                Some(&price) => p.unrealized_pnl(price),
                None => Money::ZERO,
            })
            .sum()
    }

    /// Total realized P&L across all symbols
    pub fn total_realized_pnl(&self) -> Money {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(symbol: &str, side: Side, qty: i64, price: f64) -> Fill {
        Fill {
            symbol: Symbol::new(symbol),
            side,
            quantity: Money::from_i64(qty),
            exec_price: Money::from_f64(price),
            fee: Money::ZERO,
            slippage: Money::ZERO,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_first_fill_creates_position() {
        let mut ledger = PositionLedger::new();
        ledger.apply(&fill("AAPL", Side::Buy, 100, 150.0)).unwrap();

        let pos = ledger.position(&Symbol::new("AAPL")).unwrap();
        assert_eq!(pos.quantity, Money::from_i64(100));
        assert_eq!(pos.avg_price, Some(Money::from_i64(150)));
        assert_eq!(pos.realized_pnl, Money::ZERO);
    }

    #[test]
    fn test_addition_reweights_average() {
        let mut ledger = PositionLedger::new();
        ledger.apply(&fill("AAPL", Side::Buy, 100, 150.0)).unwrap();
        ledger.apply(&fill("AAPL", Side::Buy, 50, 156.0)).unwrap();

        let pos = ledger.position(&Symbol::new("AAPL")).unwrap();
        assert_eq!(pos.quantity, Money::from_i64(150));
        // (150*100 + 156*50) / 150 = 152
        assert_eq!(pos.avg_price, Some(Money::from_i64(152)));
    }

    #[test]
    fn test_reduction_books_realized_pnl() {
        let mut ledger = PositionLedger::new();
        ledger.apply(&fill("AAPL", Side::Buy, 100, 150.0)).unwrap();
        let effect = ledger.apply(&fill("AAPL", Side::Sell, 40, 160.0)).unwrap();

        assert_eq!(effect.closed_qty, Money::from_i64(40));
        assert_eq!(effect.realized_delta, Money::from_i64(400)); // (160-150)*40

        let pos = ledger.position(&Symbol::new("AAPL")).unwrap();
        assert_eq!(pos.quantity, Money::from_i64(60));
        // Reduction leaves the average untouched
        assert_eq!(pos.avg_price, Some(Money::from_i64(150)));
        assert_eq!(pos.realized_pnl, Money::from_i64(400));
    }

    #[test]
    fn test_full_close_clears_average() {
        let mut ledger = PositionLedger::new();
        ledger.apply(&fill("AAPL", Side::Buy, 100, 150.0)).unwrap();
        ledger.apply(&fill("AAPL", Side::Sell, 100, 145.0)).unwrap();

        let pos = ledger.position(&Symbol::new("AAPL")).unwrap();
        assert!(pos.is_flat());
        assert_eq!(pos.avg_price, None);
        assert_eq!(pos.realized_pnl, Money::from_i64(-500));
        // Flat position still exists, with history
        assert_eq!(ledger.open_count(), 0);
    }

    #[test]
    fn test_partial_closes_equal_single_close() {
        let mut one = PositionLedger::new();
        one.apply(&fill("AAPL", Side::Buy, 100, 150.0)).unwrap();
        one.apply(&fill("AAPL", Side::Sell, 100, 160.0)).unwrap();

        let mut two = PositionLedger::new();
        two.apply(&fill("AAPL", Side::Buy, 100, 150.0)).unwrap();
        two.apply(&fill("AAPL", Side::Sell, 60, 160.0)).unwrap();
        two.apply(&fill("AAPL", Side::Sell, 40, 160.0)).unwrap();

        assert_eq!(one.total_realized_pnl(), two.total_realized_pnl());
        assert_eq!(one.total_realized_pnl(), Money::from_i64(1000));
    }

    #[test]
    fn test_over_reduction_is_invariant_violation() {
        let mut ledger = PositionLedger::new();
        ledger.apply(&fill("AAPL", Side::Buy, 10, 150.0)).unwrap();

        let err = ledger.apply(&fill("AAPL", Side::Sell, 11, 150.0));
        assert!(matches!(
            err,
            Err(InvariantViolation::NegativeQuantity { .. })
        ));
        // Refused mutation left the ledger untouched
        assert_eq!(
            ledger.held_qty(&Symbol::new("AAPL")),
            Money::from_i64(10)
        );
    }

    #[test]
    fn test_short_position_pnl_sign() {
        // Ledger math stays sign-correct even though the public order path
        // never opens shorts
        let mut ledger = PositionLedger::new();
        ledger.apply(&fill("AAPL", Side::Sell, 10, 150.0)).unwrap();
        assert_eq!(
            ledger.held_qty(&Symbol::new("AAPL")),
            Money::from_i64(-10)
        );

        // Buy back lower: profit
        let cover = fill("AAPL", Side::Buy, 10, 140.0);
        let effect = ledger.apply(&cover).unwrap();
        assert_eq!(effect.realized_delta, Money::from_i64(100));
    }

    #[test]
    fn test_equity_views_total_over_missing_prices() {
        let mut ledger = PositionLedger::new();
        ledger.apply(&fill("AAPL", Side::Buy, 100, 150.0)).unwrap();
        ledger.apply(&fill("MSFT", Side::Buy, 10, 300.0)).unwrap();

        // Only AAPL has a mark
        let mut prices = HashMap::new();
        prices.insert(Symbol::new("AAPL"), Money::from_i64(160));

        assert_eq!(ledger.market_value(&prices), Money::from_i64(16_000));
        assert_eq!(ledger.unrealized_pnl(&prices), Money::from_i64(1_000));
    }
}
