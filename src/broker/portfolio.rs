//! Portfolio: cash plus the position ledger
//!
//! The single mutation point for money. A fill debits or credits cash and
//! updates the ledger in one step; any arithmetic that would drive cash
//! negative refuses the whole mutation and surfaces a hard error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::broker::ledger::{FillEffect, Position, PositionLedger};
use crate::broker::types::Fill;
use crate::error::InvariantViolation;
use crate::types::{Money, Side, Symbol};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    cash: Money,
    ledger: PositionLedger,
}

impl Portfolio {
    pub fn new(initial_cash: Money) -> Self {
        Portfolio {
            cash: initial_cash,
            ledger: PositionLedger::new(),
        }
    }

    pub fn cash(&self) -> Money {
        self.cash
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.ledger.position(symbol)
    }

    pub fn held_qty(&self, symbol: &Symbol) -> Money {
        self.ledger.held_qty(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&Symbol, &Position)> {
        self.ledger.iter()
    }

    pub fn open_position_count(&self) -> usize {
        self.ledger.open_count()
    }

    pub fn total_realized_pnl(&self) -> Money {
        self.ledger.total_realized_pnl()
    }

    /// cash + Σ qty·price. Missing prices contribute zero.
    pub fn equity(&self, prices: &HashMap<Symbol, Money>) -> Money {
        self.cash + self.ledger.market_value(prices)
    }

    /// Σ qty·(price − avg). Missing prices contribute zero.
    pub fn unrealized_pnl(&self, prices: &HashMap<Symbol, Money>) -> Money {
        self.ledger.unrealized_pnl(prices)
    }

    /// Apply one fill atomically: move cash, then the ledger.
    ///
    /// BUY debits notional + fee; SELL credits notional − fee. Cash and
    /// quantity checks already passed admission, so a failure here is an
    /// invariant violation and nothing is mutated.
    pub fn apply_fill(&mut self, fill: &Fill) -> Result<FillEffect, InvariantViolation> {
        let notional = fill.notional();

        match fill.side {
            Side::Buy => {
                let debit = notional + fill.fee;
                if self.cash < debit {
                    return Err(InvariantViolation::NegativeCash {
                        cash: self.cash,
                        debit,
                    });
                }
                let effect = self.ledger.apply(fill)?;
                self.cash -= debit;
                Ok(effect)
            }
            Side::Sell => {
                let effect = self.ledger.apply(fill)?;
                self.cash += notional - fill.fee;
                Ok(effect)
            }
        }
    }
}
