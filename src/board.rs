//! Price board: externally fed symbol → mark price map
//!
//! Feeds write, everyone else reads. The board is the only piece of shared
//! state in the core; it sits behind an `RwLock` so price updates and equity
//! reads can run concurrently with the portfolio writer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ValidationError;
use crate::types::{Money, Symbol};

/// Shared mark-price map
///
/// Cloning a `PriceBoard` clones the handle, not the map.
#[derive(Debug, Clone, Default)]
pub struct PriceBoard {
    prices: Arc<RwLock<HashMap<Symbol, Money>>>,
}

impl PriceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mark price for a symbol. Non-positive prices are refused.
    pub fn set_price(&self, symbol: Symbol, price: Money) -> Result<(), ValidationError> {
        if !price.is_positive() {
            return Err(ValidationError::NonPositivePrice { symbol, price });
        }
        self.prices
            .write()
            .expect("price board lock poisoned")
            .insert(symbol, price);
        Ok(())
    }

    /// Current mark price for a symbol, if one has been fed
    pub fn price(&self, symbol: &Symbol) -> Option<Money> {
        self.prices
            .read()
            .expect("price board lock poisoned")
            .get(symbol)
            .copied()
    }

    /// Snapshot of all current prices
    pub fn prices(&self) -> HashMap<Symbol, Money> {
        self.prices
            .read()
            .expect("price board lock poisoned")
            .clone()
    }

    /// Number of symbols with a mark price
    pub fn len(&self) -> usize {
        self.prices.read().expect("price board lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
