//! Strategy seam
//!
//! The core does not generate signals; it exposes the capability boundary a
//! signal source must satisfy. Orchestrators hold a `Box<dyn Strategy>` and
//! size whatever comes back with the engine's position multiplier.

use std::collections::HashMap;

use crate::types::{Money, Symbol};

/// Desired exposure for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Enter or hold a long position
    Long,
    /// Be flat
    Flat,
}

/// A signal source over current mark prices
pub trait Strategy: Send + Sync {
    /// Generate the desired exposure for `symbol` given current marks
    fn generate_signal(&self, symbol: &Symbol, prices: &HashMap<Symbol, Money>) -> Signal;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Long whenever the symbol trades below a fixed level
    struct BuyTheDip {
        level: Money,
    }

    impl Strategy for BuyTheDip {
        fn generate_signal(&self, symbol: &Symbol, prices: &HashMap<Symbol, Money>) -> Signal {
            match prices.get(symbol) {
                Some(&price) if price < self.level => Signal::Long,
                _ => Signal::Flat,
            }
        }
    }

    #[test]
    fn test_trait_object_dispatch() {
        let strategy: Box<dyn Strategy> = Box::new(BuyTheDip {
            level: Money::from_i64(100),
        });

        let symbol = Symbol::new("AAPL");
        let mut prices = HashMap::new();

        assert_eq!(strategy.generate_signal(&symbol, &prices), Signal::Flat);

        prices.insert(symbol.clone(), Money::from_i64(95));
        assert_eq!(strategy.generate_signal(&symbol, &prices), Signal::Long);

        prices.insert(symbol.clone(), Money::from_i64(105));
        assert_eq!(strategy.generate_signal(&symbol, &prices), Signal::Flat);
    }
}
