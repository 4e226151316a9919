//! Error taxonomy for the brokerage core
//!
//! Three classes with different propagation rules:
//! - [`ValidationError`]: bad config or input, aborts with no partial mutation
//! - [`crate::broker::Rejection`]: expected business outcome, always a returned
//!   value, never an `Err`
//! - [`InvariantViolation`]: should be unreachable; surfaced as a hard error
//!   instead of silently clamping state

use crate::types::{Money, Symbol};
use thiserror::Error;

/// Invalid configuration or caller input. State is left untouched.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("price for {symbol} must be positive, got {price}")]
    NonPositivePrice { symbol: Symbol, price: Money },

    #[error("initial cash must be positive, got {0}")]
    NonPositiveCash(Money),

    #[error("{name} must be within (0, 1), got {value}")]
    PctOutOfRange { name: &'static str, value: f64 },

    #[error("{name} must be positive, got {value}")]
    NonPositiveParam { name: &'static str, value: f64 },

    #[error("recovery ladder must not be empty")]
    EmptyLadder,

    #[error("recovery ladder rung {index}: start_frac {start} must be < target_frac {target}")]
    LadderRungInverted {
        index: usize,
        start: f64,
        target: f64,
    },

    #[error("recovery ladder must be ordered and non-decreasing in size_mult (rung {index})")]
    LadderNotOrdered { index: usize },

    #[error("no open managed position for {0}")]
    UnknownManagedPosition(Symbol),
}

/// Arithmetic or ordering that should be unreachable by construction.
///
/// Any mutation that would drive cash or quantity negative outside an explicit
/// rule refuses and surfaces one of these instead of clamping.
#[derive(Debug, Error)]
pub enum InvariantViolation {
    #[error("cash would go negative: {cash} after debit of {debit}")]
    NegativeCash { cash: Money, debit: Money },

    #[error("position {symbol} would go negative: qty {qty}, reduction {reduction}")]
    NegativeQuantity {
        symbol: Symbol,
        qty: Money,
        reduction: Money,
    },

    #[error("equity snapshot out of order: seq {got} after {last}")]
    EquitySequenceRegressed { last: u64, got: u64 },

    #[error("managed position {0} already closed")]
    AlreadyClosed(Symbol),

    #[error("exit order for {symbol} unroutable: {reason}")]
    UnroutableExit { symbol: Symbol, reason: String },
}

/// Umbrella error for engine operations.
///
/// Rejections are not errors: `submit_order` returns them inside `Ok`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::NonPositivePrice {
            symbol: Symbol::new("AAPL"),
            price: Money::from_i64(-5),
        };
        assert_eq!(err.to_string(), "price for AAPL must be positive, got -5");
    }

    #[test]
    fn test_invariant_display() {
        let err = InvariantViolation::EquitySequenceRegressed { last: 9, got: 3 };
        assert_eq!(err.to_string(), "equity snapshot out of order: seq 3 after 9");
    }

    #[test]
    fn test_engine_error_from() {
        let err: EngineError = ValidationError::EmptyLadder.into();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
