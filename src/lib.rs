//! Paper Broker
//!
//! A simulated brokerage core: orders fill against externally supplied mark
//! prices under a configurable transaction-cost model, a multi-symbol
//! cash/position ledger stays exact under arbitrary fill sequences, and the
//! resulting equity stream drives risk-adjusted position sizing and an
//! automatic drawdown-pause/recovery cycle.

pub mod board;
pub mod broker;
pub mod config;
pub mod engine;
pub mod error;
pub mod recovery;
pub mod risk;
pub mod strategy;
pub mod types;

pub use board::PriceBoard;
pub use config::BrokerConfig;
pub use engine::{Engine, ExitEvent, SessionStats};
pub use error::{EngineError, InvariantViolation, ValidationError};
pub use types::{Money, Side, Symbol};
