//! Configuration management
//!
//! Serde-backed configuration for the brokerage core, loadable from JSON.
//! Every recognized option is validated up front; a bad config aborts before
//! any engine state exists.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ValidationError;
use crate::types::Money;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Starting cash, denominated in the same currency as mark prices
    pub initial_cash: Money,
    /// Maximum number of concurrently open managed positions
    pub max_positions: usize,
    pub fees: FeeConfig,
    pub exits: ExitConfig,
    pub sizer: SizerConfig,
    pub recovery: RecoveryConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            initial_cash: Money::from_i64(100_000),
            max_positions: 5,
            fees: FeeConfig::default(),
            exits: ExitConfig::default(),
            sizer: SizerConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let config: BrokerConfig =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Validate all fields; returns the first violation found
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.initial_cash.is_positive() {
            return Err(ValidationError::NonPositiveCash(self.initial_cash));
        }
        self.exits.validate()?;
        self.sizer.validate()?;
        self.recovery.validate()?;
        Ok(())
    }
}

/// Transaction cost model applied by the fill simulator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Commission rate in basis points of notional
    pub commission_bps: u32,
    /// Adverse slippage in basis points of the mark price
    pub slippage_bps: u32,
    /// Minimum fee per fill; commission never goes below this
    #[serde(default)]
    pub min_fee: Money,
}

impl Default for FeeConfig {
    fn default() -> Self {
        FeeConfig {
            commission_bps: 10, // 0.10%
            slippage_bps: 50,   // 0.50%
            min_fee: Money::ZERO,
        }
    }
}

/// Default exit levels for managed positions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitConfig {
    /// Stop-loss distance as a fraction of entry price, in (0, 1)
    pub default_stop_loss_pct: f64,
    /// Take-profit distance as a fraction of entry price, in (0, 1)
    pub default_take_profit_pct: f64,
    /// Trailing-stop giveback from the highest price, in (0, 1)
    pub default_trailing_stop_pct: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        ExitConfig {
            default_stop_loss_pct: 0.05,
            default_take_profit_pct: 0.10,
            default_trailing_stop_pct: 0.04,
        }
    }
}

impl ExitConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [
            ("default_stop_loss_pct", self.default_stop_loss_pct),
            ("default_take_profit_pct", self.default_take_profit_pct),
            ("default_trailing_stop_pct", self.default_trailing_stop_pct),
        ] {
            if !(0.0..1.0).contains(&value) || value == 0.0 {
                return Err(ValidationError::PctOutOfRange { name, value });
            }
        }
        Ok(())
    }
}

/// How the engine turns risk state into a position-size multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    /// Product of volatility/streak/drawdown/recovery factors
    RiskAdjusted,
    /// Fractional Kelly from observed win rate and payoff ratio
    Kelly,
}

/// Tuning for the risk-adjusted sizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizerConfig {
    pub sizing_mode: SizingMode,
    /// Scales how hard volatility suppresses size
    pub volatility_scale: f64,
    /// Scales how hard drawdown severity suppresses size
    pub drawdown_scale: f64,
    /// Cap on the additive win-streak boost (0.25 = at most +25%)
    pub win_streak_boost: f64,
    /// Floor multiplier under a cold streak
    pub loss_streak_reduction: f64,
    /// Wins needed before the streak boost starts
    pub hot_streak_min: u32,
    /// Losses needed before the streak reduction starts
    pub cold_streak_min: u32,
    /// Recovery fraction that must be exceeded before the recovery boost applies
    pub recovery_boost_threshold: f64,
    /// Fraction of full Kelly applied in `SizingMode::Kelly`
    pub kelly_multiplier: f64,
    /// Final multiplier clamp, lower bound
    pub min_multiplier: f64,
    /// Final multiplier clamp, upper bound
    pub max_multiplier: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        SizerConfig {
            sizing_mode: SizingMode::RiskAdjusted,
            volatility_scale: 1.0,
            drawdown_scale: 1.0,
            win_streak_boost: 0.25,
            loss_streak_reduction: 0.5,
            hot_streak_min: 3,
            cold_streak_min: 2,
            recovery_boost_threshold: 0.5,
            kelly_multiplier: 0.5,
            min_multiplier: 0.1,
            max_multiplier: 1.5,
        }
    }
}

impl SizerConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [
            ("volatility_scale", self.volatility_scale),
            ("drawdown_scale", self.drawdown_scale),
            ("kelly_multiplier", self.kelly_multiplier),
            ("min_multiplier", self.min_multiplier),
            ("max_multiplier", self.max_multiplier),
        ] {
            if value <= 0.0 {
                return Err(ValidationError::NonPositiveParam { name, value });
            }
        }
        for (name, value) in [
            ("win_streak_boost", self.win_streak_boost),
            ("loss_streak_reduction", self.loss_streak_reduction),
            ("recovery_boost_threshold", self.recovery_boost_threshold),
        ] {
            if !(0.0..1.0).contains(&value) || value == 0.0 {
                return Err(ValidationError::PctOutOfRange { name, value });
            }
        }
        if self.min_multiplier > self.max_multiplier {
            return Err(ValidationError::NonPositiveParam {
                name: "max_multiplier (must be >= min_multiplier)",
                value: self.max_multiplier,
            });
        }
        Ok(())
    }
}

/// One rung of the recovery ladder
///
/// A rung applies while `start_frac <= recovery_fraction < target_frac`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRung {
    pub start_frac: f64,
    pub target_frac: f64,
    /// Position-size multiplier allowed at this rung
    pub size_mult: f64,
    /// Trades allowed per UTC day at this rung
    pub max_trades: u32,
}

/// Drawdown detection, recovery ladder, and circuit-breaker limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Drawdown from peak that activates a recovery event
    pub activation_threshold: f64,
    /// Portfolio loss from initial cash that trips the hard circuit breaker
    pub max_portfolio_drawdown_pct: f64,
    /// Intraday loss from the day's opening equity that blocks new entries
    pub max_daily_loss_pct: f64,
    /// Ordered rungs; size_mult must be non-decreasing
    pub ladder: Vec<RecoveryRung>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            activation_threshold: 0.05,
            max_portfolio_drawdown_pct: 0.20,
            max_daily_loss_pct: 0.05,
            ladder: vec![
                RecoveryRung {
                    start_frac: 0.0,
                    target_frac: 0.5,
                    size_mult: 0.3,
                    max_trades: 2,
                },
                RecoveryRung {
                    start_frac: 0.5,
                    target_frac: 0.8,
                    size_mult: 0.5,
                    max_trades: 5,
                },
                RecoveryRung {
                    start_frac: 0.8,
                    target_frac: 1.0,
                    size_mult: 0.8,
                    max_trades: 10,
                },
            ],
        }
    }
}

impl RecoveryConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        for (name, value) in [
            ("activation_threshold", self.activation_threshold),
            ("max_portfolio_drawdown_pct", self.max_portfolio_drawdown_pct),
            ("max_daily_loss_pct", self.max_daily_loss_pct),
        ] {
            if !(0.0..1.0).contains(&value) || value == 0.0 {
                return Err(ValidationError::PctOutOfRange { name, value });
            }
        }
        if self.ladder.is_empty() {
            return Err(ValidationError::EmptyLadder);
        }
        for (index, rung) in self.ladder.iter().enumerate() {
            if rung.start_frac >= rung.target_frac {
                return Err(ValidationError::LadderRungInverted {
                    index,
                    start: rung.start_frac,
                    target: rung.target_frac,
                });
            }
            if index > 0 {
                let prev = &self.ladder[index - 1];
                if rung.start_frac < prev.target_frac || rung.size_mult < prev.size_mult {
                    return Err(ValidationError::LadderNotOrdered { index });
                }
            }
        }
        Ok(())
    }
}
