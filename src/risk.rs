//! Risk state tracking and position-size multipliers
//!
//! [`RiskTracker`] folds equity observations and trade outcomes into a
//! [`RiskState`] snapshot; [`risk_multiplier`] and [`kelly_multiplier`] turn
//! a snapshot into a size multiplier. The multiplier functions are pure and
//! deterministic given a snapshot, which is what makes sizing testable.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

use crate::config::{SizerConfig, SizingMode};
use crate::error::InvariantViolation;
use crate::types::Money;

/// Equity observations kept for volatility estimation
const EQUITY_WINDOW: usize = 20;

/// Point-in-time risk snapshot. Plain data; safe to hand to collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    /// Sequence number of the newest equity observation folded in
    pub seq: u64,
    pub equity: Money,
    /// Highest equity ever observed; monotonically non-decreasing
    pub peak_equity: Money,
    /// (peak − equity) / peak, in [0, 1]
    pub drawdown_pct: f64,
    /// Sample standard deviation of recent equity returns
    pub volatility: f64,
    pub consecutive_wins: u32,
    pub consecutive_losses: u32,
    /// Fraction of the active drawdown recovered, 0 when no event is active
    pub recovery_fraction: f64,
    /// Lifetime win rate in [0, 1]; 0 before any closed trade
    pub win_rate: f64,
    /// avg win / avg loss; 0 until both sides have samples
    pub payoff_ratio: f64,
}

/// Folds equity updates and trade outcomes into risk state.
///
/// Updates must arrive through the portfolio's single writer; the sequence
/// number makes any reordering a hard error instead of a silent corruption.
#[derive(Debug, Clone)]
pub struct RiskTracker {
    last_seq: u64,
    equity: Money,
    peak_equity: Money,
    window: VecDeque<f64>,
    consecutive_wins: u32,
    consecutive_losses: u32,
    wins: u32,
    losses: u32,
    total_win: Money,
    total_loss: Money,
}

impl RiskTracker {
    pub fn new(initial_equity: Money) -> Self {
        let mut window = VecDeque::with_capacity(EQUITY_WINDOW + 1);
        window.push_back(initial_equity.to_f64());
        RiskTracker {
            last_seq: 0,
            equity: initial_equity,
            peak_equity: initial_equity,
            window,
            consecutive_wins: 0,
            consecutive_losses: 0,
            wins: 0,
            losses: 0,
            total_win: Money::ZERO,
            total_loss: Money::ZERO,
        }
    }

    /// Fold in one equity observation. `seq` must advance strictly.
    pub fn observe_equity(&mut self, seq: u64, equity: Money) -> Result<(), InvariantViolation> {
        if seq <= self.last_seq {
            return Err(InvariantViolation::EquitySequenceRegressed {
                last: self.last_seq,
                got: seq,
            });
        }
        self.last_seq = seq;
        self.equity = equity;
        self.peak_equity = self.peak_equity.max(equity);

        self.window.push_back(equity.to_f64());
        while self.window.len() > EQUITY_WINDOW {
            self.window.pop_front();
        }
        Ok(())
    }

    /// Record a closed trade's net outcome
    pub fn record_trade(&mut self, net_pnl: Money) {
        if net_pnl.is_positive() {
            self.consecutive_wins += 1;
            self.consecutive_losses = 0;
            self.wins += 1;
            self.total_win += net_pnl;
        } else {
            self.consecutive_losses += 1;
            self.consecutive_wins = 0;
            self.losses += 1;
            self.total_loss += net_pnl.abs();
        }
    }

    pub fn peak_equity(&self) -> Money {
        self.peak_equity
    }

    pub fn equity(&self) -> Money {
        self.equity
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    fn drawdown_pct(&self) -> f64 {
        if !self.peak_equity.is_positive() {
            return 0.0;
        }
        ((self.peak_equity - self.equity) / self.peak_equity)
            .to_f64()
            .max(0.0)
    }

    fn volatility(&self) -> f64 {
        if self.window.len() < 3 {
            return 0.0;
        }
        let returns: Vec<f64> = self
            .window
            .iter()
            .zip(self.window.iter().skip(1))
            .filter(|(prev, _)| **prev != 0.0)
            .map(|(prev, next)| (next - prev) / prev)
            .collect();
        if returns.len() < 2 {
            return 0.0;
        }
        returns.std_dev()
    }

    /// Snapshot for the sizer. `recovery_fraction` comes from the drawdown
    /// recovery machine (0 when no event is active).
    pub fn snapshot(&self, recovery_fraction: f64) -> RiskState {
        let win_rate = if self.wins + self.losses > 0 {
            self.wins as f64 / (self.wins + self.losses) as f64
        } else {
            0.0
        };
        let payoff_ratio = if self.wins > 0 && self.losses > 0 {
            let avg_win = (self.total_win / Money::from_i64(self.wins as i64)).to_f64();
            let avg_loss = (self.total_loss / Money::from_i64(self.losses as i64)).to_f64();
            if avg_loss > 0.0 {
                avg_win / avg_loss
            } else {
                0.0
            }
        } else {
            0.0
        };

        RiskState {
            seq: self.last_seq,
            equity: self.equity,
            peak_equity: self.peak_equity,
            drawdown_pct: self.drawdown_pct(),
            volatility: self.volatility(),
            consecutive_wins: self.consecutive_wins,
            consecutive_losses: self.consecutive_losses,
            recovery_fraction,
            win_rate,
            payoff_ratio,
        }
    }
}

fn clamp(value: f64, lo: f64, hi: f64) -> f64 {
    value.max(lo).min(hi)
}

/// Risk-adjusted size multiplier: the product of four independently-clamped
/// factors, clamped to the configured bounds last.
pub fn risk_multiplier(state: &RiskState, config: &SizerConfig) -> f64 {
    let product = volatility_mult(state, config)
        * streak_mult(state, config)
        * drawdown_mult(state, config)
        * recovery_mult(state, config);
    clamp(product, config.min_multiplier, config.max_multiplier)
}

/// Size multiplier under the configured [`SizingMode`]. The two modes are
/// mutually exclusive; their outputs share one clamp and are never stacked.
pub fn size_multiplier(state: &RiskState, config: &SizerConfig) -> f64 {
    match config.sizing_mode {
        SizingMode::RiskAdjusted => risk_multiplier(state, config),
        SizingMode::Kelly => kelly_multiplier(state, config),
    }
}

/// Volatility suppression: 2% return volatility is the neutral point
fn volatility_mult(state: &RiskState, config: &SizerConfig) -> f64 {
    let scaled = (state.volatility / 0.02) * config.volatility_scale;
    clamp(1.0 / (1.0 + scaled), 0.4, 1.5)
}

/// +5% per win past the hot-streak minimum, −15% per loss past the
/// cold-streak minimum, bounded by the configured boost/reduction
fn streak_mult(state: &RiskState, config: &SizerConfig) -> f64 {
    let mult = if state.consecutive_wins > config.hot_streak_min {
        let extra = (state.consecutive_wins - config.hot_streak_min) as f64;
        1.0 + (0.05 * extra).min(config.win_streak_boost)
    } else if state.consecutive_losses > config.cold_streak_min {
        let extra = (state.consecutive_losses - config.cold_streak_min) as f64;
        (1.0 - 0.15 * extra).max(config.loss_streak_reduction)
    } else {
        1.0
    };
    clamp(mult, 0.5, 1.5)
}

/// Quadratic drawdown suppression; 15% drawdown saturates severity
fn drawdown_mult(state: &RiskState, config: &SizerConfig) -> f64 {
    let severity = (state.drawdown_pct.abs() / 0.15).min(1.0);
    clamp(1.0 - severity * severity * config.drawdown_scale, 0.2, 1.0)
}

/// Recovery boost: only while still in a >5% drawdown, and only once the
/// recovered fraction clears the configured threshold. Scales up to +30%.
fn recovery_mult(state: &RiskState, config: &SizerConfig) -> f64 {
    if state.drawdown_pct <= 0.05 {
        return 1.0;
    }
    let threshold = config.recovery_boost_threshold;
    if state.recovery_fraction < threshold || threshold >= 1.0 {
        return 1.0;
    }
    let progress = (state.recovery_fraction - threshold) / (1.0 - threshold);
    1.0 + 0.30 * clamp(progress, 0.0, 1.0)
}

/// Fractional-Kelly multiplier from lifetime win rate and payoff ratio.
///
/// Full Kelly `w − (1−w)/r` is tempered by `kelly_multiplier` and clamped to
/// the same bounds as the risk-adjusted path. Before both a win and a loss
/// have been observed the edge is unknowable and the multiplier stays at the
/// configured minimum.
pub fn kelly_multiplier(state: &RiskState, config: &SizerConfig) -> f64 {
    if state.payoff_ratio <= 0.0 {
        return config.min_multiplier;
    }
    let full_kelly = state.win_rate - (1.0 - state.win_rate) / state.payoff_ratio;
    clamp(
        full_kelly.max(0.0) * config.kelly_multiplier,
        config.min_multiplier,
        config.max_multiplier,
    )
}
