//! Drawdown recovery state machine
//!
//! Tracks peak equity, opens a [`DrawdownEvent`] when equity falls far enough
//! from the peak, and gates position size back up through an ordered ladder
//! of recovery phases as equity climbs off the trough. A hard circuit
//! breaker on total portfolio loss overrides the ladder entirely.
//!
//! Phase transitions are one-directional while an event is active: equity
//! hovering at a rung boundary cannot oscillate the ladder, and a deeper
//! trough re-anchors the recovery fraction without demoting the phase.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::RecoveryConfig;
use crate::error::InvariantViolation;
use crate::types::Money;

/// Forward-only lifecycle of a drawdown event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryStatus {
    /// Threshold breached, equity still at or near the trough
    Active,
    /// Climbing the ladder
    Recovering,
    /// Equity regained the pre-drawdown peak; event archived
    Recovered,
}

/// One drawdown episode from threshold breach to full recovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownEvent {
    /// Equity high-water mark when the event opened; frozen for its duration
    pub peak: Money,
    /// Lowest equity seen during the event
    pub trough: Money,
    /// Maximum depth reached, (peak − trough) / peak
    pub drawdown_pct: f64,
    /// Current ladder rung; never decreases while the event is active
    pub phase: usize,
    pub status: RecoveryStatus,
    pub started_at: DateTime<Utc>,
    pub recovered_at: Option<DateTime<Utc>>,
}

impl DrawdownEvent {
    /// Fraction of the drawdown recovered at `equity`, in [0, 1]
    pub fn recovery_fraction(&self, equity: Money) -> f64 {
        let span = self.peak - self.trough;
        if !span.is_positive() {
            return 1.0;
        }
        ((equity - self.trough) / span).to_f64().clamp(0.0, 1.0)
    }
}

/// Why the trade gate is closed
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum TradeBlock {
    #[error("circuit breaker tripped: portfolio loss {loss_pct:.1}% >= {limit_pct:.1}%")]
    CircuitBreaker { loss_pct: f64, limit_pct: f64 },

    #[error("daily loss limit: down {loss_pct:.1}% today, limit {limit_pct:.1}%")]
    DailyLossLimit { loss_pct: f64, limit_pct: f64 },

    #[error("recovery phase {phase} trade budget exhausted ({used}/{max_trades} today)")]
    TradeBudget {
        phase: usize,
        used: u32,
        max_trades: u32,
    },
}

/// Peak tracking, drawdown events, ladder gating, and the circuit breaker.
///
/// All observations arrive through the portfolio's single writer with a
/// strictly advancing sequence number; an out-of-order snapshot is a hard
/// error because the peak/trough bookkeeping is order-sensitive.
#[derive(Debug, Clone)]
pub struct RecoveryMachine {
    config: RecoveryConfig,
    initial_equity: Money,
    last_seq: u64,
    equity: Money,
    peak: Money,
    event: Option<DrawdownEvent>,
    history: Vec<DrawdownEvent>,
    breaker_tripped: bool,
    current_day: Option<NaiveDate>,
    day_open_equity: Money,
    trades_today: u32,
}

impl RecoveryMachine {
    pub fn new(config: RecoveryConfig, initial_equity: Money) -> Self {
        RecoveryMachine {
            config,
            initial_equity,
            last_seq: 0,
            equity: initial_equity,
            peak: initial_equity,
            event: None,
            history: Vec::new(),
            breaker_tripped: false,
            current_day: None,
            day_open_equity: initial_equity,
            trades_today: 0,
        }
    }

    /// Fold in one equity observation from the single writer
    pub fn observe_equity(
        &mut self,
        seq: u64,
        equity: Money,
        timestamp: DateTime<Utc>,
    ) -> Result<(), InvariantViolation> {
        if seq <= self.last_seq {
            return Err(InvariantViolation::EquitySequenceRegressed {
                last: self.last_seq,
                got: seq,
            });
        }
        self.last_seq = seq;
        self.equity = equity;
        self.roll_day(timestamp, equity);

        // Hard circuit breaker: loss measured from initial capital
        if !self.breaker_tripped && self.initial_equity.is_positive() {
            let loss = ((self.initial_equity - equity) / self.initial_equity).to_f64();
            if loss >= self.config.max_portfolio_drawdown_pct {
                warn!(
                    loss_pct = loss * 100.0,
                    "circuit breaker tripped, trading halted"
                );
                self.breaker_tripped = true;
            }
        }

        let mut recovered = false;
        match self.event.as_mut() {
            None => {
                self.peak = self.peak.max(equity);
                let drawdown = self.drawdown_from_peak(equity);
                if drawdown >= self.config.activation_threshold {
                    info!(
                        peak = %self.peak,
                        equity = %equity,
                        drawdown_pct = drawdown * 100.0,
                        "drawdown event activated"
                    );
                    self.event = Some(DrawdownEvent {
                        peak: self.peak,
                        trough: equity,
                        drawdown_pct: drawdown,
                        phase: 0,
                        status: RecoveryStatus::Active,
                        started_at: timestamp,
                        recovered_at: None,
                    });
                }
            }
            Some(event) => {
                if equity >= event.peak {
                    event.status = RecoveryStatus::Recovered;
                    event.recovered_at = Some(timestamp);
                    info!(peak = %event.peak, "drawdown event recovered");
                    recovered = true;
                } else {
                    if equity < event.trough {
                        event.trough = equity;
                        event.drawdown_pct = ((event.peak - equity) / event.peak).to_f64();
                    }
                    let fraction = event.recovery_fraction(equity);
                    let derived = derive_phase(&self.config, fraction);
                    if derived > event.phase {
                        info!(
                            from = event.phase,
                            to = derived,
                            fraction = fraction * 100.0,
                            "recovery phase advanced"
                        );
                        event.phase = derived;
                    }
                    if fraction > 0.0 && event.status == RecoveryStatus::Active {
                        event.status = RecoveryStatus::Recovering;
                    }
                }
            }
        }

        if recovered {
            // Archive and resume peak tracking
            self.history.push(self.event.take().expect("event present"));
            self.peak = self.peak.max(equity);
        }

        Ok(())
    }

    /// Count a new entry against the day's trade budget
    pub fn record_entry(&mut self, timestamp: DateTime<Utc>) {
        let equity = self.equity;
        self.roll_day(timestamp, equity);
        self.trades_today += 1;
    }

    /// The single authoritative gate. Checked in order: circuit breaker,
    /// daily loss limit, then the active rung's trade budget.
    pub fn should_trade(&self) -> Result<(), TradeBlock> {
        if self.breaker_tripped {
            let loss = ((self.initial_equity - self.equity) / self.initial_equity).to_f64();
            return Err(TradeBlock::CircuitBreaker {
                loss_pct: loss * 100.0,
                limit_pct: self.config.max_portfolio_drawdown_pct * 100.0,
            });
        }

        if self.day_open_equity.is_positive() {
            let day_loss = ((self.day_open_equity - self.equity) / self.day_open_equity).to_f64();
            if day_loss >= self.config.max_daily_loss_pct {
                return Err(TradeBlock::DailyLossLimit {
                    loss_pct: day_loss * 100.0,
                    limit_pct: self.config.max_daily_loss_pct * 100.0,
                });
            }
        }

        if let Some(event) = &self.event {
            let rung = &self.config.ladder[event.phase.min(self.config.ladder.len() - 1)];
            if self.trades_today >= rung.max_trades {
                return Err(TradeBlock::TradeBudget {
                    phase: event.phase + 1,
                    used: self.trades_today,
                    max_trades: rung.max_trades,
                });
            }
        }

        Ok(())
    }

    /// Size multiplier allowed by the ladder; 1.0 outside an active event
    pub fn phase_multiplier(&self) -> f64 {
        match &self.event {
            Some(event) => {
                self.config.ladder[event.phase.min(self.config.ladder.len() - 1)].size_mult
            }
            None => 1.0,
        }
    }

    /// Recovery progress of the active event, 0.0 when none is active
    pub fn recovery_fraction(&self) -> f64 {
        self.event
            .as_ref()
            .map(|e| e.recovery_fraction(self.equity))
            .unwrap_or(0.0)
    }

    pub fn active_event(&self) -> Option<&DrawdownEvent> {
        self.event.as_ref()
    }

    /// Archived events, oldest first
    pub fn event_history(&self) -> &[DrawdownEvent] {
        &self.history
    }

    pub fn is_halted(&self) -> bool {
        self.breaker_tripped
    }

    /// Re-arm a tripped circuit breaker. Deliberate operator action; the
    /// machine never un-trips itself.
    pub fn reset_circuit_breaker(&mut self) {
        self.breaker_tripped = false;
    }

    fn drawdown_from_peak(&self, equity: Money) -> f64 {
        if !self.peak.is_positive() {
            return 0.0;
        }
        ((self.peak - equity) / self.peak).to_f64().max(0.0)
    }

    fn roll_day(&mut self, timestamp: DateTime<Utc>, equity: Money) {
        let day = timestamp.date_naive();
        if self.current_day != Some(day) {
            self.current_day = Some(day);
            self.day_open_equity = equity;
            self.trades_today = 0;
        }
    }
}

/// Highest rung whose start fraction has been crossed
fn derive_phase(config: &RecoveryConfig, fraction: f64) -> usize {
    let mut phase = 0;
    for (index, rung) in config.ladder.iter().enumerate() {
        if fraction >= rung.start_frac {
            phase = index;
        }
    }
    phase
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn machine() -> RecoveryMachine {
        RecoveryMachine::new(RecoveryConfig::default(), Money::from_i64(100_000))
    }

    fn ts(offset_hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::hours(offset_hours)
    }

    #[test]
    fn test_no_event_below_threshold() {
        let mut m = machine();
        m.observe_equity(1, Money::from_i64(96_000), ts(0)).unwrap();
        assert!(m.active_event().is_none());
        assert_eq!(m.phase_multiplier(), 1.0);
    }

    #[test]
    fn test_event_activates_at_threshold() {
        let mut m = machine();
        m.observe_equity(1, Money::from_i64(95_000), ts(0)).unwrap();

        let event = m.active_event().unwrap();
        assert_eq!(event.status, RecoveryStatus::Active);
        assert_eq!(event.phase, 0);
        assert_eq!(event.peak, Money::from_i64(100_000));
        assert_eq!(m.phase_multiplier(), 0.3);
    }

    #[test]
    fn test_scenario_b_ladder_walk() {
        let mut m = machine();

        // Peak 100k, drop to 85k: 15% drawdown, phase 1 of the ladder
        m.observe_equity(1, Money::from_i64(85_000), ts(0)).unwrap();
        let event = m.active_event().unwrap();
        assert_eq!(event.status, RecoveryStatus::Active);
        assert!((event.drawdown_pct - 0.15).abs() < 1e-12);
        assert_eq!(m.phase_multiplier(), 0.3);

        // Recover half the loss: phase 2
        m.observe_equity(2, Money::from_i64(92_500), ts(1)).unwrap();
        let event = m.active_event().unwrap();
        assert_eq!(event.status, RecoveryStatus::Recovering);
        assert_eq!(event.phase, 1);
        assert_eq!(m.phase_multiplier(), 0.5);

        // Full recovery: archived, multiplier restored
        m.observe_equity(3, Money::from_i64(100_000), ts(2)).unwrap();
        assert!(m.active_event().is_none());
        assert_eq!(m.phase_multiplier(), 1.0);
        assert_eq!(m.event_history().len(), 1);
        assert_eq!(m.event_history()[0].status, RecoveryStatus::Recovered);
        assert!(m.event_history()[0].recovered_at.is_some());
    }

    #[test]
    fn test_phase_never_demotes() {
        let mut m = machine();
        m.observe_equity(1, Money::from_i64(85_000), ts(0)).unwrap();
        m.observe_equity(2, Money::from_i64(92_500), ts(1)).unwrap();
        assert_eq!(m.active_event().unwrap().phase, 1);

        // Hover back below the rung boundary: phase holds
        m.observe_equity(3, Money::from_i64(92_000), ts(2)).unwrap();
        assert_eq!(m.active_event().unwrap().phase, 1);
        assert_eq!(m.phase_multiplier(), 0.5);
    }

    #[test]
    fn test_deeper_trough_reanchors_without_demotion() {
        let mut m = machine();
        m.observe_equity(1, Money::from_i64(90_000), ts(0)).unwrap();
        m.observe_equity(2, Money::from_i64(95_000), ts(1)).unwrap();
        let phase_before = m.active_event().unwrap().phase;
        assert!(phase_before >= 1);

        // New low: trough moves, depth grows, phase does not fall
        m.observe_equity(3, Money::from_i64(88_000), ts(2)).unwrap();
        let event = m.active_event().unwrap();
        assert_eq!(event.trough, Money::from_i64(88_000));
        assert!((event.drawdown_pct - 0.12).abs() < 1e-12);
        assert_eq!(event.phase, phase_before);
    }

    #[test]
    fn test_ladder_monotone_on_recovery_trajectory() {
        let mut m = machine();
        m.observe_equity(1, Money::from_i64(85_000), ts(0)).unwrap();

        let mut last = 0.0;
        let mut seq = 1;
        for equity in (85_000..=100_000).step_by(500) {
            seq += 1;
            m.observe_equity(seq, Money::from_i64(equity), ts(seq as i64))
                .unwrap();
            let mult = m.phase_multiplier();
            assert!(
                mult >= last,
                "multiplier fell from {last} to {mult} at equity {equity}"
            );
            last = mult;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn test_circuit_breaker_trips_and_latches() {
        let mut m = machine();
        m.observe_equity(1, Money::from_i64(79_000), ts(0)).unwrap();

        assert!(m.is_halted());
        assert!(matches!(
            m.should_trade(),
            Err(TradeBlock::CircuitBreaker { .. })
        ));

        // Recovery does not un-trip the breaker
        m.observe_equity(2, Money::from_i64(99_000), ts(1)).unwrap();
        assert!(m.is_halted());

        m.reset_circuit_breaker();
        assert!(m.should_trade().is_ok());
    }

    #[test]
    fn test_daily_loss_blocks_entries() {
        let mut m = machine();
        m.observe_equity(1, Money::from_i64(100_000), ts(0)).unwrap();
        // Down 6% within the same day (limit 5%)
        m.observe_equity(2, Money::from_i64(94_000), ts(1)).unwrap();

        assert!(matches!(
            m.should_trade(),
            Err(TradeBlock::DailyLossLimit { .. })
        ));

        // Next day resets the anchor
        m.observe_equity(3, Money::from_i64(94_000), ts(25)).unwrap();
        assert!(m.should_trade().is_ok());
    }

    #[test]
    fn test_trade_budget_per_phase() {
        let mut m = machine();
        m.observe_equity(1, Money::from_i64(94_000), ts(0)).unwrap();
        assert_eq!(m.active_event().unwrap().phase, 0);

        // Phase 1 allows 2 trades per day
        assert!(m.should_trade().is_ok());
        m.record_entry(ts(0));
        assert!(m.should_trade().is_ok());
        m.record_entry(ts(0));
        assert!(matches!(
            m.should_trade(),
            Err(TradeBlock::TradeBudget { max_trades: 2, .. })
        ));

        // Budget resets on day rollover
        m.observe_equity(2, Money::from_i64(94_100), ts(25)).unwrap();
        assert!(m.should_trade().is_ok());
    }

    #[test]
    fn test_budget_not_enforced_without_event() {
        let mut m = machine();
        m.observe_equity(1, Money::from_i64(99_000), ts(0)).unwrap();
        for _ in 0..50 {
            m.record_entry(ts(0));
        }
        assert!(m.should_trade().is_ok());
    }

    #[test]
    fn test_rejects_stale_sequence() {
        let mut m = machine();
        m.observe_equity(3, Money::from_i64(99_000), ts(0)).unwrap();
        let err = m.observe_equity(2, Money::from_i64(98_000), ts(1));
        assert!(matches!(
            err,
            Err(InvariantViolation::EquitySequenceRegressed { last: 3, got: 2 })
        ));
    }

    #[test]
    fn test_status_forward_only() {
        let mut m = machine();
        m.observe_equity(1, Money::from_i64(85_000), ts(0)).unwrap();
        m.observe_equity(2, Money::from_i64(90_000), ts(1)).unwrap();
        assert_eq!(
            m.active_event().unwrap().status,
            RecoveryStatus::Recovering
        );

        // Sliding back toward the trough does not revert to Active
        m.observe_equity(3, Money::from_i64(85_500), ts(2)).unwrap();
        assert_eq!(
            m.active_event().unwrap().status,
            RecoveryStatus::Recovering
        );
    }
}
