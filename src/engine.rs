//! Brokerage engine: the single writer for one portfolio
//!
//! Owns the portfolio, managed positions, risk tracker, and recovery machine,
//! and serializes every mutation through `&mut self`. Cash, position, and
//! drawdown invariants are cross-field; funneling all writes through one
//! place is what makes them checkable instead of check-then-act races.
//!
//! The engine is explicitly constructed and dependency-injected: no global
//! state, no import-time setup. Drop it (or call [`Engine::shutdown`]) and
//! nothing lingers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::board::PriceBoard;
use crate::broker::{
    CloseRecord, ExecutionOutcome, ExitReason, Fill, FillSimulator, ManagedPosition, Order,
    Portfolio, Position, RejectReason, Rejection,
};
use crate::config::BrokerConfig;
use crate::error::{EngineError, InvariantViolation, ValidationError};
use crate::recovery::{DrawdownEvent, RecoveryMachine, TradeBlock};
use crate::risk::{size_multiplier, RiskState, RiskTracker};
use crate::types::{Money, Side, Symbol};

/// One exit fired by [`Engine::check_exits`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitEvent {
    pub symbol: Symbol,
    pub reason: ExitReason,
    pub exec_price: Money,
}

/// Running session totals, plain data for downstream collaborators
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub fills: usize,
    pub rejections: usize,
    pub closes: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_fees: Money,
    pub realized_pnl: Money,
    pub final_equity: Money,
}

/// Simulated brokerage for one portfolio
pub struct Engine {
    config: BrokerConfig,
    board: PriceBoard,
    simulator: FillSimulator,
    portfolio: Portfolio,
    managed: HashMap<Symbol, ManagedPosition>,
    risk: RiskTracker,
    recovery: RecoveryMachine,
    /// Monotonic sequence for equity snapshots; single-writer assigned
    seq: u64,
    fills: Vec<Fill>,
    closes: Vec<CloseRecord>,
    rejections: usize,
    total_fees: Money,
}

impl Engine {
    /// Construct an engine around a validated config and a shared price board
    pub fn new(config: BrokerConfig, board: PriceBoard) -> Result<Self, ValidationError> {
        config.validate()?;
        let initial_cash = config.initial_cash;
        info!(initial_cash = %initial_cash, "engine initialized");
        Ok(Engine {
            simulator: FillSimulator::new(config.fees.clone()),
            portfolio: Portfolio::new(initial_cash),
            managed: HashMap::new(),
            risk: RiskTracker::new(initial_cash),
            recovery: RecoveryMachine::new(config.recovery.clone(), initial_cash),
            seq: 0,
            fills: Vec::new(),
            closes: Vec::new(),
            rejections: 0,
            total_fees: Money::ZERO,
            config,
            board,
        })
    }

    /// Submit one order. Exactly one terminal outcome comes back:
    /// a fill (state mutated atomically) or a rejection (nothing mutated).
    ///
    /// Entries pass the recovery gate first; sells only reduce exposure and
    /// stay routable even while entries are blocked, otherwise a halt would
    /// lock in open risk.
    pub fn submit_order(&mut self, order: Order) -> Result<ExecutionOutcome, EngineError> {
        let timestamp = Utc::now();

        if order.side == Side::Buy {
            if let Err(block) = self.recovery.should_trade() {
                return Ok(self.reject(order, RejectReason::Blocked(block), timestamp));
            }
            let extending = self
                .managed
                .get(&order.symbol)
                .map(|m| m.is_open())
                .unwrap_or(false);
            if !extending && self.open_managed_count() >= self.config.max_positions {
                return Ok(self.reject(order, RejectReason::MaxPositions, timestamp));
            }
        }

        let fill = match self.simulator.evaluate(
            &order,
            self.board.price(&order.symbol),
            self.portfolio.cash(),
            self.portfolio.held_qty(&order.symbol),
            timestamp,
        ) {
            Ok(fill) => fill,
            Err(reason) => return Ok(self.reject(order, reason, timestamp)),
        };

        let effect = self.portfolio.apply_fill(&fill)?;
        self.total_fees += fill.fee;
        self.fills.push(fill.clone());

        match fill.side {
            Side::Buy => {
                self.track_entry(&fill);
                self.recovery.record_entry(fill.timestamp);
            }
            Side::Sell => {
                self.track_reduction(&fill, effect.realized_delta)?;
            }
        }

        self.observe_equity()?;
        Ok(ExecutionOutcome::Filled(fill))
    }

    /// Evaluate exit rules for every open managed position against current
    /// marks, routing each fired exit through the fill simulator. At most
    /// one rule fires per position per call.
    pub fn check_exits(&mut self) -> Result<Vec<ExitEvent>, EngineError> {
        let mut events = Vec::new();

        let board = &self.board;
        let due: Vec<(Symbol, ExitReason)> = self
            .managed
            .iter_mut()
            .filter(|(_, m)| m.is_open())
            .filter_map(|(symbol, m)| {
                board
                    .price(symbol)
                    .and_then(|price| m.check_exit(price))
                    .map(|reason| (symbol.clone(), reason))
            })
            .collect();

        for (symbol, reason) in due {
            let record = self.route_exit(&symbol, reason)?;
            events.push(ExitEvent {
                symbol,
                reason,
                exec_price: record.exit_price,
            });
        }

        Ok(events)
    }

    /// Flatten a managed position by operator decision
    pub fn close_manual(&mut self, symbol: &Symbol) -> Result<CloseRecord, EngineError> {
        let open = self
            .managed
            .get(symbol)
            .map(|m| m.is_open())
            .unwrap_or(false);
        if !open {
            return Err(ValidationError::UnknownManagedPosition(symbol.clone()).into());
        }
        self.route_exit(symbol, ExitReason::Manual)
    }

    /// Recompute equity from current marks and feed the sizer and recovery
    /// machine one ordered snapshot. Call after price updates.
    pub fn mark_to_market(&mut self) -> Result<RiskState, EngineError> {
        self.observe_equity()?;
        Ok(self.risk_state())
    }

    /// The multiplier to apply to the next order's base size: the configured
    /// sizing mode's output scaled by the recovery ladder, clamped last.
    pub fn get_position_multiplier(&self) -> f64 {
        let state = self.risk_state();
        let sized = size_multiplier(&state, &self.config.sizer);
        let laddered = sized * self.recovery.phase_multiplier();
        laddered
            .max(self.config.sizer.min_multiplier)
            .min(self.config.sizer.max_multiplier)
    }

    /// The single authoritative entry gate
    pub fn should_trade(&self) -> Result<(), TradeBlock> {
        self.recovery.should_trade()
    }

    /// Current risk snapshot
    pub fn risk_state(&self) -> RiskState {
        self.risk.snapshot(self.recovery.recovery_fraction())
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn board(&self) -> &PriceBoard {
        &self.board
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.portfolio.position(symbol)
    }

    pub fn managed_position(&self, symbol: &Symbol) -> Option<&ManagedPosition> {
        self.managed.get(symbol)
    }

    pub fn active_drawdown(&self) -> Option<&DrawdownEvent> {
        self.recovery.active_event()
    }

    pub fn drawdown_history(&self) -> &[DrawdownEvent] {
        self.recovery.event_history()
    }

    pub fn fills(&self) -> &[Fill] {
        &self.fills
    }

    pub fn close_records(&self) -> &[CloseRecord] {
        &self.closes
    }

    /// Running totals for reporting collaborators
    pub fn session_stats(&self) -> SessionStats {
        let wins = self.closes.iter().filter(|c| c.net_pnl.is_positive()).count();
        SessionStats {
            fills: self.fills.len(),
            rejections: self.rejections,
            closes: self.closes.len(),
            wins,
            losses: self.closes.len() - wins,
            total_fees: self.total_fees,
            realized_pnl: self.portfolio.total_realized_pnl(),
            final_equity: self.portfolio.equity(&self.board.prices()),
        }
    }

    /// Tear down, returning the final session totals
    pub fn shutdown(self) -> SessionStats {
        let stats = self.session_stats();
        info!(
            fills = stats.fills,
            closes = stats.closes,
            final_equity = %stats.final_equity,
            "engine shut down"
        );
        stats
    }

    fn reject(
        &mut self,
        order: Order,
        reason: RejectReason,
        timestamp: chrono::DateTime<Utc>,
    ) -> ExecutionOutcome {
        self.rejections += 1;
        ExecutionOutcome::Rejected(Rejection {
            order,
            reason,
            timestamp,
        })
    }

    fn open_managed_count(&self) -> usize {
        self.managed.values().filter(|m| m.is_open()).count()
    }

    /// Wrap a buy fill in a managed position, or fold it into the open one
    fn track_entry(&mut self, fill: &Fill) {
        match self.managed.get_mut(&fill.symbol) {
            Some(m) if m.is_open() => {
                // Extension: quantity and basis follow the ledger; exit
                // levels stay anchored to the original entry
                m.quantity = self.portfolio.held_qty(&fill.symbol);
                if let Some(position) = self.portfolio.position(&fill.symbol) {
                    if let Some(avg) = position.avg_price {
                        m.entry_price = avg;
                    }
                }
            }
            _ => {
                let exits = &self.config.exits;
                self.managed.insert(
                    fill.symbol.clone(),
                    ManagedPosition::open(
                        fill,
                        exits.default_stop_loss_pct,
                        exits.default_take_profit_pct,
                        exits.default_trailing_stop_pct,
                    ),
                );
            }
        }
    }

    /// Keep the managed wrapper in sync with a sell; a flattening sell
    /// closes it as a manual exit
    fn track_reduction(&mut self, fill: &Fill, realized: Money) -> Result<(), EngineError> {
        let remaining = self.portfolio.held_qty(&fill.symbol);
        if let Some(m) = self.managed.get_mut(&fill.symbol) {
            if m.is_open() {
                if remaining.is_zero() {
                    let record = m.close(ExitReason::Manual, fill, realized)?;
                    self.risk.record_trade(record.net_pnl);
                    self.closes.push(record);
                } else {
                    m.quantity = remaining;
                }
            }
        }
        Ok(())
    }

    /// Route a managed exit through the fill simulator and book the close
    fn route_exit(
        &mut self,
        symbol: &Symbol,
        reason: ExitReason,
    ) -> Result<CloseRecord, EngineError> {
        let quantity = self
            .managed
            .get(symbol)
            .map(|m| m.quantity)
            .unwrap_or(Money::ZERO);
        let order = Order::market(symbol.clone(), Side::Sell, quantity);

        let fill = self
            .simulator
            .evaluate(
                &order,
                self.board.price(symbol),
                self.portfolio.cash(),
                self.portfolio.held_qty(symbol),
                Utc::now(),
            )
            .map_err(|r| InvariantViolation::UnroutableExit {
                symbol: symbol.clone(),
                reason: r.to_string(),
            })?;

        let effect = self.portfolio.apply_fill(&fill)?;
        self.total_fees += fill.fee;
        self.fills.push(fill.clone());

        let m = self
            .managed
            .get_mut(symbol)
            .expect("routed exit always has a managed position");
        let record = m.close(reason, &fill, effect.realized_delta)?;
        self.risk.record_trade(record.net_pnl);
        self.closes.push(record.clone());

        self.observe_equity()?;
        Ok(record)
    }

    /// Assign the next snapshot sequence and feed both observers
    fn observe_equity(&mut self) -> Result<(), EngineError> {
        self.seq += 1;
        let equity = self.portfolio.equity(&self.board.prices());
        let now = Utc::now();
        self.risk.observe_equity(self.seq, equity)?;
        self.recovery.observe_equity(self.seq, equity, now)?;
        Ok(())
    }
}
