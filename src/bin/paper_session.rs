//! Scripted demo session
//!
//! Feeds a synthetic price path through the engine and logs fills, exits,
//! and recovery transitions. Exercises the public API end to end; the real
//! consumers are backtest and live orchestrators outside this crate.

use anyhow::Result;
use clap::Parser;
use std::collections::HashMap;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use paper_broker::broker::Order;
use paper_broker::strategy::{Signal, Strategy};
use paper_broker::{BrokerConfig, Engine, Money, PriceBoard, Side, Symbol};

#[derive(Parser, Debug)]
#[command(name = "paper-session")]
#[command(about = "Run a scripted session against the simulated brokerage", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a JSON configuration file (defaults used when omitted)
    #[arg(short, long)]
    config: Option<String>,

    /// Symbol to trade
    #[arg(short, long, default_value = "DEMO")]
    symbol: String,

    /// Number of price ticks to replay
    #[arg(short = 'n', long, default_value = "250")]
    ticks: usize,

    /// Starting mark price
    #[arg(long, default_value = "100.0")]
    start_price: f64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Long below the slow anchor, flat above it
struct MeanReversion {
    anchor: Money,
}

impl Strategy for MeanReversion {
    fn generate_signal(&self, symbol: &Symbol, prices: &HashMap<Symbol, Money>) -> Signal {
        match prices.get(symbol) {
            Some(&price) if price < self.anchor => Signal::Long,
            _ => Signal::Flat,
        }
    }
}

/// Deterministic price path: a slow sine swell with a faster chop on top
fn tick_price(start: f64, step: usize) -> f64 {
    let t = step as f64;
    let swell = (t / 40.0).sin() * 0.08;
    let chop = (t / 7.0).sin() * 0.02;
    start * (1.0 + swell + chop)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok();

    let config = match &cli.config {
        Some(path) => BrokerConfig::from_file(path)?,
        None => BrokerConfig::default(),
    };

    let symbol = Symbol::new(&cli.symbol);
    let board = PriceBoard::new();
    let mut engine = Engine::new(config, board.clone())?;
    let strategy = MeanReversion {
        anchor: Money::from_f64(cli.start_price),
    };

    info!(symbol = %symbol, ticks = cli.ticks, "session start");

    for step in 0..cli.ticks {
        let price = Money::from_f64(tick_price(cli.start_price, step));
        board.set_price(symbol.clone(), price)?;
        engine.mark_to_market()?;

        for exit in engine.check_exits()? {
            info!(
                symbol = %exit.symbol,
                reason = %exit.reason,
                price = %exit.exec_price,
                "exit"
            );
        }

        let flat = engine
            .position(&symbol)
            .map(|p| p.is_flat())
            .unwrap_or(true);
        if flat && strategy.generate_signal(&symbol, &board.prices()) == Signal::Long {
            match engine.should_trade() {
                Ok(()) => {
                    let multiplier = engine.get_position_multiplier();
                    let cash = engine.portfolio().cash();
                    // Base size: a tenth of cash, scaled by the risk multiplier
                    let base = cash * Money::from_f64(0.10) / price;
                    let qty = (base * Money::from_f64(multiplier)).round_dp(4);
                    if qty.is_positive() {
                        let outcome =
                            engine.submit_order(Order::market(symbol.clone(), Side::Buy, qty))?;
                        if let Some(fill) = outcome.fill() {
                            info!(
                                qty = %fill.quantity,
                                price = %fill.exec_price,
                                multiplier,
                                "entry"
                            );
                        }
                    }
                }
                Err(block) => warn!(%block, "entry blocked"),
            }
        }
    }

    let state = engine.risk_state();
    info!(
        equity = %state.equity,
        peak = %state.peak_equity,
        drawdown_pct = state.drawdown_pct * 100.0,
        recoveries = engine.drawdown_history().len(),
        "session end"
    );

    let stats = engine.shutdown();
    println!(
        "fills: {}  closes: {} ({} wins / {} losses)  fees: {}  realized: {}  equity: {}",
        stats.fills, stats.closes, stats.wins, stats.losses, stats.total_fees,
        stats.realized_pnl, stats.final_equity
    );

    Ok(())
}
