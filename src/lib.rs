//! # Rust Q Trading
//!
//! A tabular Q-learning backtester: per-ticker financial signals are
//! discretized into state buckets, an action-value table over
//! (state -> {BUY, SELL}) is learned from realized risk-adjusted
//! returns, and the chosen actions drive a rebalanced minimum-variance
//! portfolio.
//!
//! ## Modules
//!
//! - `data` - panel data model and flat-file CSV provider
//! - `environment` - date cursor and state discretization
//! - `learn` - the tabular Q-learner
//! - `finance` - portfolio tracking and weight optimization
//! - `trading` - the time-stepped learn/trade orchestration
//! - `utils` - configuration and statistics helpers

pub mod data;
pub mod environment;
pub mod error;
pub mod finance;
pub mod learn;
pub mod trading;
pub mod utils;

pub use data::{DerivedSignal, FlatFileDataService, Frame, SignalPanel};
pub use environment::{Environment, Observation, STATE_BINS};
pub use error::{BacktestError, Result};
pub use finance::{ClosedFormMinVariance, InvestmentPortfolio, MinVarianceSolver, CASH_TICKER};
pub use learn::{Action, QLearner, RealizedReward, State};
pub use trading::{AgentPhase, RewardRecord, TradingAgent};
pub use utils::{AppConfig, PerformanceMetrics};
