//! Backtest orchestration.

mod agent;

pub use agent::{AgentPhase, RewardRecord, TradingAgent};
