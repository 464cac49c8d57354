//! Time-stepped learn/trade orchestration.

use crate::data::{Frame, SignalPanel};
use crate::environment::Environment;
use crate::error::{BacktestError, Result};
use crate::finance::{ClosedFormMinVariance, InvestmentPortfolio, MinVarianceSolver, CASH_TICKER};
use crate::learn::{Action, QLearner, RealizedReward};
use crate::utils::config::LearningConfig;
use crate::utils::metrics::{cumulative_compounded_return, sample_std};
use chrono::NaiveDate;
use log::{debug, info, warn};
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;

/// Where the agent currently is in the backtest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentPhase {
    Learning,
    Trading,
    Done,
}

/// One ticker's settled reward over a window.
#[derive(Debug, Clone)]
pub struct RewardRecord {
    pub ticker: String,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub cumulative_return: f64,
    pub std_dev: f64,
    pub sharpe: f64,
    pub action: Action,
    pub reward: f64,
}

impl fmt::Display for RewardRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}..{}: cum {:.4} std {:.4} sharpe {:.4} took {} reward {:.4}",
            self.ticker,
            self.date_from,
            self.date_to,
            self.cumulative_return,
            self.std_dev,
            self.sharpe,
            self.action,
            self.reward
        )
    }
}

/// Drives the backtest through time: advances the environment, asks the
/// learner for actions, periodically settles realized rewards back into
/// the value table, and rebalances the portfolio from the current BUY
/// set via a minimum-variance solver.
pub struct TradingAgent {
    environment: Environment,
    learner: QLearner,
    returns: Frame,
    portfolio: InvestmentPortfolio,
    solver: Box<dyn MinVarianceSolver>,
    actions_taken: BTreeMap<NaiveDate, BTreeMap<String, Action>>,
    phase: AgentPhase,
    random_policy: bool,
    skip_poisoned_windows: bool,
}

impl TradingAgent {
    /// Build an agent from a loaded panel.
    ///
    /// `price_item` names the panel frame carrying per-period prices;
    /// `signals` the frames composing the learner's state, in order.
    /// The environment senses only the state signals.
    pub fn new(
        panel: &SignalPanel,
        price_item: &str,
        signals: Vec<String>,
        config: &LearningConfig,
    ) -> Result<Self> {
        let prices = panel.signal(price_item).cloned().ok_or_else(|| {
            BacktestError::precondition(format!("panel has no price item {}", price_item))
        })?;

        let mut state_frames = BTreeMap::new();
        for name in &signals {
            let frame = panel.signal(name).cloned().ok_or_else(|| {
                BacktestError::precondition(format!("panel has no signal {}", name))
            })?;
            state_frames.insert(name.clone(), frame);
        }

        Ok(Self {
            environment: Environment::new(SignalPanel::new(state_frames)?),
            learner: QLearner::new(signals, config.alpha)?,
            returns: prices.simple_returns(),
            portfolio: InvestmentPortfolio::new(),
            solver: Box::new(ClosedFormMinVariance),
            actions_taken: BTreeMap::new(),
            phase: AgentPhase::Learning,
            random_policy: config.random_policy,
            skip_poisoned_windows: config.skip_poisoned_windows,
        })
    }

    /// Swap in a different minimum-variance solver
    pub fn with_solver(mut self, solver: Box<dyn MinVarianceSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// Current backtest phase
    pub fn phase(&self) -> AgentPhase {
        self.phase
    }

    /// The environment being walked
    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// The learner being trained
    pub fn learner(&self) -> &QLearner {
        &self.learner
    }

    /// The tracked portfolio
    pub fn portfolio(&self) -> &InvestmentPortfolio {
        &self.portfolio
    }

    /// Train the learner for up to `periods` steps without tracking a
    /// portfolio. Every `reward_offset`-th step — once at least one full
    /// window has elapsed — the actions taken `reward_offset` steps ago
    /// are settled against the returns realized since. Returns the
    /// number of windows settled. Stops early when the environment runs
    /// out of dates.
    pub fn learn(&mut self, periods: usize, reward_offset: usize) -> Result<usize> {
        validate_offset(reward_offset)?;
        self.phase = AgentPhase::Learning;
        info!("learning for {} periods, reward offset {}", periods, reward_offset);

        let mut settled = 0;
        let mut step_dates = Vec::with_capacity(periods);
        for i in 0..periods {
            let Some(date) = self.environment.advance() else {
                self.phase = AgentPhase::Done;
                break;
            };

            let actions = self.learner.get_actions(&self.environment)?;
            step_dates.push(date);
            self.actions_taken.insert(date, actions);

            if i > reward_offset && i % reward_offset == 0 {
                let date_from = step_dates[i - reward_offset];
                if self.settle_window(date_from, date)? {
                    settled += 1;
                }
            }
        }

        Ok(settled)
    }

    /// Step through the remaining dates trading a minimum-variance
    /// portfolio. At every reward-eligible step the current BUY set is
    /// optimized into target weights (or everything moves to cash when
    /// nothing is flagged BUY) and the window ending here is settled.
    /// Returns the number of rebalances performed.
    pub fn trade(&mut self, reward_offset: usize) -> Result<usize> {
        validate_offset(reward_offset)?;
        self.phase = AgentPhase::Trading;
        info!("trading with reward offset {}", reward_offset);

        let mut rng = rand::thread_rng();
        let mut rebalances = 0;
        let mut step_dates = Vec::new();
        let mut i = 0usize;

        while let Some(date) = self.environment.advance() {
            let mut actions = self.learner.get_actions(&self.environment)?;
            if self.random_policy {
                for action in actions.values_mut() {
                    *action = if rng.gen_bool(0.5) {
                        Action::Buy
                    } else {
                        Action::Sell
                    };
                }
            }
            step_dates.push(date);
            self.actions_taken.insert(date, actions.clone());

            if i > reward_offset && i % reward_offset == 0 {
                self.rebalance_from_actions(date, &actions)?;
                rebalances += 1;

                let date_from = step_dates[i - reward_offset];
                self.settle_window(date_from, date)?;
            }
            i += 1;
        }

        self.phase = AgentPhase::Done;
        Ok(rebalances)
    }

    /// Settle one reward window, honoring the poisoned-window policy:
    /// a failed window aborts the backtest unless skipping is
    /// configured, in which case the decision is logged and the loop
    /// moves on.
    fn settle_window(&mut self, date_from: NaiveDate, date_to: NaiveDate) -> Result<bool> {
        match self.apply_reward(date_from, date_to) {
            Ok(_) => Ok(true),
            Err(err) if self.skip_poisoned_windows => {
                warn!(
                    "skipping reward window {}..{} by policy: {}",
                    date_from, date_to, err
                );
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Compute and deliver rewards for the window [date_from, date_to].
    ///
    /// Per ticker: cumulative compounded return over the window's
    /// return rows, sample standard deviation, and their ratio as the
    /// Sharpe-like reward. If the action at the time was SELL the
    /// reward is inverted — selling ahead of a loss is a correct call.
    fn apply_reward(&mut self, date_from: NaiveDate, date_to: NaiveDate) -> Result<Vec<RewardRecord>> {
        let actions = self
            .actions_taken
            .get(&date_from)
            .cloned()
            .ok_or_else(|| {
                BacktestError::precondition(format!("no actions recorded at {}", date_from))
            })?;

        let window = self.returns.slice_dates(date_from, date_to);
        let observation = self.environment.sense_date(date_from)?;

        let mut outcomes = BTreeMap::new();
        let mut records = Vec::with_capacity(actions.len());
        for (ticker, action) in &actions {
            let series: Vec<f64> = window
                .column(ticker)
                .map(|col| col.iter().copied().filter(|v| v.is_finite()).collect())
                .unwrap_or_default();

            if series.len() < 2 {
                return Err(BacktestError::computation(
                    format!("reward window for {}", ticker),
                    date_to,
                    format!(
                        "{} observed returns between {} and {}, need at least 2",
                        series.len(),
                        date_from,
                        date_to
                    ),
                ));
            }

            let cumulative = cumulative_compounded_return(&series);
            let std_dev = sample_std(&series);
            if std_dev == 0.0 {
                return Err(BacktestError::computation(
                    format!("reward window for {}", ticker),
                    date_to,
                    "zero return variance over the window".to_string(),
                ));
            }

            let sharpe = cumulative / std_dev;
            let reward = match action {
                Action::Sell => -sharpe,
                Action::Buy => sharpe,
            };

            let record = RewardRecord {
                ticker: ticker.clone(),
                date_from,
                date_to,
                cumulative_return: cumulative,
                std_dev,
                sharpe,
                action: *action,
                reward,
            };
            debug!("{}", record);

            outcomes.insert(
                ticker.clone(),
                RealizedReward {
                    action: *action,
                    value: reward,
                },
            );
            records.push(record);
        }

        self.learner.reward(&observation, &outcomes);
        Ok(records)
    }

    /// Rebalance the portfolio from a chosen action set: minimum
    /// variance over the BUY tickers' return history up to `date`, or
    /// all cash when nothing is flagged BUY.
    fn rebalance_from_actions(
        &mut self,
        date: NaiveDate,
        actions: &BTreeMap<String, Action>,
    ) -> Result<()> {
        let buys: Vec<String> = actions
            .iter()
            .filter(|(_, action)| **action == Action::Buy)
            .map(|(ticker, _)| ticker.clone())
            .collect();

        let weights = if buys.is_empty() {
            debug!("nothing flagged BUY at {}, rebalancing into cash", date);
            BTreeMap::from([(CASH_TICKER.to_string(), 1.0)])
        } else {
            let history = self.returns.up_to(date).select_tickers(&buys)?;
            let covariance = history.covariance()?;
            self.solver.min_var_weights(&covariance, &buys)?
        };

        self.portfolio.rebalance(date, &weights);
        Ok(())
    }
}

fn validate_offset(reward_offset: usize) -> Result<()> {
    if reward_offset == 0 {
        return Err(BacktestError::precondition(
            "reward_offset must be at least 1".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learn::State;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 1, day).unwrap()
    }

    /// Two tickers, one signal, `n` dates. Signal cross-sections always
    /// have spread; prices wiggle so reward windows have variance.
    fn panel(n: u32) -> SignalPanel {
        let dates: Vec<NaiveDate> = (1..=n).map(date).collect();
        let tickers = vec!["AAPL".to_string(), "IBM".to_string()];

        let momentum_rows: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![i as f64 + 1.0, -(i as f64) - 2.0])
            .collect();
        let price_rows: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let wiggle = (i as f64).sin() * 5.0;
                vec![100.0 + i as f64 * 3.0 + wiggle, 80.0 - i as f64 * 10.0 + wiggle]
            })
            .collect();

        let mut frames = BTreeMap::new();
        frames.insert(
            "MOMENTUM".to_string(),
            Frame::from_rows(dates.clone(), tickers.clone(), momentum_rows).unwrap(),
        );
        frames.insert(
            "PRICE".to_string(),
            Frame::from_rows(dates, tickers, price_rows).unwrap(),
        );
        SignalPanel::new(frames).unwrap()
    }

    fn agent(n: u32) -> TradingAgent {
        let config = LearningConfig {
            alpha: 0.5,
            learn_periods: 0,
            reward_offset: 2,
            random_policy: false,
            skip_poisoned_windows: false,
        };
        TradingAgent::new(&panel(n), "PRICE", vec!["MOMENTUM".to_string()], &config).unwrap()
    }

    #[test]
    fn test_zero_reward_offset_is_precondition_error() {
        let mut agent = agent(5);
        assert!(matches!(
            agent.learn(5, 0),
            Err(BacktestError::Precondition(_))
        ));
    }

    #[test]
    fn test_learn_before_first_window_leaves_values_at_zero() {
        let mut agent = agent(5);
        // Four steps with offset 2: no step satisfies i > 2 && i % 2 == 0.
        let settled = agent.learn(4, 2).unwrap();

        assert_eq!(settled, 0);
        let learner = agent.learner();
        assert!(learner.state_count() > 0);
        for state in learner.states() {
            assert_eq!(learner.q_value(state, Action::Buy), Some(0.0));
            assert_eq!(learner.q_value(state, Action::Sell), Some(0.0));
        }
    }

    #[test]
    fn test_learn_settles_first_eligible_window() {
        let mut agent = agent(5);
        // Step 4 is the first eligible one: window dates[2]..dates[4].
        let settled = agent.learn(5, 2).unwrap();
        assert_eq!(settled, 1);

        let learner = agent.learner();
        // Two tickers on opposite ends of every cross-section: exactly
        // the two encountered states, each with both actions present.
        assert_eq!(learner.state_count(), 2);
        for state in learner.states() {
            assert!(learner.q_value(state, Action::Buy).is_some());
            assert!(learner.q_value(state, Action::Sell).is_some());
        }
        // The settled window moved at least one BUY value off zero
        // (fresh tables choose BUY on ties).
        let moved = learner
            .states()
            .any(|s| learner.q_value(s, Action::Buy) != Some(0.0));
        assert!(moved);
    }

    #[test]
    fn test_learn_stops_at_exhaustion() {
        let mut agent = agent(3);
        let settled = agent.learn(10, 2).unwrap();

        assert_eq!(settled, 0);
        assert_eq!(agent.phase(), AgentPhase::Done);
        assert!(agent.environment().is_exhausted());
    }

    #[test]
    fn test_sell_reward_sign_is_flipped() {
        let mut agent = agent(6);
        agent.learn(3, 10).unwrap();

        // Pretend AAPL was bought and IBM sold at the window start.
        let mut taken = BTreeMap::new();
        taken.insert("AAPL".to_string(), Action::Buy);
        taken.insert("IBM".to_string(), Action::Sell);
        agent.actions_taken.insert(date(1), taken);

        let records = agent.apply_reward(date(1), date(3)).unwrap();
        let aapl = records.iter().find(|r| r.ticker == "AAPL").unwrap();
        let ibm = records.iter().find(|r| r.ticker == "IBM").unwrap();

        // BUY keeps the ratio's sign, SELL inverts it.
        assert_eq!(aapl.reward, aapl.sharpe);
        assert_eq!(ibm.reward, -ibm.sharpe);
        assert!(ibm.sharpe < 0.0); // IBM trends down, so the flip rewards the sell
        assert!(ibm.reward > 0.0);

        // The update landed on the action actually taken.
        let learner = agent.learner();
        let ibm_state = State::new(vec![0]); // IBM sits at the bottom bucket
        assert_eq!(
            learner.q_value(&ibm_state, Action::Sell),
            Some(0.5 * ibm.reward)
        );
    }

    #[test]
    fn test_zero_variance_window_aborts_with_context() {
        // Constant growth: every return is exactly 3%.
        let dates: Vec<NaiveDate> = (1..=6).map(date).collect();
        let tickers = vec!["AAPL".to_string(), "IBM".to_string()];
        let price_rows: Vec<Vec<f64>> = (0..6)
            .map(|i| {
                let level = 1.03_f64.powi(i);
                vec![100.0 * level, 80.0 * level]
            })
            .collect();
        let momentum_rows: Vec<Vec<f64>> =
            (0..6).map(|i| vec![i as f64, -(i as f64) - 1.0]).collect();

        let mut frames = BTreeMap::new();
        frames.insert(
            "MOMENTUM".to_string(),
            Frame::from_rows(dates.clone(), tickers.clone(), momentum_rows).unwrap(),
        );
        frames.insert(
            "PRICE".to_string(),
            Frame::from_rows(dates, tickers, price_rows).unwrap(),
        );
        let panel = SignalPanel::new(frames).unwrap();

        let mut config = LearningConfig {
            alpha: 0.5,
            learn_periods: 0,
            reward_offset: 2,
            random_policy: false,
            skip_poisoned_windows: false,
        };

        let mut agent =
            TradingAgent::new(&panel, "PRICE", vec!["MOMENTUM".to_string()], &config).unwrap();
        assert!(matches!(
            agent.learn(5, 2),
            Err(BacktestError::Computation { .. })
        ));

        // With the skip policy the loop continues past the bad window.
        config.skip_poisoned_windows = true;
        let mut agent =
            TradingAgent::new(&panel, "PRICE", vec!["MOMENTUM".to_string()], &config).unwrap();
        let settled = agent.learn(5, 2).unwrap();
        assert_eq!(settled, 0);
    }

    #[test]
    fn test_trade_rebalances_the_buy_set() {
        let mut agent = agent(8);
        let rebalances = agent.trade(2).unwrap();

        // Steps 4 and 6 are eligible.
        assert_eq!(rebalances, 2);
        assert_eq!(agent.phase(), AgentPhase::Done);
        assert!(!agent.portfolio().is_empty());

        // Fresh tables pick BUY everywhere, so the optimizer ran over
        // both tickers; each stored row normalizes to a full allocation.
        for row in agent.portfolio().weight_history().values() {
            let total: f64 = row.values().sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_buy_set_moves_to_cash() {
        let mut agent = agent(6);
        agent.learn(2, 10).unwrap();

        let mut actions = BTreeMap::new();
        actions.insert("AAPL".to_string(), Action::Sell);
        actions.insert("IBM".to_string(), Action::Sell);
        agent.rebalance_from_actions(date(2), &actions).unwrap();

        let row = &agent.portfolio().weight_history()[&date(2)];
        assert_eq!(row.get(CASH_TICKER), Some(&1.0));
        assert_eq!(row.len(), 1);
    }
}
