//! Tabular Q-learner over discretized signal states.

use crate::environment::{Environment, Observation};
use crate::error::{BacktestError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};

/// The decision space for every state.
///
/// Declaration order is the tie-break order: when two actions carry the
/// same value, the one declared first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    /// All actions, in declaration order
    pub const ALL: [Action; 2] = [Action::Buy, Action::Sell];

    /// Number of actions
    pub const COUNT: usize = 2;

    /// Position in the declared action set
    pub fn index(self) -> usize {
        match self {
            Action::Buy => 0,
            Action::Sell => 1,
        }
    }

    /// Display name
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discretized state: one bucket index per configured signal, in the
/// learner's fixed signal order. Tickers sharing buckets on a date share
/// the state — the learner generalizes across them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct State(Vec<u8>);

impl State {
    /// Create a state from ordered bucket indices
    pub fn new(buckets: Vec<u8>) -> Self {
        Self(buckets)
    }

    /// The bucket indices
    pub fn buckets(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, bucket) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", bucket)?;
        }
        write!(f, ")")
    }
}

/// The action a ticker actually took over a reward window, with the
/// realized reward to credit it. Supplied by the orchestrator so a
/// reward settles the action chosen back then, not whatever the current
/// table would choose now.
#[derive(Debug, Clone, Copy)]
pub struct RealizedReward {
    pub action: Action,
    pub value: f64,
}

/// Serialized form of the value table.
#[derive(Serialize, Deserialize)]
struct QTableSnapshot {
    alpha: f64,
    signals: Vec<String>,
    entries: Vec<(State, [f64; Action::COUNT])>,
}

/// Tabular learner mapping discretized states to per-action values.
///
/// Rows are created lazily with 0.0 for every action the first time a
/// state is met, are never removed, and change only through the reward
/// rule `Q[s][a] <- Q[s][a] + alpha * (r - Q[s][a])` — an incremental
/// average toward observed rewards, with no discounting and no
/// next-state term since transitions are not modeled.
pub struct QLearner {
    signals: Vec<String>,
    alpha: f64,
    q: BTreeMap<State, [f64; Action::COUNT]>,
}

impl QLearner {
    /// Create a learner whose states read the given signals, in order.
    ///
    /// `alpha` is the learning rate and must lie in (0, 1].
    pub fn new(signals: Vec<String>, alpha: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(BacktestError::precondition(format!(
                "alpha must be in (0, 1], got {}",
                alpha
            )));
        }
        if signals.is_empty() {
            return Err(BacktestError::precondition(
                "learner needs at least one state signal".to_string(),
            ));
        }
        Ok(Self {
            signals,
            alpha,
            q: BTreeMap::new(),
        })
    }

    /// Signals composing the state, in fixed order
    pub fn signals(&self) -> &[String] {
        &self.signals
    }

    /// Sense the environment's current date and choose actions for it.
    pub fn get_actions(&mut self, environment: &Environment) -> Result<BTreeMap<String, Action>> {
        let observation = environment.sense()?;
        self.get_actions_for_states(&observation)
    }

    /// Choose the greedy action for every actionable ticker in the
    /// observation. Unseen states are initialized on the way; ties go to
    /// the first action in declaration order, so selection is
    /// deterministic.
    pub fn get_actions_for_states(
        &mut self,
        observation: &Observation,
    ) -> Result<BTreeMap<String, Action>> {
        let mut result = BTreeMap::new();

        for ticker in observation.complete_tickers(&self.signals) {
            let Some(state) = self.build_state(observation, &ticker) else {
                continue;
            };
            let values = *self.row(state.clone());

            let mut best = Action::ALL[0];
            for action in Action::ALL {
                if values[action.index()] > values[best.index()] {
                    best = action;
                }
            }

            debug!(
                "choosing {} for {} in state {} ({:?})",
                best, ticker, state, values
            );
            result.insert(ticker, best);
        }

        Ok(result)
    }

    /// Credit realized rewards to the states observed at the start of a
    /// reward window.
    ///
    /// Every ticker present in both the observation and the outcome map
    /// gets its state's value for the action it took pulled toward the
    /// realized reward. Updates run in ticker order, so two tickers
    /// landing on the same state settle deterministically.
    pub fn reward(&mut self, observation: &Observation, outcomes: &BTreeMap<String, RealizedReward>) {
        let alpha = self.alpha;

        for (ticker, outcome) in outcomes {
            let Some(state) = self.build_state(observation, ticker) else {
                continue;
            };
            let values = self.row(state.clone());
            let old = values[outcome.action.index()];
            let new = old + alpha * (outcome.value - old);
            values[outcome.action.index()] = new;

            debug!(
                "updating Q for {} taking {} in state {} from {} to {}",
                ticker, outcome.action, state, old, new
            );
        }
    }

    /// Current value for (state, action); `None` until the state is met
    pub fn q_value(&self, state: &State, action: Action) -> Option<f64> {
        self.q.get(state).map(|values| values[action.index()])
    }

    /// Number of states met so far
    pub fn state_count(&self) -> usize {
        self.q.len()
    }

    /// States met so far
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.q.keys()
    }

    /// Save the value table to a JSON file
    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        let snapshot = QTableSnapshot {
            alpha: self.alpha,
            signals: self.signals.clone(),
            entries: self.q.iter().map(|(s, v)| (s.clone(), *v)).collect(),
        };
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), &snapshot)?;
        Ok(())
    }

    /// Load a value table previously written by [`save`](Self::save)
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let file = File::open(path)?;
        let snapshot: QTableSnapshot = serde_json::from_reader(BufReader::new(file))?;
        let learner = Self {
            signals: snapshot.signals,
            alpha: snapshot.alpha,
            q: snapshot.entries.into_iter().collect(),
        };
        Ok(learner)
    }

    /// Build a ticker's state by reading the configured signals in
    /// order; `None` when any signal has no bucket for the ticker.
    fn build_state(&self, observation: &Observation, ticker: &str) -> Option<State> {
        let buckets = self
            .signals
            .iter()
            .map(|signal| observation.bucket(signal, ticker))
            .collect::<Option<Vec<u8>>>()?;
        Some(State::new(buckets))
    }

    /// Get-or-insert the row for a state, initializing all actions to 0.
    fn row(&mut self, state: State) -> &mut [f64; Action::COUNT] {
        self.q.entry(state).or_insert([0.0; Action::COUNT])
    }
}
