//! Tabular value-function learning.

mod q_learner;

pub use q_learner::{Action, QLearner, RealizedReward, State};
