//! Discretized state snapshots produced by the environment.

use chrono::NaiveDate;
use std::collections::BTreeMap;

/// One date's discretized view of the signal panel: for every signal,
/// the bucket each ticker fell into.
///
/// Ordered maps keep iteration deterministic, which matters downstream —
/// value-table updates are applied in ticker order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    date: NaiveDate,
    buckets: BTreeMap<String, BTreeMap<String, u8>>,
}

impl Observation {
    pub(crate) fn new(date: NaiveDate) -> Self {
        Self {
            date,
            buckets: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, signal: &str, ticker: &str, bucket: u8) {
        self.buckets
            .entry(signal.to_string())
            .or_default()
            .insert(ticker.to_string(), bucket);
    }

    /// The date this snapshot was taken at
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Bucket for (signal, ticker), if that ticker was observed
    pub fn bucket(&self, signal: &str, ticker: &str) -> Option<u8> {
        self.buckets.get(signal)?.get(ticker).copied()
    }

    /// Signals present in the snapshot
    pub fn signals(&self) -> impl Iterator<Item = &String> {
        self.buckets.keys()
    }

    /// Tickers that carry a bucket for every one of the given signals,
    /// in sorted order. Tickers with a gap in any signal are not
    /// actionable on this date.
    pub fn complete_tickers(&self, signals: &[String]) -> Vec<String> {
        let Some(first) = signals.first().and_then(|s| self.buckets.get(s)) else {
            return Vec::new();
        };

        first
            .keys()
            .filter(|ticker| {
                signals
                    .iter()
                    .all(|signal| self.bucket(signal, ticker).is_some())
            })
            .cloned()
            .collect()
    }
}
