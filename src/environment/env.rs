//! Date-stepped environment over a signal panel.

use crate::data::SignalPanel;
use crate::environment::Observation;
use crate::error::{BacktestError, Result};
use crate::utils::metrics::{mean, population_std};
use chrono::NaiveDate;
use log::debug;

/// Number of buckets each signal cross-section is cut into.
pub const STATE_BINS: usize = 3;

/// Walks the panel's date axis and discretizes per-ticker signal values
/// into state buckets on demand.
///
/// The cursor starts logically before the first date; [`advance`]
/// must be called once before [`sense`] is valid.
///
/// [`advance`]: Environment::advance
/// [`sense`]: Environment::sense
pub struct Environment {
    panel: SignalPanel,
    dates: Vec<NaiveDate>,
    cursor: Option<usize>,
}

impl Environment {
    /// Create an environment over the given panel
    pub fn new(panel: SignalPanel) -> Self {
        let dates = panel.dates().to_vec();
        Self {
            panel,
            dates,
            cursor: None,
        }
    }

    /// Advance one step through time.
    ///
    /// Yields the next date, or `None` once the end of the series is
    /// reached. Calling again after exhaustion keeps returning `None`
    /// without moving the cursor.
    pub fn advance(&mut self) -> Option<NaiveDate> {
        let next = match self.cursor {
            Some(current) => current + 1,
            None => 0,
        };
        if next >= self.dates.len() {
            return None;
        }
        self.cursor = Some(next);
        Some(self.dates[next])
    }

    /// The date the cursor currently points at
    pub fn current_date(&self) -> Option<NaiveDate> {
        self.cursor.map(|i| self.dates[i])
    }

    /// True once `advance` has walked past the last date
    pub fn is_exhausted(&self) -> bool {
        match self.cursor {
            Some(current) => current + 1 >= self.dates.len(),
            None => self.dates.is_empty(),
        }
    }

    /// Discretize the current date's cross-sections.
    pub fn sense(&self) -> Result<Observation> {
        let date = self.current_date().ok_or_else(|| {
            BacktestError::precondition("sense called before the first advance".to_string())
        })?;
        self.sense_date(date)
    }

    /// Discretize each signal's cross-section at an arbitrary date.
    ///
    /// Per signal: z-score the per-ticker values present at `date`
    /// (population standard deviation across the cross-section), then
    /// cut the z-scores into [`STATE_BINS`] equal-width buckets spanning
    /// their realized min/max. A cross-section that cannot be z-scored
    /// (fewer than two tickers, zero variance) is a computation error
    /// naming the signal and date — buckets are never defaulted.
    pub fn sense_date(&self, date: NaiveDate) -> Result<Observation> {
        if !self.dates.contains(&date) {
            return Err(BacktestError::precondition(format!(
                "date {} is not on the panel's axis",
                date
            )));
        }

        let mut observation = Observation::new(date);

        for name in self.panel.signal_names() {
            let frame = self.panel.signal(name).expect("name from the panel itself");
            let row = frame.row(date).ok_or_else(|| {
                BacktestError::precondition(format!("signal {} has no row at {}", name, date))
            })?;

            let present: Vec<(&str, f64)> = frame
                .tickers()
                .iter()
                .zip(row.iter())
                .filter(|(_, v)| v.is_finite())
                .map(|(t, v)| (t.as_str(), *v))
                .collect();

            if present.len() < 2 {
                return Err(BacktestError::computation(
                    name.clone(),
                    date,
                    format!("cross-section has {} tickers, need at least 2", present.len()),
                ));
            }

            let values: Vec<f64> = present.iter().map(|(_, v)| *v).collect();
            let center = mean(&values);
            let spread = population_std(&values);
            if spread == 0.0 {
                return Err(BacktestError::computation(
                    name.clone(),
                    date,
                    "cross-section has zero variance".to_string(),
                ));
            }

            let scores: Vec<f64> = values.iter().map(|v| (v - center) / spread).collect();
            let low = scores.iter().cloned().fold(f64::INFINITY, f64::min);
            let high = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let width = (high - low) / STATE_BINS as f64;

            for ((ticker, _), score) in present.iter().zip(scores.iter()) {
                let bucket = (((score - low) / width) as usize).min(STATE_BINS - 1);
                observation.insert(name, ticker, bucket as u8);
            }
        }

        debug!("sensed {} signals at {}", self.panel.signal_names().count(), date);
        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Frame;
    use std::collections::BTreeMap;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 1, day).unwrap()
    }

    fn panel(rows: Vec<Vec<f64>>) -> SignalPanel {
        let dates = (1..=rows.len() as u32).map(date).collect();
        let tickers = vec!["AAPL".to_string(), "IBM".to_string(), "MSFT".to_string()];
        let frame = Frame::from_rows(dates, tickers, rows).unwrap();

        let mut frames = BTreeMap::new();
        frames.insert("LEVERAGE".to_string(), frame);
        SignalPanel::new(frames).unwrap()
    }

    #[test]
    fn test_advance_walks_all_dates_then_yields_sentinel() {
        let mut env = Environment::new(panel(vec![
            vec![1.0, 2.0, 3.0],
            vec![2.0, 3.0, 4.0],
        ]));

        assert_eq!(env.advance(), Some(date(1)));
        assert_eq!(env.advance(), Some(date(2)));
        assert_eq!(env.advance(), None);
        // Idempotent past the end: no error, no movement.
        assert_eq!(env.advance(), None);
        assert_eq!(env.current_date(), Some(date(2)));
        assert!(env.is_exhausted());
    }

    #[test]
    fn test_sense_before_advance_is_precondition_error() {
        let env = Environment::new(panel(vec![vec![1.0, 2.0, 3.0]]));
        assert!(matches!(
            env.sense(),
            Err(BacktestError::Precondition(_))
        ));
    }

    #[test]
    fn test_sense_date_buckets_span_the_cross_section() {
        let env = Environment::new(panel(vec![vec![1.0, 2.0, 3.0]]));
        let obs = env.sense_date(date(1)).unwrap();

        // Min, middle, max of the z-scored cross-section.
        assert_eq!(obs.bucket("LEVERAGE", "AAPL"), Some(0));
        assert_eq!(obs.bucket("LEVERAGE", "IBM"), Some(1));
        assert_eq!(obs.bucket("LEVERAGE", "MSFT"), Some(2));
    }

    #[test]
    fn test_sense_date_is_deterministic() {
        let env = Environment::new(panel(vec![vec![3.5, -1.0, 0.25]]));
        let first = env.sense_date(date(1)).unwrap();
        let second = env.sense_date(date(1)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_variance_cross_section_is_computation_error() {
        let env = Environment::new(panel(vec![vec![2.0, 2.0, 2.0]]));
        let err = env.sense_date(date(1)).unwrap_err();

        match err {
            BacktestError::Computation { context, date: d, .. } => {
                assert_eq!(context, "LEVERAGE");
                assert_eq!(d, date(1));
            }
            other => panic!("expected computation error, got {:?}", other),
        }
    }

    #[test]
    fn test_sparse_cross_section_skips_missing_tickers() {
        let env = Environment::new(panel(vec![vec![1.0, f64::NAN, 3.0]]));
        let obs = env.sense_date(date(1)).unwrap();

        assert_eq!(obs.bucket("LEVERAGE", "AAPL"), Some(0));
        assert_eq!(obs.bucket("LEVERAGE", "IBM"), None);
        assert_eq!(obs.bucket("LEVERAGE", "MSFT"), Some(2));
    }

    #[test]
    fn test_single_ticker_cross_section_is_computation_error() {
        let env = Environment::new(panel(vec![vec![1.0, f64::NAN, f64::NAN]]));
        assert!(matches!(
            env.sense_date(date(1)),
            Err(BacktestError::Computation { .. })
        ));
    }
}
