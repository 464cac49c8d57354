//! Portfolio weight history and realized return calculation.

use crate::data::Frame;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// A portfolio of tickers with target weights through time.
///
/// Each rebalance stores one raw weight row; rows need not sum to one
/// and are normalized lazily when returns are computed. A ticker is
/// tracked from its first rebalance onward and implicitly weighs zero
/// anywhere it is not named.
#[derive(Debug, Clone, Default)]
pub struct InvestmentPortfolio {
    tickers: BTreeSet<String>,
    weights: BTreeMap<NaiveDate, BTreeMap<String, f64>>,
}

impl InvestmentPortfolio {
    /// Create an empty portfolio
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw weights for the given date.
    ///
    /// Overwrites any existing row at that date wholesale, so repeating
    /// a rebalance leaves the history unchanged. Tickers absent from
    /// `weights` are zero at this date.
    pub fn rebalance(&mut self, date: NaiveDate, weights: &BTreeMap<String, f64>) {
        self.tickers.extend(weights.keys().cloned());
        self.weights.insert(date, weights.clone());
    }

    /// Tickers ever rebalanced into the portfolio
    pub fn tickers(&self) -> impl Iterator<Item = &String> {
        self.tickers.iter()
    }

    /// The raw weight rows, by rebalance date
    pub fn weight_history(&self) -> &BTreeMap<NaiveDate, BTreeMap<String, f64>> {
        &self.weights
    }

    /// True when no rebalance has happened yet
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Realized per-period portfolio returns given asset prices.
    ///
    /// The raw row in force at each date is normalized by its sum (an
    /// all-zero row stays zero), carried forward across dates without a
    /// rebalance, zero before the first rebalance, and **lagged one
    /// period**: the weights decided at date t apply to the return
    /// realized from t to t+1. Output rows align to the price dates
    /// from the second onward.
    ///
    /// A tracked ticker with no price column (the synthetic cash
    /// position) earns a zero return. An unobserved asset return only
    /// matters where its weight is non-zero, in which case it
    /// propagates as NaN rather than being hidden.
    pub fn calculate_portfolio_returns(&self, prices: &Frame) -> Vec<(NaiveDate, f64)> {
        let asset_returns = prices.simple_returns();
        let mut result = Vec::with_capacity(asset_returns.len());

        for (idx, &date) in asset_returns.dates().iter().enumerate() {
            // Return at dates[idx + 1] pairs with weights as of dates[idx].
            let decided = prices.dates()[idx];
            let normalized = self.normalized_row_at(decided);

            let mut portfolio_return = 0.0;
            for (ticker, weight) in &normalized {
                if *weight == 0.0 {
                    continue;
                }
                match asset_returns.value(date, ticker) {
                    Some(r) if r.is_finite() => portfolio_return += weight * r,
                    Some(_) => portfolio_return += f64::NAN,
                    None => {} // no price series: cash, zero return
                }
            }
            result.push((date, portfolio_return));
        }

        result
    }

    /// The normalized weight row in force at `date`: the most recent
    /// rebalance at or before it, divided by its sum.
    fn normalized_row_at(&self, date: NaiveDate) -> BTreeMap<String, f64> {
        let Some((_, raw)) = self.weights.range(..=date).next_back() else {
            return BTreeMap::new();
        };

        let total: f64 = raw.values().sum();
        if total == 0.0 {
            return raw.keys().map(|t| (t.clone(), 0.0)).collect();
        }
        raw.iter().map(|(t, w)| (t.clone(), w / total)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2016, 1, day).unwrap()
    }

    fn weights(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(t, w)| (t.to_string(), *w)).collect()
    }

    fn prices() -> Frame {
        Frame::from_rows(
            vec![date(1), date(2), date(3), date(4)],
            vec!["AAPL".to_string(), "IBM".to_string()],
            vec![
                vec![100.0, 50.0],
                vec![110.0, 55.0],
                vec![99.0, 66.0],
                vec![108.9, 33.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_weights_lag_one_period() {
        let mut portfolio = InvestmentPortfolio::new();
        portfolio.rebalance(date(2), &weights(&[("AAPL", 1.0)]));

        let returns = portfolio.calculate_portfolio_returns(&prices());

        // Return at the rebalance date itself: weights not yet applied.
        assert_eq!(returns[0], (date(2), 0.0));
        // Return at t+1 equals AAPL's simple return from t to t+1.
        let (d, r) = returns[1];
        assert_eq!(d, date(3));
        assert!((r - (-0.10)).abs() < 1e-12);
    }

    #[test]
    fn test_zero_weight_before_first_rebalance() {
        let mut portfolio = InvestmentPortfolio::new();
        portfolio.rebalance(date(3), &weights(&[("IBM", 1.0)]));

        let returns = portfolio.calculate_portfolio_returns(&prices());

        assert_eq!(returns[0], (date(2), 0.0));
        assert_eq!(returns[1], (date(3), 0.0));
        // IBM: 66 -> 33 is -50%.
        let (_, r) = returns[2];
        assert!((r - (-0.50)).abs() < 1e-12);
    }

    #[test]
    fn test_raw_weights_are_normalized_by_row_sum() {
        let mut portfolio = InvestmentPortfolio::new();
        portfolio.rebalance(date(1), &weights(&[("AAPL", 3.0), ("IBM", 1.0)]));

        let returns = portfolio.calculate_portfolio_returns(&prices());

        // 0.75 * 10% + 0.25 * 10%
        let (_, r) = returns[0];
        assert!((r - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_rebalance_is_idempotent_and_overwrites() {
        let mut portfolio = InvestmentPortfolio::new();
        portfolio.rebalance(date(2), &weights(&[("AAPL", 1.0)]));
        let first = portfolio.weight_history().clone();
        portfolio.rebalance(date(2), &weights(&[("AAPL", 1.0)]));
        assert_eq!(&first, portfolio.weight_history());

        // A later call fully replaces the row.
        portfolio.rebalance(date(2), &weights(&[("IBM", 1.0)]));
        let row = &portfolio.weight_history()[&date(2)];
        assert!(!row.contains_key("AAPL"));
        assert_eq!(row.get("IBM"), Some(&1.0));
        // AAPL stays tracked even after the overwrite.
        assert!(portfolio.tickers().any(|t| t == "AAPL"));
    }

    #[test]
    fn test_cash_position_earns_zero() {
        let mut portfolio = InvestmentPortfolio::new();
        portfolio.rebalance(date(1), &weights(&[("CASH", 1.0)]));
        portfolio.rebalance(date(3), &weights(&[("AAPL", 1.0)]));

        let returns = portfolio.calculate_portfolio_returns(&prices());

        // Fully in cash through date 3.
        assert_eq!(returns[0], (date(2), 0.0));
        assert_eq!(returns[1], (date(3), 0.0));
        // AAPL: 99 -> 108.9 is +10%.
        let (_, r) = returns[2];
        assert!((r - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_all_zero_row_stays_zero() {
        let mut portfolio = InvestmentPortfolio::new();
        portfolio.rebalance(date(1), &weights(&[("AAPL", 0.0), ("IBM", 0.0)]));

        let returns = portfolio.calculate_portfolio_returns(&prices());
        assert!(returns.iter().all(|(_, r)| *r == 0.0));
    }
}
