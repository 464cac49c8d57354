//! Signal panels: named frames sharing one date axis.

use crate::data::Frame;
use crate::error::{BacktestError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A collection of signal frames aligned on a common ordered date axis.
///
/// Construction validates the alignment once so the learning core can
/// walk a single axis without re-checking per access.
#[derive(Debug, Clone)]
pub struct SignalPanel {
    frames: BTreeMap<String, Frame>,
    dates: Vec<NaiveDate>,
}

impl SignalPanel {
    /// Build a panel from named frames, validating the shared date axis.
    pub fn new(frames: BTreeMap<String, Frame>) -> Result<Self> {
        let mut iter = frames.iter();
        let (first_name, first) = iter
            .next()
            .ok_or_else(|| BacktestError::precondition("panel has no signals".to_string()))?;

        let dates = first.dates().to_vec();
        for (name, frame) in iter {
            if frame.dates() != dates.as_slice() {
                return Err(BacktestError::precondition(format!(
                    "signal {} is not aligned with signal {}: {} vs {} dates",
                    name,
                    first_name,
                    frame.len(),
                    dates.len()
                )));
            }
        }

        Ok(Self { frames, dates })
    }

    /// The shared date axis
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Frame for one signal
    pub fn signal(&self, name: &str) -> Option<&Frame> {
        self.frames.get(name)
    }

    /// Signal names, in sorted order
    pub fn signal_names(&self) -> impl Iterator<Item = &String> {
        self.frames.keys()
    }

    /// True when the panel carries the named signal
    pub fn contains(&self, name: &str) -> bool {
        self.frames.contains_key(name)
    }
}

/// A signal derived as the ratio of two raw items, computed by the data
/// provider before the panel reaches the core (e.g. LEVERAGE =
/// AVERAGE_ASSETS / AVERAGE_EQUITY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedSignal {
    /// Name of the resulting signal
    pub name: String,
    /// Numerator item
    pub numerator: String,
    /// Denominator item
    pub denominator: String,
}

impl DerivedSignal {
    /// Define a derived ratio signal
    pub fn ratio(
        name: impl Into<String>,
        numerator: impl Into<String>,
        denominator: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            numerator: numerator.into(),
            denominator: denominator.into(),
        }
    }

    /// Compute the ratio frame from its two input frames.
    pub fn compute(&self, numerator: &Frame, denominator: &Frame) -> Result<Frame> {
        if numerator.dates() != denominator.dates() || numerator.tickers() != denominator.tickers()
        {
            return Err(BacktestError::precondition(format!(
                "derived signal {} inputs are not aligned",
                self.name
            )));
        }

        let mut rows = Vec::with_capacity(numerator.len());
        for &date in numerator.dates() {
            let row = numerator
                .tickers()
                .iter()
                .map(|ticker| {
                    let over = numerator.value(date, ticker).unwrap_or(f64::NAN);
                    let under = denominator.value(date, ticker).unwrap_or(f64::NAN);
                    if under == 0.0 {
                        f64::NAN
                    } else {
                        over / under
                    }
                })
                .collect();
            rows.push(row);
        }

        Frame::from_rows(
            numerator.dates().to_vec(),
            numerator.tickers().to_vec(),
            rows,
        )
    }
}
