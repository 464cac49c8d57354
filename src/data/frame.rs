//! Date-indexed, ticker-columned numeric tables.

use crate::error::{BacktestError, Result};
use chrono::NaiveDate;
use ndarray::{Array2, ArrayView1, Axis};

/// A two-dimensional table of `f64` values with an ordered date axis
/// (rows) and named ticker columns. `NaN` marks a missing value.
#[derive(Debug, Clone)]
pub struct Frame {
    dates: Vec<NaiveDate>,
    tickers: Vec<String>,
    values: Array2<f64>,
}

impl Frame {
    /// Create a frame, validating that the value shape matches the axes.
    pub fn new(dates: Vec<NaiveDate>, tickers: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.nrows() != dates.len() || values.ncols() != tickers.len() {
            return Err(BacktestError::precondition(format!(
                "frame shape {}x{} does not match {} dates x {} tickers",
                values.nrows(),
                values.ncols(),
                dates.len(),
                tickers.len()
            )));
        }
        Ok(Self {
            dates,
            tickers,
            values,
        })
    }

    /// Create a frame from per-date rows.
    pub fn from_rows(
        dates: Vec<NaiveDate>,
        tickers: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let values = Array2::from_shape_vec((dates.len(), tickers.len()), flat)
            .map_err(|e| BacktestError::precondition(format!("ragged frame rows: {}", e)))?;
        Self::new(dates, tickers, values)
    }

    /// Ordered date axis
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Ticker columns
    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    /// Number of dates (rows)
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// True when the frame has no dates
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Position of a date on the axis
    pub fn date_index(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// Position of a ticker column
    pub fn ticker_index(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    /// Value at (date, ticker); `None` when either axis misses the key.
    /// A present-but-missing observation comes back as `NaN`.
    pub fn value(&self, date: NaiveDate, ticker: &str) -> Option<f64> {
        let row = self.date_index(date)?;
        let col = self.ticker_index(ticker)?;
        Some(self.values[[row, col]])
    }

    /// Cross-section of all tickers at a date
    pub fn row(&self, date: NaiveDate) -> Option<ArrayView1<'_, f64>> {
        let idx = self.date_index(date)?;
        Some(self.values.row(idx))
    }

    /// Full series for one ticker
    pub fn column(&self, ticker: &str) -> Option<ArrayView1<'_, f64>> {
        let idx = self.ticker_index(ticker)?;
        Some(self.values.column(idx))
    }

    /// Simple per-period returns: row t holds `p_t / p_{t-1} - 1` and the
    /// axis starts at the second date. NaN inputs (or a zero previous
    /// price) propagate as NaN.
    pub fn simple_returns(&self) -> Frame {
        if self.is_empty() {
            return self.clone();
        }
        let rows = self.len() - 1;
        let mut values = Array2::from_elem((rows, self.tickers.len()), f64::NAN);

        for t in 1..self.len() {
            for c in 0..self.tickers.len() {
                let prev = self.values[[t - 1, c]];
                let curr = self.values[[t, c]];
                if prev.is_finite() && curr.is_finite() && prev != 0.0 {
                    values[[t - 1, c]] = curr / prev - 1.0;
                }
            }
        }

        Frame {
            dates: self.dates[1..].to_vec(),
            tickers: self.tickers.clone(),
            values,
        }
    }

    /// Rows with `from <= date <= to`
    pub fn slice_dates(&self, from: NaiveDate, to: NaiveDate) -> Frame {
        let start = self.dates.partition_point(|d| *d < from);
        let end = self.dates.partition_point(|d| *d <= to);
        let (start, end) = (start.min(end), end);

        Frame {
            dates: self.dates[start..end].to_vec(),
            tickers: self.tickers.clone(),
            values: self
                .values
                .slice_axis(Axis(0), ndarray::Slice::from(start..end))
                .to_owned(),
        }
    }

    /// Rows up to and including a date
    pub fn up_to(&self, date: NaiveDate) -> Frame {
        match self.dates.first() {
            Some(&first) => self.slice_dates(first, date),
            None => self.clone(),
        }
    }

    /// Restrict to the given ticker columns, in the given order.
    pub fn select_tickers(&self, tickers: &[String]) -> Result<Frame> {
        let mut columns = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let idx = self.ticker_index(ticker).ok_or_else(|| {
                BacktestError::precondition(format!("missing ticker column: {}", ticker))
            })?;
            columns.push(idx);
        }

        let mut values = Array2::zeros((self.len(), tickers.len()));
        for (out, &src) in columns.iter().enumerate() {
            values.column_mut(out).assign(&self.values.column(src));
        }

        Ok(Frame {
            dates: self.dates.clone(),
            tickers: tickers.to_vec(),
            values,
        })
    }

    /// Sample covariance matrix (ddof = 1) over rows where every column
    /// is observed. Fails when fewer than two complete rows exist.
    pub fn covariance(&self) -> Result<Array2<f64>> {
        let last = *self.dates.last().ok_or_else(|| {
            BacktestError::precondition("covariance of an empty frame".to_string())
        })?;

        let complete: Vec<usize> = (0..self.len())
            .filter(|&r| self.values.row(r).iter().all(|v| v.is_finite()))
            .collect();
        if complete.len() < 2 {
            return Err(BacktestError::computation(
                "covariance",
                last,
                format!("{} complete observations, need at least 2", complete.len()),
            ));
        }

        let n = complete.len() as f64;
        let cols = self.tickers.len();
        let mut means = vec![0.0; cols];
        for &r in &complete {
            for c in 0..cols {
                means[c] += self.values[[r, c]];
            }
        }
        for mean in means.iter_mut() {
            *mean /= n;
        }

        let mut cov = Array2::zeros((cols, cols));
        for &r in &complete {
            for i in 0..cols {
                let di = self.values[[r, i]] - means[i];
                for j in i..cols {
                    let dj = self.values[[r, j]] - means[j];
                    cov[[i, j]] += di * dj;
                }
            }
        }
        for i in 0..cols {
            for j in i..cols {
                let value = cov[[i, j]] / (n - 1.0);
                cov[[i, j]] = value;
                cov[[j, i]] = value;
            }
        }

        Ok(cov)
    }

    /// Forward-fill missing values down each column. Leading NaNs stay.
    pub fn forward_fill(&mut self) {
        for mut column in self.values.columns_mut() {
            let mut last = f64::NAN;
            for value in column.iter_mut() {
                if value.is_finite() {
                    last = *value;
                } else if last.is_finite() {
                    *value = last;
                }
            }
        }
    }
}
