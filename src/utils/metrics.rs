//! Statistics helpers and performance reporting.

/// Arithmetic mean; 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (ddof = 0)
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Sample standard deviation (ddof = 1); 0.0 when fewer than two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
    variance.sqrt()
}

/// Cumulative compounded return over a series of simple returns:
/// `prod(1 + r) - 1`.
pub fn cumulative_compounded_return(returns: &[f64]) -> f64 {
    returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

/// Maximum drawdown of the equity curve compounded from returns.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut nav = 1.0;
    let mut peak: f64 = 1.0;
    let mut max_dd = 0.0_f64;

    for r in returns {
        nav *= 1.0 + r;
        peak = peak.max(nav);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - nav) / peak);
        }
    }

    max_dd
}

/// Performance summary over a per-period return series.
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub volatility: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub periods: usize,
}

impl PerformanceMetrics {
    /// Calculate all metrics from a return series.
    ///
    /// # Arguments
    /// * `returns` - per-period simple returns
    /// * `periods_per_year` - annualization factor (252 for daily data)
    pub fn from_returns(returns: &[f64], periods_per_year: f64) -> Self {
        let std = sample_std(returns);
        let sharpe = if std > 0.0 {
            mean(returns) / std * periods_per_year.sqrt()
        } else {
            0.0
        };
        let wins = returns.iter().filter(|r| **r > 0.0).count();
        let win_rate = if returns.is_empty() {
            0.0
        } else {
            wins as f64 / returns.len() as f64
        };

        Self {
            total_return: cumulative_compounded_return(returns),
            sharpe_ratio: sharpe,
            volatility: std * periods_per_year.sqrt(),
            max_drawdown: max_drawdown(returns),
            win_rate,
            periods: returns.len(),
        }
    }
}

impl std::fmt::Display for PerformanceMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Performance Metrics:")?;
        writeln!(f, "  Total Return:   {:>10.2}%", self.total_return * 100.0)?;
        writeln!(f, "  Sharpe Ratio:   {:>10.2}", self.sharpe_ratio)?;
        writeln!(f, "  Volatility:     {:>10.2}%", self.volatility * 100.0)?;
        writeln!(f, "  Max Drawdown:   {:>10.2}%", self.max_drawdown * 100.0)?;
        writeln!(f, "  Win Rate:       {:>10.2}%", self.win_rate * 100.0)?;
        writeln!(f, "  Periods:        {:>10}", self.periods)
    }
}
