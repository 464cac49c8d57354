//! Application configuration.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Data provider configuration
    pub data: DataConfig,
    /// Learning and trading configuration
    pub learning: LearningConfig,
}

/// Data provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding one CSV per data item
    pub directory: String,
    /// Panel item carrying per-period prices
    pub price_item: String,
    /// Tickers to trade
    pub tickers: Vec<String>,
    /// Signals composing the learner's state, in order
    pub signals: Vec<String>,
}

/// Learning and trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Learning rate for the value-table update
    pub alpha: f64,
    /// Periods to train on before trading begins
    pub learn_periods: usize,
    /// Steps between reward realizations (and rebalances)
    pub reward_offset: usize,
    /// Replace learned actions with uniform random ones while trading
    pub random_policy: bool,
    /// Skip reward windows whose statistics are undefined instead of
    /// aborting the backtest
    pub skip_poisoned_windows: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data: DataConfig {
                directory: "data".to_string(),
                price_item: "PRICE".to_string(),
                tickers: Vec::new(),
                signals: vec!["LEVERAGE".to_string(), "NET_PROFIT_MARGIN".to_string()],
            },
            learning: LearningConfig {
                alpha: 0.5,
                learn_periods: 255,
                reward_offset: 5,
                random_policy: false,
                skip_poisoned_windows: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load defaults with environment variable overrides
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(directory) = std::env::var("QTRADING_DATA_DIR") {
            config.data.directory = directory;
        }
        if let Ok(price_item) = std::env::var("QTRADING_PRICE_ITEM") {
            config.data.price_item = price_item;
        }
        if let Ok(tickers) = std::env::var("QTRADING_TICKERS") {
            config.data.tickers = tickers.split(',').map(|t| t.trim().to_string()).collect();
        }
        if let Ok(alpha) = std::env::var("QTRADING_ALPHA") {
            if let Ok(alpha) = alpha.parse() {
                config.learning.alpha = alpha;
            }
        }

        config
    }
}
