//! Run a full learn-then-trade backtest over a flat-file panel.

use anyhow::Result;
use rust_q_trading::{
    AppConfig, FlatFileDataService, PerformanceMetrics, TradingAgent,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("Usage: backtest <data_dir> [config.json]");
        println!("Example: backtest data/djia config/backtest.json");
        return Ok(());
    }

    let mut config = match args.get(2) {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::from_env(),
    };
    config.data.directory = args[1].clone();

    println!("Loading panel from {}...", config.data.directory);
    let service = FlatFileDataService::new(&config.data.directory);
    let mut items = config.data.signals.clone();
    items.push(config.data.price_item.clone());
    let panel = service.get_data(&items, &config.data.tickers)?;
    println!(
        "Loaded {} signals over {} dates",
        items.len(),
        panel.dates().len()
    );

    let prices = panel
        .signal(&config.data.price_item)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("panel is missing price item {}", config.data.price_item))?;

    let mut agent = TradingAgent::new(
        &panel,
        &config.data.price_item,
        config.data.signals.clone(),
        &config.learning,
    )?;

    println!(
        "\nLearning for {} periods (reward offset {})...",
        config.learning.learn_periods, config.learning.reward_offset
    );
    let settled = agent.learn(
        config.learning.learn_periods,
        config.learning.reward_offset,
    )?;
    println!(
        "Settled {} reward windows over {} states",
        settled,
        agent.learner().state_count()
    );

    println!("\nTrading the remaining dates...");
    let rebalances = agent.trade(config.learning.reward_offset)?;
    println!("Performed {} rebalances", rebalances);

    let returns = agent.portfolio().calculate_portfolio_returns(&prices);
    let series: Vec<f64> = returns.iter().map(|(_, r)| *r).collect();
    let metrics = PerformanceMetrics::from_returns(&series, 252.0);

    println!("\n=== Backtest Results ===\n");
    println!("{}", metrics);

    // Save the return series for further analysis.
    let results_path = "portfolio_returns.csv";
    let mut writer = csv::Writer::from_path(results_path)?;
    writer.write_record(["date", "return"])?;
    for (date, value) in &returns {
        writer.write_record(&[date.to_string(), value.to_string()])?;
    }
    writer.flush()?;
    println!("Return series saved to {}", results_path);

    Ok(())
}
