pub mod backtester;
pub mod candle_utils;
pub mod config;
pub mod context;
pub mod error;
pub mod indicator;
pub mod indicators;
pub mod job_queue;
pub mod market_data;
pub mod models;
pub mod notifier;
pub mod optimizer;
pub mod orchestrator;
pub mod param_utils;
pub mod performance;
pub mod risk;
pub mod run_status;
pub mod signals;
pub mod store;
pub mod worker;

pub mod commands {
    pub mod backtest;
    pub mod generate_sample;
    pub mod optimize;
    pub mod show;
}
