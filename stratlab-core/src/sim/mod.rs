pub mod bracket;
pub mod cost_model;
pub mod result;
pub mod simulator;

pub use cost_model::{CostModel, Side};
pub use result::{TickerResult, TickerSummary};
pub use simulator::{simulate_ticker, SimParams};
