pub mod bar;
pub mod decision;
pub mod position;
pub mod trade;

pub use bar::{Bar, BarError};
pub use decision::{resolve_bracket_price, Decision, Signal};
pub use position::Position;
pub use trade::{EquityPoint, ExitReason, Trade};
