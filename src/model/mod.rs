pub mod forecast;
pub mod observation;
pub mod signal;

pub use forecast::{ConfidenceLevel, ForecastResult, ModelLabel, Trend};
pub use observation::Observation;
pub use signal::{Signal, TradingSignal};
