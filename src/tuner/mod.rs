pub mod adaptive;
pub mod params;
pub mod store;

pub use adaptive::{tune, AdaptiveTuner, Adjustment, TunedParameter, TuningReport};
pub use params::{TunerConfig, TunerHandle};
pub use store::{JsonFileTunerStore, MemoryTunerStore, TunerConfigStore};
